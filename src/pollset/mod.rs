mod core;
mod queue;
mod signal;
mod table;
mod timer;

pub use self::core::{AsyncCb, FdCb, PollSet, SignalCb, TimerCb};
pub use self::queue::Injector;
pub use self::signal::NUM_SIG;
pub use self::table::Op;
pub use self::timer::Timeout;
