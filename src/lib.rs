//! Callback-driven `poll(2)` reactor with timers, signal routing, and RPC
//! record framing.
//!
//! This crate is the I/O core underneath an RPC runtime: a single-threaded
//! dispatcher that multiplexes descriptor readiness, millisecond deadlines,
//! POSIX signal delivery, and cross-thread wake-ups into an ordered
//! sequence of callback invocations, plus the length-prefixed record
//! framing that defines the wire contract it serves.
//!
//! # Architecture
//!
//! - **PollSet**: the dispatcher; one blocking `poll` per cycle, then
//!   descriptor callbacks, expired timers, signal handlers, and table
//!   consolidation, in that order
//! - **Injector**: cloneable handle that enqueues callbacks from other
//!   threads and breaks the blocking wait through a wake pipe
//! - **Timeout**: handle for cancelling or rescheduling a timer callback
//! - **msg**: record buffers and 4-byte-aligned byte streams with zero
//!   padding
//! - **net**: address resolution and TCP connect/listen helpers
//!
//! Callbacks receive `&mut PollSet` and may freely re-register, remove, or
//! reschedule work, including the callback currently firing.

mod error;
mod pollset;
mod sys;

pub mod msg;
pub mod net;

pub use error::{Error, Result};
pub use pollset::{AsyncCb, FdCb, Injector, NUM_SIG, Op, PollSet, SignalCb, TimerCb, Timeout};
pub use sys::{really_close, set_close_on_exec, set_nonblock};
