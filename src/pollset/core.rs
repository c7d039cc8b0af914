use crate::error::{Error, Result};
use crate::pollset::queue::{AsyncQueue, Injector, WAKE_SIGNAL};
use crate::pollset::signal;
use crate::pollset::table::{Dir, FdTable, Op};
use crate::pollset::timer::{TimerQueue, Timeout};
use crate::sys;

use libc::{POLLNVAL, c_int};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Callback registered for one direction of a descriptor.
pub type FdCb = Box<dyn FnMut(&mut PollSet) -> Result<()>>;

/// Callback fired once when a timer expires.
pub type TimerCb = Box<dyn FnOnce(&mut PollSet) -> Result<()>>;

/// Callback injected from another thread, run once on the dispatch thread.
pub type AsyncCb = Box<dyn FnOnce(&mut PollSet) -> Result<()> + Send>;

/// Callback fired when an owned signal is delivered.
pub type SignalCb = Box<dyn FnMut(&mut PollSet) -> Result<()> + Send>;

/// Source of pollset owner ids. Ids are never reused, so a stale id in the
/// signal table can never alias a newer pollset.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Anchor for the monotonic millisecond clock shared by all deadlines.
static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Chunk size for draining the wake pipe.
const WAKE_DRAIN: usize = 128;

/// A single-threaded event dispatcher.
///
/// One `PollSet` owns a descriptor set, a timer queue, an async-injection
/// queue, and a subset of the process's signals, and multiplexes all four
/// into an ordered sequence of callback invocations on the thread that
/// calls [`run_once`](Self::run_once) or [`run`](Self::run).
///
/// Callbacks receive `&mut PollSet` and may re-enter any registration
/// operation, including removing or replacing the callback currently
/// firing. Errors returned by callbacks propagate out of `run_once` with
/// any already-captured but unexecuted work re-queued, so a retried
/// `run_once` resumes without loss.
pub struct PollSet {
    id: u64,
    /// Wake pipe; `[0]` is the read end registered at slot 0, `[1]` the
    /// write end shared with injectors and the signal trampoline.
    selfpipe: [RawFd; 2],
    table: FdTable,
    timers: TimerQueue,
    asyncs: Arc<AsyncQueue>,
    /// Latched when a drained wake byte came from the signal trampoline.
    signal_pending: bool,
}

impl PollSet {
    /// Creates a pollset with its wake pipe registered at slot 0.
    pub fn new() -> Result<PollSet> {
        let selfpipe = sys::sys_pipe()?;
        let setup: Result<()> = (|| {
            for fd in selfpipe {
                sys::set_close_on_exec(fd)?;
                sys::set_nonblock(fd)?;
            }
            Ok(())
        })();
        if let Err(err) = setup {
            sys::really_close(selfpipe[0]);
            sys::really_close(selfpipe[1]);
            return Err(err);
        }

        let mut ps = PollSet {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            selfpipe,
            table: FdTable::new(),
            timers: TimerQueue::new(),
            asyncs: Arc::new(AsyncQueue::new(selfpipe[1])),
            signal_pending: false,
        };
        ps.fd_cb(selfpipe[0], Op::Read, |ps: &mut PollSet| {
            ps.run_pending_asyncs()
        });
        Ok(ps)
    }

    /// Monotonic milliseconds; the clock all deadlines are measured on.
    pub fn now_ms() -> i64 {
        CLOCK_EPOCH.get_or_init(Instant::now).elapsed().as_millis() as i64
    }

    /// Installs `cb` for one direction of `fd`, replacing any callback
    /// already installed for that direction. `ReadOnce`/`WriteOnce`
    /// deregister the callback as it fires.
    pub fn fd_cb<F>(&mut self, fd: RawFd, op: Op, cb: F)
    where
        F: FnMut(&mut PollSet) -> Result<()> + 'static,
    {
        self.table.set_cb(fd, op.dir(), op.oneshot(), Box::new(cb));
    }

    /// Clears the callback and interest for `op`'s direction of `fd`. A
    /// callback cleared before the cycle in which it would have fired will
    /// not fire; the emptied record is consolidated at the end of the next
    /// cycle.
    pub fn fd_cb_clear(&mut self, fd: RawFd, op: Op) {
        self.table.clear_cb(fd, op.dir());
    }

    /// Schedules `cb` to fire `delay_ms` from now.
    pub fn timeout_cb<F>(&mut self, delay_ms: i64, cb: F) -> Timeout
    where
        F: FnOnce(&mut PollSet) -> Result<()> + 'static,
    {
        self.timeout_at_cb(Self::now_ms() + delay_ms, cb)
    }

    /// Schedules `cb` to fire at an absolute [`now_ms`](Self::now_ms)
    /// deadline. Equal deadlines fire in scheduling order.
    pub fn timeout_at_cb<F>(&mut self, deadline_ms: i64, cb: F) -> Timeout
    where
        F: FnOnce(&mut PollSet) -> Result<()> + 'static,
    {
        self.timers.schedule(deadline_ms, Box::new(cb))
    }

    /// Cancels a scheduled timer and nulls the handle. Cancelling a null
    /// handle is a no-op.
    pub fn timeout_cancel(&mut self, t: &mut Timeout) {
        self.timers.cancel(t);
    }

    /// Moves a scheduled timer to a new deadline, updating the handle. The
    /// callback itself is not reallocated.
    pub fn timeout_reschedule_at(&mut self, t: &mut Timeout, deadline_ms: i64) {
        self.timers.reschedule_at(t, deadline_ms);
    }

    /// Installs `cb` as this pollset's handler for `sig`, taking ownership
    /// of the signal from any other pollset that held it.
    ///
    /// # Panics
    ///
    /// Panics if `sig` is outside `1..NUM_SIG`.
    pub fn signal_cb<F>(&mut self, sig: c_int, cb: F) -> Result<()>
    where
        F: FnMut(&mut PollSet) -> Result<()> + Send + 'static,
    {
        signal::check_sig(sig);
        if signal::install(sig, self.id, self.selfpipe[1], Box::new(cb))? {
            self.wake(WAKE_SIGNAL);
        }
        Ok(())
    }

    /// Removes the handler for `sig` and restores the default disposition.
    /// A delivery observed pending during removal is re-raised so the
    /// default disposition sees it.
    ///
    /// # Panics
    ///
    /// Panics if `sig` is outside `1..NUM_SIG`.
    pub fn signal_cb_clear(&mut self, sig: c_int) -> Result<()> {
        signal::check_sig(sig);
        signal::remove(sig)
    }

    /// Enqueues `cb` to run during the next dispatch cycle. Callable from
    /// the dispatching thread; other threads use an [`Injector`].
    pub fn inject<F>(&self, cb: F)
    where
        F: FnOnce(&mut PollSet) -> Result<()> + Send + 'static,
    {
        self.asyncs.push(Box::new(cb));
    }

    /// Returns a handle other threads can use to inject callbacks.
    pub fn injector(&self) -> Injector {
        Injector::new(self.asyncs.clone())
    }

    /// True iff any registered descriptor beyond the wake pipe, queued
    /// async callback, or scheduled timer exists.
    pub fn pending(&self) -> bool {
        self.table.len() > 1 || !self.timers.is_empty() || self.asyncs.has_work()
    }

    /// Dispatches until [`pending`](Self::pending) returns false.
    /// Termination is the caller's responsibility, by cancelling all work.
    pub fn run(&mut self) -> Result<()> {
        while self.pending() {
            self.run_once(-1)?;
        }
        Ok(())
    }

    /// Performs at most one blocking wait, then drains everything that
    /// became ready: descriptor callbacks first, then expired timers in
    /// deadline order, then signal handlers, then consolidation of the
    /// descriptor table.
    ///
    /// `timeout_ms < 0` waits indefinitely, `0` polls without blocking, and
    /// positive values bound the wait; the next timer deadline caps the
    /// bound either way. `EINTR` is swallowed; call again to resume.
    pub fn run_once(&mut self, timeout_ms: i32) -> Result<()> {
        let timeout = self.next_timeout(timeout_ms);
        let rc = {
            let pollfds = self.table.pollfds_mut();
            unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout) }
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(Error::Sys("poll", err));
        }

        // Registrations made by a firing callback land past `maxpoll` and
        // wait for the next cycle; nothing shrinks the array mid-cycle.
        let maxpoll = self.table.len();
        let mut ready = rc;
        for i in 0..maxpoll {
            if ready <= 0 {
                break;
            }
            let (fd, revents) = self.table.entry_at(i);
            if revents == 0 {
                continue;
            }
            ready -= 1;
            debug_assert!(revents & POLLNVAL == 0, "polled a closed descriptor");
            if revents & Dir::Read.ready_mask() != 0 {
                self.dispatch_fd(fd, Dir::Read)?;
            }
            if revents & Dir::Write.ready_mask() != 0 {
                self.dispatch_fd(fd, Dir::Write)?;
            }
        }

        self.run_timeouts()?;
        self.run_signal_handlers()?;
        self.table.consolidate();
        Ok(())
    }

    /// Invokes one direction's callback for `fd` if one is registered.
    ///
    /// The callback is moved out for the call so it can mutate the table
    /// freely; a non-one-shot callback is put back afterwards unless it
    /// cleared or replaced its own registration.
    fn dispatch_fd(&mut self, fd: RawFd, dir: Dir) -> Result<()> {
        let Some((mut cb, oneshot)) = self.table.begin_invoke(fd, dir) else {
            return Ok(());
        };
        if oneshot {
            cb(self)
        } else {
            let result = cb(self);
            self.table.finish_invoke(fd, dir, cb);
            result
        }
    }

    /// Effective poll timeout: the caller's bound capped by the next timer
    /// deadline, with an already-expired deadline forcing a non-blocking
    /// poll.
    fn next_timeout(&self, timeout_ms: i32) -> c_int {
        let Some(deadline) = self.timers.next_deadline() else {
            return timeout_ms;
        };
        let now = Self::now_ms();
        if now >= deadline {
            return 0;
        }
        let wait = (deadline - now).min(c_int::MAX as i64) as c_int;
        if timeout_ms >= 0 && timeout_ms <= wait {
            timeout_ms
        } else {
            wait
        }
    }

    /// Fires every timer due at a `now` sampled once, in (deadline,
    /// insertion) order. The due set is snapshotted before anything fires,
    /// so timers a firing callback schedules for that `now` or earlier wait
    /// for the next cycle, and cancelled or moved entries drop out of the
    /// snapshot. A failed callback has fired; the timers behind it stay
    /// queued.
    fn run_timeouts(&mut self) -> Result<()> {
        if self.timers.is_empty() {
            return Ok(());
        }
        let now = Self::now_ms();
        for key in self.timers.due_keys(now) {
            if let Some(cb) = self.timers.remove_key(key) {
                cb(self)?;
            }
        }
        Ok(())
    }

    fn run_signal_handlers(&mut self) -> Result<()> {
        if !self.signal_pending {
            return Ok(());
        }
        // On error the latch stays set, so undelivered signals are retried
        // by the next cycle.
        signal::dispatch(self)?;
        self.signal_pending = false;
        Ok(())
    }

    /// Read callback of slot 0: drains the wake pipe, notes trampoline
    /// bytes, and runs the injected batch in enqueue order. On error the
    /// unexecuted tail is re-queued before the error propagates.
    fn run_pending_asyncs(&mut self) -> Result<()> {
        let mut buf = [0u8; WAKE_DRAIN];
        loop {
            let n = sys::sys_read(self.selfpipe[0], &mut buf);
            if n <= 0 {
                break;
            }
            if !self.signal_pending && buf[..n as usize].contains(&WAKE_SIGNAL) {
                self.signal_pending = true;
            }
        }

        let batch = self.asyncs.take();
        let mut batch = batch.into_iter();
        while let Some(cb) = batch.next() {
            if let Err(err) = cb(self) {
                self.asyncs.push_front(batch.collect());
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn owner_id(&self) -> u64 {
        self.id
    }

    fn wake(&self, byte: u8) {
        sys::wake(self.selfpipe[1], byte);
    }
}

impl Drop for PollSet {
    fn drop(&mut self) {
        signal::release_owner(self.id);
        self.asyncs.detach();
        self.table.clear_cb(self.selfpipe[0], Dir::Read);
        sys::really_close(self.selfpipe[0]);
        sys::really_close(self.selfpipe[1]);
    }
}
