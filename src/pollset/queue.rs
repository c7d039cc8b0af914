//! Thread-safe FIFO of callbacks injected from other threads.
//!
//! Injections append under a mutex; the first injection since the last
//! drain writes one byte into the owning pollset's wake pipe, and the
//! pending flag collapses further injections into that single wake. The
//! owning pollset drains the queue from its wake-pipe read callback.

use crate::error::Result;
use crate::pollset::core::{AsyncCb, PollSet};
use crate::sys;

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

/// Wake byte for a plain cross-thread wake.
pub(crate) const WAKE_NORMAL: u8 = 0;

/// Wake byte written by the signal trampoline.
pub(crate) const WAKE_SIGNAL: u8 = 1;

struct Inner {
    cbs: Vec<AsyncCb>,
    /// True iff the wake pipe already carries a byte that will drain the
    /// queue.
    pending: bool,
    /// Write end of the owning pollset's wake pipe; `None` once the set is
    /// gone, after which injections are discarded.
    wake_fd: Option<RawFd>,
}

pub(crate) struct AsyncQueue {
    inner: Mutex<Inner>,
}

impl AsyncQueue {
    pub(crate) fn new(wake_fd: RawFd) -> AsyncQueue {
        AsyncQueue {
            inner: Mutex::new(Inner {
                cbs: Vec::new(),
                pending: false,
                wake_fd: Some(wake_fd),
            }),
        }
    }

    pub(crate) fn push(&self, cb: AsyncCb) {
        let mut q = self.inner.lock().unwrap();
        if q.wake_fd.is_none() {
            return;
        }
        q.cbs.push(cb);
        Self::wake_if_idle(&mut q);
    }

    /// Re-queues the unexecuted tail of a dispatch batch ahead of anything
    /// injected since the swap, so no callback is lost and FIFO order
    /// holds.
    pub(crate) fn push_front(&self, batch: Vec<AsyncCb>) {
        if batch.is_empty() {
            return;
        }
        let mut q = self.inner.lock().unwrap();
        let newer = std::mem::replace(&mut q.cbs, batch);
        q.cbs.extend(newer);
        Self::wake_if_idle(&mut q);
    }

    /// Swaps the queued batch out and clears the pending-wake flag.
    pub(crate) fn take(&self) -> Vec<AsyncCb> {
        let mut q = self.inner.lock().unwrap();
        q.pending = false;
        std::mem::take(&mut q.cbs)
    }

    pub(crate) fn has_work(&self) -> bool {
        let q = self.inner.lock().unwrap();
        q.pending || !q.cbs.is_empty()
    }

    /// Severs the link to the wake pipe when the pollset is dropped.
    pub(crate) fn detach(&self) {
        self.inner.lock().unwrap().wake_fd = None;
    }

    fn wake_if_idle(q: &mut Inner) {
        if !q.pending {
            q.pending = true;
            if let Some(fd) = q.wake_fd {
                sys::wake(fd, WAKE_NORMAL);
            }
        }
    }
}

/// Cloneable, `Send` handle for injecting callbacks into a pollset from
/// other threads.
///
/// Obtained from [`PollSet::injector`]. A handle that outlives its pollset
/// stays valid but its injections are discarded.
#[derive(Clone)]
pub struct Injector {
    queue: Arc<AsyncQueue>,
}

impl Injector {
    pub(crate) fn new(queue: Arc<AsyncQueue>) -> Injector {
        Injector { queue }
    }

    /// Enqueues `cb` to run on the pollset's dispatch thread during its
    /// next cycle.
    pub fn inject<F>(&self, cb: F)
    where
        F: FnOnce(&mut PollSet) -> Result<()> + Send + 'static,
    {
        self.queue.push(Box::new(cb));
    }
}
