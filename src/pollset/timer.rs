//! Deadline-ordered timer storage.
//!
//! Entries are keyed by `(deadline_ms, token)` where the token increases
//! monotonically, so equal deadlines fire in insertion order and a handle
//! can cancel or move its entry without scanning. A fired entry's key is
//! never reissued, which turns cancellation through a stale handle into a
//! no-op.

use crate::pollset::core::TimerCb;

use std::collections::BTreeMap;

/// Handle to a scheduled timer callback.
///
/// Obtained from [`timeout_cb`](crate::PollSet::timeout_cb) and
/// [`timeout_at_cb`](crate::PollSet::timeout_at_cb); consumed by
/// cancellation. The null handle refers to nothing and cancels as a no-op.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeout {
    key: Option<(i64, u64)>,
}

impl Timeout {
    /// The null handle.
    pub fn null() -> Timeout {
        Timeout { key: None }
    }

    /// True if this handle refers to no scheduled timer.
    pub fn is_null(&self) -> bool {
        self.key.is_none()
    }
}

pub(crate) struct TimerQueue {
    entries: BTreeMap<(i64, u64), TimerCb>,
    next_token: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> TimerQueue {
        TimerQueue {
            entries: BTreeMap::new(),
            next_token: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn schedule(&mut self, deadline_ms: i64, cb: TimerCb) -> Timeout {
        let key = (deadline_ms, self.next_token);
        self.next_token += 1;
        self.entries.insert(key, cb);
        Timeout { key: Some(key) }
    }

    /// Removes the handle's entry and nulls the handle.
    pub(crate) fn cancel(&mut self, t: &mut Timeout) {
        if let Some(key) = t.key.take() {
            self.entries.remove(&key);
        }
    }

    /// Moves the handle's callback to a new deadline without reallocating
    /// it. The moved entry ties-break as newly inserted. A null or stale
    /// handle is nulled and nothing moves.
    pub(crate) fn reschedule_at(&mut self, t: &mut Timeout, deadline_ms: i64) {
        let Some(key) = t.key.take() else {
            return;
        };
        let Some(cb) = self.entries.remove(&key) else {
            return;
        };
        *t = self.schedule(deadline_ms, cb);
    }

    /// Deadline of the earliest scheduled timer.
    pub(crate) fn next_deadline(&self) -> Option<i64> {
        self.entries.first_key_value().map(|(key, _)| key.0)
    }

    /// Keys of every entry due at `now`, in firing order. The caller fires
    /// from this snapshot, so entries scheduled while the due set drains
    /// (which carry later tokens) wait for the next snapshot even when
    /// their deadline is `now` or earlier.
    pub(crate) fn due_keys(&self, now: i64) -> Vec<(i64, u64)> {
        self.entries
            .range(..=(now, u64::MAX))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Removes and returns the entry at `key`, if it still exists; a
    /// callback earlier in the due set may have cancelled or moved it.
    pub(crate) fn remove_key(&mut self, key: (i64, u64)) -> Option<TimerCb> {
        self.entries.remove(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerQueue, Timeout};

    #[test]
    fn equal_deadlines_pop_in_insertion_order() {
        let mut timers = TimerQueue::new();
        let mut order = Vec::new();
        timers.schedule(5, Box::new(|_| Ok(())));
        timers.schedule(10, Box::new(|_| Ok(())));
        timers.schedule(5, Box::new(|_| Ok(())));

        while let Some((key, _)) = timers.entries.pop_first() {
            order.push(key);
        }
        assert_eq!(order, [(5, 0), (5, 2), (10, 1)]);
    }

    #[test]
    fn due_keys_respect_the_sampled_now() {
        let mut timers = TimerQueue::new();
        timers.schedule(5, Box::new(|_| Ok(())));
        timers.schedule(10, Box::new(|_| Ok(())));

        assert!(timers.due_keys(4).is_empty());
        assert_eq!(timers.due_keys(5), [(5, 0)]);
        assert_eq!(timers.due_keys(10), [(5, 0), (10, 1)]);

        assert!(timers.remove_key((5, 0)).is_some());
        assert!(timers.remove_key((5, 0)).is_none());
        assert_eq!(timers.next_deadline(), Some(10));
    }

    #[test]
    fn entries_scheduled_after_a_snapshot_stay_out_of_it() {
        let mut timers = TimerQueue::new();
        timers.schedule(5, Box::new(|_| Ok(())));
        let due = timers.due_keys(5);

        // A zero-delay entry scheduled while the snapshot drains.
        timers.schedule(5, Box::new(|_| Ok(())));
        assert_eq!(due, [(5, 0)]);
        assert!(timers.remove_key((5, 0)).is_some());
        assert!(!timers.is_empty(), "late entry waits for the next snapshot");
    }

    #[test]
    fn cancel_is_idempotent_and_null_safe() {
        let mut timers = TimerQueue::new();
        let mut t = timers.schedule(5, Box::new(|_| Ok(())));

        timers.cancel(&mut t);
        assert!(t.is_null());
        assert!(timers.is_empty());

        timers.cancel(&mut t);
        let mut null = Timeout::null();
        timers.cancel(&mut null);
    }

    #[test]
    fn reschedule_moves_without_firing() {
        let mut timers = TimerQueue::new();
        let mut t = timers.schedule(5, Box::new(|_| Ok(())));

        timers.reschedule_at(&mut t, 20);
        assert!(!t.is_null());
        assert_eq!(timers.next_deadline(), Some(20));
        assert!(timers.due_keys(5).is_empty());
        assert_eq!(timers.due_keys(20), [(20, 1)]);
        assert!(timers.remove_key((20, 1)).is_some());
    }
}
