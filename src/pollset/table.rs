//! Dense poll array plus per-descriptor records.
//!
//! `poll(2)` wants a contiguous `pollfd` array, while callback lookup wants
//! a by-descriptor map. `FdTable` owns both sides and keeps the record's
//! back-index and the array position in sync across swap-and-pop
//! consolidation, so no call site ever performs the two-sided update by
//! hand.

use crate::pollset::core::FdCb;

use libc::{POLLERR, POLLHUP, POLLIN, POLLOUT, c_short, pollfd};
use std::collections::HashMap;
use std::os::fd::RawFd;

/// Registration mode for [`fd_cb`](crate::PollSet::fd_cb).
///
/// A direction is always exactly one of read or write; the `Once` variants
/// additionally deregister the callback after its first firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Read,
    ReadOnce,
    Write,
    WriteOnce,
}

impl Op {
    pub(crate) fn dir(self) -> Dir {
        match self {
            Op::Read | Op::ReadOnce => Dir::Read,
            Op::Write | Op::WriteOnce => Dir::Write,
        }
    }

    pub(crate) fn oneshot(self) -> bool {
        matches!(self, Op::ReadOnce | Op::WriteOnce)
    }
}

/// One direction of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dir {
    Read,
    Write,
}

impl Dir {
    /// Interest bit registered with the kernel.
    pub(crate) fn interest(self) -> c_short {
        match self {
            Dir::Read => POLLIN,
            Dir::Write => POLLOUT,
        }
    }

    /// Returned-events mask that fires this direction. Hangup and error
    /// conditions fire both directions so their callbacks can observe the
    /// failure.
    pub(crate) fn ready_mask(self) -> c_short {
        self.interest() | POLLHUP | POLLERR
    }
}

/// One direction's registered callback. `cb` is `None` while the callback
/// is stolen for invocation.
#[derive(Default)]
struct Slot {
    cb: Option<FdCb>,
    oneshot: bool,
}

/// Per-descriptor bookkeeping: position in the dense array plus the two
/// direction slots.
struct FdRecord {
    idx: usize,
    read: Slot,
    write: Slot,
}

impl FdRecord {
    fn slot_mut(&mut self, dir: Dir) -> &mut Slot {
        match dir {
            Dir::Read => &mut self.read,
            Dir::Write => &mut self.write,
        }
    }
}

pub(crate) struct FdTable {
    pollfds: Vec<pollfd>,
    records: HashMap<RawFd, FdRecord>,
}

impl FdTable {
    pub(crate) fn new() -> FdTable {
        FdTable {
            pollfds: Vec::new(),
            records: HashMap::new(),
        }
    }

    /// Number of entries in the dense array, the wake pipe included.
    pub(crate) fn len(&self) -> usize {
        self.pollfds.len()
    }

    /// The dense array, for the one `poll` call per cycle.
    pub(crate) fn pollfds_mut(&mut self) -> &mut [pollfd] {
        &mut self.pollfds
    }

    /// Descriptor and returned events at array position `i`.
    pub(crate) fn entry_at(&self, i: usize) -> (RawFd, c_short) {
        let pfd = &self.pollfds[i];
        (pfd.fd, pfd.revents)
    }

    /// Installs `cb` for one direction of `fd`, creating the record and its
    /// dense-array entry on first registration. Replaces any callback
    /// already installed for that direction.
    pub(crate) fn set_cb(&mut self, fd: RawFd, dir: Dir, oneshot: bool, cb: FdCb) {
        let pollfds = &mut self.pollfds;
        let rec = self.records.entry(fd).or_insert_with(|| {
            let idx = pollfds.len();
            pollfds.push(pollfd {
                fd,
                events: 0,
                revents: 0,
            });
            FdRecord {
                idx,
                read: Slot::default(),
                write: Slot::default(),
            }
        });

        debug_assert_eq!(pollfds[rec.idx].fd, fd);
        pollfds[rec.idx].events |= dir.interest();

        let slot = rec.slot_mut(dir);
        slot.cb = Some(cb);
        slot.oneshot = oneshot;
    }

    /// Clears one direction's callback and interest bit. The record itself
    /// survives until consolidation at the end of the cycle.
    pub(crate) fn clear_cb(&mut self, fd: RawFd, dir: Dir) {
        let Some(rec) = self.records.get_mut(&fd) else {
            return;
        };
        self.pollfds[rec.idx].events &= !dir.interest();
        rec.slot_mut(dir).cb = None;
    }

    /// Takes the direction's callback out for invocation. A one-shot
    /// registration also drops its interest bit, so the record empties as
    /// the callback fires.
    pub(crate) fn begin_invoke(&mut self, fd: RawFd, dir: Dir) -> Option<(FdCb, bool)> {
        let rec = self.records.get_mut(&fd)?;
        let idx = rec.idx;
        let slot = rec.slot_mut(dir);
        let cb = slot.cb.take()?;
        let oneshot = slot.oneshot;
        if oneshot {
            self.pollfds[idx].events &= !dir.interest();
        }
        Some((cb, oneshot))
    }

    /// Puts a stolen callback back, unless the callback cleared or replaced
    /// its own registration while it ran.
    pub(crate) fn finish_invoke(&mut self, fd: RawFd, dir: Dir, cb: FdCb) {
        let Some(rec) = self.records.get_mut(&fd) else {
            return;
        };
        let idx = rec.idx;
        if self.pollfds[idx].events & dir.interest() == 0 {
            return;
        }
        let slot = rec.slot_mut(dir);
        if slot.cb.is_none() {
            slot.cb = Some(cb);
        }
    }

    /// Removes interest-less entries by swap-and-pop, updating the moved
    /// entry's back-index. Slot 0 keeps its interest for the pollset's whole
    /// lifetime, so it is never displaced.
    pub(crate) fn consolidate(&mut self) {
        while let Some(last) = self.pollfds.last() {
            if last.events != 0 {
                break;
            }
            self.records.remove(&last.fd);
            self.pollfds.pop();
        }

        if self.pollfds.len() < 2 {
            return;
        }
        let mut i = self.pollfds.len() - 2;
        loop {
            if self.pollfds[i].events == 0 {
                self.records.remove(&self.pollfds[i].fd);
                let last = self.pollfds.len() - 1;
                self.pollfds[i] = self.pollfds[last];
                self.pollfds.truncate(last);
                let moved = self.pollfds[i].fd;
                if let Some(rec) = self.records.get_mut(&moved) {
                    rec.idx = i;
                }
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }
    }

    /// Checks the two-sided bookkeeping: every array entry has a record
    /// whose back-index points at it, and (past consolidation) only slot 0
    /// may carry an empty interest mask.
    #[cfg(test)]
    fn assert_consolidated(&self) {
        assert_eq!(self.pollfds.len(), self.records.len());
        for (i, pfd) in self.pollfds.iter().enumerate() {
            let rec = self
                .records
                .get(&pfd.fd)
                .expect("dense entry without a record");
            assert_eq!(rec.idx, i, "stale back-index for fd {}", pfd.fd);
            if i != 0 {
                assert_ne!(pfd.events, 0, "empty interest survived consolidation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Dir, FdTable};
    use crate::pollset::core::FdCb;

    fn noop() -> FdCb {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn consolidate_pops_and_swaps_emptied_records() {
        let mut table = FdTable::new();
        // fd 0 stands in for the wake pipe at slot 0.
        table.set_cb(0, Dir::Read, false, noop());
        for fd in [7, 8, 9, 10] {
            table.set_cb(fd, Dir::Read, false, noop());
        }

        table.clear_cb(8, Dir::Read);
        table.clear_cb(10, Dir::Read);
        table.consolidate();

        assert_eq!(table.len(), 3);
        table.assert_consolidated();

        table.clear_cb(7, Dir::Read);
        table.clear_cb(9, Dir::Read);
        table.consolidate();

        assert_eq!(table.len(), 1);
        table.assert_consolidated();
    }

    #[test]
    fn oneshot_invoke_drops_interest() {
        let mut table = FdTable::new();
        table.set_cb(0, Dir::Read, false, noop());
        table.set_cb(5, Dir::Read, true, noop());

        let (_cb, oneshot) = table.begin_invoke(5, Dir::Read).expect("registered");
        assert!(oneshot);
        assert!(table.begin_invoke(5, Dir::Read).is_none());

        table.consolidate();
        assert_eq!(table.len(), 1);
        table.assert_consolidated();
    }

    #[test]
    fn restore_skips_slots_retaken_by_the_callback() {
        let mut table = FdTable::new();
        table.set_cb(0, Dir::Read, false, noop());
        table.set_cb(5, Dir::Read, false, noop());

        // Callback replaced itself while stolen: the replacement wins.
        let (stolen, _) = table.begin_invoke(5, Dir::Read).expect("registered");
        table.set_cb(5, Dir::Read, false, noop());
        table.finish_invoke(5, Dir::Read, stolen);
        assert!(table.begin_invoke(5, Dir::Read).is_some());

        // Callback cleared itself while stolen: nothing comes back.
        let mut table = FdTable::new();
        table.set_cb(0, Dir::Read, false, noop());
        table.set_cb(5, Dir::Read, false, noop());
        let (stolen, _) = table.begin_invoke(5, Dir::Read).expect("registered");
        table.clear_cb(5, Dir::Read);
        table.finish_invoke(5, Dir::Read, stolen);
        assert!(table.begin_invoke(5, Dir::Read).is_none());
    }

    #[test]
    fn directions_are_independent() {
        let mut table = FdTable::new();
        table.set_cb(0, Dir::Read, false, noop());
        table.set_cb(4, Dir::Read, false, noop());
        table.set_cb(4, Dir::Write, false, noop());

        table.clear_cb(4, Dir::Read);
        table.consolidate();

        assert_eq!(table.len(), 2);
        assert!(table.begin_invoke(4, Dir::Write).is_some());
        table.assert_consolidated();
    }
}
