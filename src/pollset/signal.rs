//! Process-wide signal routing.
//!
//! `sigaction` dispositions are process-global, so ownership of a signal by
//! a pollset lives in process-global state: a delivery-flag array and a
//! wake-fd array the async-signal-safe trampoline can touch, and a
//! mutex-guarded table holding each signal's owner id and user callback.
//! Storing the callback in the table cell (rather than inside the owning
//! pollset) makes ownership transfer a plain cell replacement.
//!
//! The trampoline performs only a flag store, a fence, an atomic fd read,
//! and a one-byte pipe write. The 1 -> 2 flag transition lets teardown spot
//! a wake in progress and spin it out before the wake fd goes away.

use crate::error::{Error, Result};
use crate::pollset::core::{PollSet, SignalCb};

use libc::c_int;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering, fence};
use std::thread;

/// One past the highest routable signal number. Signal numbers are valid in
/// `1..NUM_SIG`.
pub const NUM_SIG: c_int = 65;

const N: usize = NUM_SIG as usize;

/// Per-signal delivery flag: 0 idle, 1 wake in progress inside the
/// trampoline, 2 wake complete and delivery pending at user level.
static FLAGS: [AtomicU8; N] = [const { AtomicU8::new(0) }; N];

/// Wake-pipe write end of each signal's owning pollset, -1 when unowned.
/// Kept outside the table mutex because the trampoline may not lock.
static WAKE_FDS: [AtomicI32; N] = [const { AtomicI32::new(-1) }; N];

struct Cell {
    owner: u64,
    /// `None` while the callback is stolen for dispatch.
    cb: Option<SignalCb>,
}

static TABLE: Mutex<[Option<Cell>; N]> = Mutex::new([const { None }; N]);

pub(crate) fn check_sig(sig: c_int) {
    assert!(
        sig > 0 && sig < NUM_SIG,
        "signal number {sig} out of range"
    );
}

extern "C" fn trampoline(sig: c_int) {
    let sig = sig as usize;
    if FLAGS[sig].load(Ordering::Relaxed) != 0 {
        return;
    }
    FLAGS[sig].store(1, Ordering::Relaxed);
    fence(Ordering::SeqCst);
    // The owner cannot vanish mid-wake: teardown spins on flag value 1
    // before closing the pipe.
    let fd = WAKE_FDS[sig].load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = super::queue::WAKE_SIGNAL;
        unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    }
    fence(Ordering::SeqCst);
    FLAGS[sig].store(2, Ordering::Relaxed);
}

fn sigaction_set(sig: c_int, handler: usize) -> Result<()> {
    let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
    sa.sa_sigaction = handler;
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    sa.sa_flags = 0;
    if unsafe { libc::sigaction(sig, &sa, std::ptr::null_mut()) } == -1 {
        return Err(Error::last_os("sigaction"));
    }
    Ok(())
}

/// Installs `cb` as `owner`'s handler for `sig`, taking ownership from any
/// previous owner (whose callback is dropped). Returns true if a delivery
/// was already pending, in which case the caller must wake itself so the
/// new callback runs at the next opportunity.
pub(crate) fn install(sig: c_int, owner: u64, wake_fd: RawFd, cb: SignalCb) -> Result<bool> {
    let mut table = TABLE.lock().unwrap();
    let idx = sig as usize;

    let same_owner = matches!(&table[idx], Some(cell) if cell.owner == owner);
    if table[idx].is_none() {
        sigaction_set(sig, trampoline as usize)?;
    }
    // The wake fd must be visible to the trampoline no later than the
    // ownership cell: a delivery landing mid-transfer then wakes the new
    // owner, whose cell is filled in below before this call returns, rather
    // than the old owner, who would ignore it.
    WAKE_FDS[idx].store(wake_fd, Ordering::SeqCst);
    table[idx] = Some(Cell {
        owner,
        cb: Some(cb),
    });

    if same_owner {
        // The pending wake, if any, already went to this pollset's pipe.
        return Ok(false);
    }
    Ok(FLAGS[idx].load(Ordering::SeqCst) != 0)
}

/// Restores the default disposition for `sig` and drops the owner's
/// callback. A delivery observed pending is re-raised so the restored
/// disposition sees it exactly once.
pub(crate) fn remove(sig: c_int) -> Result<()> {
    let mut table = TABLE.lock().unwrap();
    remove_locked(&mut table, sig)
}

fn remove_locked(table: &mut [Option<Cell>; N], sig: c_int) -> Result<()> {
    let idx = sig as usize;
    if table[idx].is_none() {
        return Ok(());
    }

    sigaction_set(sig, libc::SIG_DFL)?;
    table[idx] = None;
    WAKE_FDS[idx].store(-1, Ordering::SeqCst);
    fence(Ordering::SeqCst);

    while FLAGS[idx].load(Ordering::SeqCst) & 1 != 0 {
        thread::yield_now();
    }
    if FLAGS[idx].swap(0, Ordering::SeqCst) != 0 {
        unsafe { libc::raise(sig) };
    }
    Ok(())
}

/// Releases every signal owned by a dropped pollset.
pub(crate) fn release_owner(owner: u64) {
    let mut table = TABLE.lock().unwrap();
    for sig in 1..NUM_SIG {
        if matches!(&table[sig as usize], Some(cell) if cell.owner == owner) {
            if let Err(err) = remove_locked(&mut table, sig) {
                log::error!("releasing signal {sig}: {err}");
            }
        }
    }
}

/// Runs `ps`'s callbacks for every owned signal whose delivery flag is set.
///
/// The table lock is released across each callback so handlers may
/// re-enter signal registration; the callback is stolen from its cell for
/// the duration and put back unless the cell changed hands or was refilled
/// meanwhile.
pub(crate) fn dispatch(ps: &mut PollSet) -> Result<()> {
    let owner = ps.owner_id();
    let mut table = TABLE.lock().unwrap();

    let mut ready = Vec::new();
    for sig in 1..N {
        if FLAGS[sig].load(Ordering::SeqCst) != 0
            && matches!(&table[sig], Some(cell) if cell.owner == owner)
        {
            ready.push(sig);
        }
    }

    for sig in ready {
        // Re-check: a previous callback ran unlocked and may have moved or
        // cleared this signal.
        let mut cb = match &mut table[sig] {
            Some(cell) if cell.owner == owner => match cell.cb.take() {
                Some(cb) => cb,
                None => continue,
            },
            _ => continue,
        };

        while FLAGS[sig].load(Ordering::SeqCst) & 1 != 0 {
            thread::yield_now();
        }
        FLAGS[sig].store(0, Ordering::SeqCst);

        drop(table);
        let result = cb(ps);
        table = TABLE.lock().unwrap();

        if let Some(cell) = &mut table[sig] {
            if cell.owner == owner && cell.cb.is_none() {
                cell.cb = Some(cb);
            }
        }
        result?;
    }
    Ok(())
}
