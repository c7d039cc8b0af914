use vigil::PollSet;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counting_cb(hits: &Arc<AtomicUsize>) -> impl FnMut(&mut PollSet) -> vigil::Result<()> + Send {
    let hits = hits.clone();
    move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn delivered_signal_runs_the_owning_callback() {
    let mut ps = PollSet::new().expect("pollset");
    let hits = Arc::new(AtomicUsize::new(0));
    ps.signal_cb(libc::SIGUSR2, counting_cb(&hits))
        .expect("signal_cb");

    unsafe { libc::raise(libc::SIGUSR2) };
    ps.run_once(1_000).expect("cycle");
    assert_eq!(hits.load(Ordering::SeqCst), 1, "callback ran once");

    // The delivery flag is clear again, so removal does not re-raise.
    ps.signal_cb_clear(libc::SIGUSR2).expect("clear");
}

#[test]
fn registration_takes_over_a_pending_signal() {
    let mut p1 = PollSet::new().expect("p1");
    let mut p2 = PollSet::new().expect("p2");
    let p1_hits = Arc::new(AtomicUsize::new(0));
    let p2_hits = Arc::new(AtomicUsize::new(0));

    p1.signal_cb(libc::SIGUSR1, counting_cb(&p1_hits))
        .expect("p1 signal_cb");
    unsafe { libc::raise(libc::SIGUSR1) };

    // The delivery is still pending when ownership transfers.
    p2.signal_cb(libc::SIGUSR1, counting_cb(&p2_hits))
        .expect("p2 signal_cb");

    p1.run_once(0).expect("p1 cycle");
    p2.run_once(0).expect("p2 cycle");

    assert_eq!(p1_hits.load(Ordering::SeqCst), 0, "old owner stayed silent");
    assert_eq!(p2_hits.load(Ordering::SeqCst), 1, "new owner got the delivery");
}

#[test]
fn handler_can_reenter_signal_registration() {
    let mut ps = PollSet::new().expect("pollset");
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = hits.clone();
        ps.signal_cb(libc::SIGWINCH, move |ps| {
            hits.fetch_add(1, Ordering::SeqCst);
            ps.signal_cb_clear(libc::SIGWINCH)
        })
        .expect("signal_cb");
    }

    unsafe { libc::raise(libc::SIGWINCH) };
    ps.run_once(1_000).expect("first cycle");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The handler removed itself; nothing owns the signal any more and the
    // pollset is idle.
    assert!(!ps.pending(), "no residual work");
}
