use vigil::{Error, PollSet};

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn injections_from_threads_each_run_once_in_thread_order() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 2_500;

    let mut ps = PollSet::new().expect("pollset");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for tid in 0..THREADS {
        let injector = ps.injector();
        let seen = seen.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                let seen = seen.clone();
                injector.inject(move |_| {
                    seen.lock().unwrap().push((tid, i));
                    Ok(())
                });
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    while ps.pending() {
        ps.run_once(0).expect("drain");
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), THREADS * PER_THREAD, "each callback ran once");

    let mut next = [0usize; THREADS];
    for &(tid, i) in seen.iter() {
        assert_eq!(i, next[tid], "thread {tid} dispatched out of enqueue order");
        next[tid] += 1;
    }
}

#[test]
fn failed_injection_requeues_the_tail() {
    let mut ps = PollSet::new().expect("pollset");
    let seen = Arc::new(Mutex::new(Vec::new()));

    {
        let seen = seen.clone();
        ps.inject(move |_| {
            seen.lock().unwrap().push("a");
            Ok(())
        });
    }
    ps.inject(|_| Err(Error::user(io::Error::other("boom"))));
    {
        let seen = seen.clone();
        ps.inject(move |_| {
            seen.lock().unwrap().push("c");
            Ok(())
        });
    }

    assert!(ps.run_once(0).is_err(), "callback error propagates");
    assert_eq!(*seen.lock().unwrap(), ["a"], "failure stopped the batch");
    assert!(ps.pending(), "unexecuted tail re-queued");

    ps.run_once(0).expect("retry");
    assert_eq!(*seen.lock().unwrap(), ["a", "c"], "tail ran on retry");
    assert!(!ps.pending(), "queue drained");
}

#[test]
fn injection_from_a_callback_runs_next_cycle() {
    let mut ps = PollSet::new().expect("pollset");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let outer = seen.clone();
    ps.inject(move |ps| {
        outer.lock().unwrap().push("outer");
        let inner = outer.clone();
        ps.inject(move |_| {
            inner.lock().unwrap().push("inner");
            Ok(())
        });
        Ok(())
    });

    ps.run_once(0).expect("first cycle");
    assert_eq!(*seen.lock().unwrap(), ["outer"], "nested injection deferred");

    ps.run_once(0).expect("second cycle");
    assert_eq!(*seen.lock().unwrap(), ["outer", "inner"]);
}
