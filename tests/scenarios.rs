//! End-to-end reclamation and container scenarios.

#![cfg(not(feature = "loom"))]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use swmr_rcu::{RcuDomain, RcuMap, RcuVec};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn manual_domain() -> RcuDomain {
    RcuDomain::builder().purge_period(None).build().unwrap()
}

/// Advance the clock to `generation` with purges that reclaim nothing.
fn advance_to(domain: &RcuDomain, generation: u64) {
    while domain.generation() < generation {
        domain.purge();
    }
    assert_eq!(domain.generation(), generation);
}

struct Retired(Arc<AtomicUsize>);

impl Drop for Retired {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A parked reader thread: registered, optionally inside a read section, until released.
struct Reader {
    release: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Reader {
    fn spawn(domain: &RcuDomain, in_section: bool) -> (Self, Option<u64>) {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let domain = domain.clone();

        let handle = thread::spawn(move || {
            let _attachment = domain.attach();
            if in_section {
                let guard = domain.enter();
                ready_tx.send(Some(guard.generation())).unwrap();
                release_rx.recv().unwrap();
            } else {
                ready_tx.send(None).unwrap();
                release_rx.recv().unwrap();
            }
        });

        let snapshot = ready_rx.recv().unwrap();
        (
            Reader {
                release: release_tx,
                handle,
            },
            snapshot,
        )
    }

    fn finish(self) {
        self.release.send(()).unwrap();
        self.handle.join().unwrap();
    }
}

#[test]
fn idle_registered_thread_does_not_block_reclamation() {
    init_logging();
    let domain = manual_domain();
    let reclaimed = Arc::new(AtomicUsize::new(0));

    domain.register_current_thread();
    let (idle, snapshot) = Reader::spawn(&domain, false);
    assert_eq!(snapshot, None);
    assert_eq!(domain.registered_threads(), 2);

    advance_to(&domain, 5);
    domain.free_object(Box::new(Retired(Arc::clone(&reclaimed))));

    let stats = domain.purge();
    assert_eq!(domain.generation(), 6);
    assert_eq!(stats.oldest_active, None);
    assert_eq!(stats.reclaimed_callbacks, 1);
    assert_eq!(reclaimed.load(Ordering::SeqCst), 1);

    idle.finish();
}

#[test]
fn reader_in_section_holds_back_later_retirement() {
    init_logging();
    let domain = manual_domain();
    let reclaimed = Arc::new(AtomicUsize::new(0));

    domain.register_current_thread();
    advance_to(&domain, 5);

    let (reader, snapshot) = Reader::spawn(&domain, true);
    assert_eq!(snapshot, Some(5));

    advance_to(&domain, 6);
    domain.free_object(Box::new(Retired(Arc::clone(&reclaimed))));

    let stats = domain.purge();
    assert_eq!(domain.generation(), 7);
    assert_eq!(stats.oldest_active, Some(5));
    assert_eq!(stats.reclaimed_callbacks, 0);
    assert_eq!(reclaimed.load(Ordering::SeqCst), 0);

    reader.finish();

    let stats = domain.purge();
    assert_eq!(stats.reclaimed_callbacks, 1);
    assert_eq!(reclaimed.load(Ordering::SeqCst), 1);
}

#[test]
fn vector_readers_always_see_ivect_n_equal_n() {
    init_logging();
    let domain = RcuDomain::builder()
        .purge_period(Duration::from_millis(1))
        .build()
        .unwrap();
    let ivect = Arc::new(RcuVec::new(&domain));
    let done = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(5));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let domain = domain.clone();
            let ivect = Arc::clone(&ivect);
            let done = Arc::clone(&done);
            let start = Arc::clone(&start);

            thread::spawn(move || {
                let _attachment = domain.attach();
                start.wait();

                let mut snapshots = 0usize;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    {
                        let guard = domain.enter();
                        let span = ivect.span(&guard);
                        for (n, value) in span.iter().enumerate() {
                            assert_eq!(*value, n);
                        }
                    }
                    snapshots += 1;
                    if finished {
                        break snapshots;
                    }
                }
            })
        })
        .collect();

    start.wait();
    for i in 0..200usize {
        ivect.push_back(i);
        thread::yield_now();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    let guard = domain.enter();
    assert_eq!(ivect.span(&guard), (0..200).collect::<Vec<_>>().as_slice());
}

#[test]
fn map_readers_always_see_value_equal_key_plus_one() {
    init_logging();
    let domain = RcuDomain::builder()
        .purge_period(Duration::from_millis(1))
        .build()
        .unwrap();
    let map = Arc::new(RcuMap::new(&domain));
    let done = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(5));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let domain = domain.clone();
            let map = Arc::clone(&map);
            let done = Arc::clone(&done);
            let start = Arc::clone(&start);

            thread::spawn(move || {
                let _attachment = domain.attach();
                start.wait();

                while !done.load(Ordering::Acquire) {
                    let guard = domain.enter();
                    for (key, value) in map.iter(&guard) {
                        assert_eq!(*value, *key + 1);
                    }
                }
            })
        })
        .collect();

    start.wait();
    for i in 0..200u32 {
        map.emplace_with(i, || Ok::<_, ()>(i + 1)).unwrap();
        thread::yield_now();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }

    let guard = domain.enter();
    for i in 0..200u32 {
        assert_eq!(map.count(&i, &guard), 1);
    }
    assert_eq!(map.iter(&guard).count(), 200);
}
