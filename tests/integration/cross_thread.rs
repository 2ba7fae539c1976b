//! Values released on a thread other than their owner's.

use std::sync::mpsc;
use std::thread;

use super::tracked_with_capacity;

#[test]
fn cross_thread_return_becomes_visible_to_owner() {
    let (recycler, counters) = tracked_with_capacity(16);
    let value = recycler.acquire();
    let serial = value.serial;

    let releaser = recycler.clone();
    let (done_tx, done_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let foreign = thread::spawn(move || {
        done_tx.send(releaser.release(value).ok()).unwrap();
        // Stay alive so the queue is scavenged, not drained as dead.
        let _ = stop_rx.recv();
    });

    assert_eq!(done_rx.recv().unwrap(), Some(true));
    let again = recycler.acquire();
    assert_eq!(again.serial, serial);
    assert_eq!(counters.built(), 1);

    let stats = recycler.local_stats();
    assert_eq!(stats.scavenged, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.return_queues, 1);

    stop_tx.send(()).unwrap();
    foreign.join().unwrap();
}

#[test]
fn foreign_release_does_not_fill_the_releasing_threads_pool() {
    let (recycler, _) = tracked_with_capacity(16);
    let values: Vec<_> = (0..4).map(|_| recycler.acquire()).collect();

    let releaser = recycler.clone();
    thread::spawn(move || {
        for value in values {
            assert_eq!(releaser.release(value).ok(), Some(true));
        }
        assert_eq!(releaser.local_stats().pooled, 0);
    })
    .join()
    .unwrap();

    assert_eq!(recycler.local_stats().pooled, 0);
    let _value = recycler.acquire();
    assert_eq!(recycler.local_stats().pooled, 3);
}

#[test]
fn many_threads_return_to_one_owner() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 40;

    let (recycler, counters) = tracked_with_capacity(THREADS * PER_THREAD);
    let mut batches: Vec<Vec<_>> = (0..THREADS)
        .map(|_| (0..PER_THREAD).map(|_| recycler.acquire()).collect())
        .collect();

    let handles: Vec<_> = batches
        .drain(..)
        .map(|batch| {
            let releaser = recycler.clone();
            thread::spawn(move || {
                for value in batch {
                    assert_eq!(releaser.release(value).ok(), Some(true));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut serials: Vec<usize> = (0..THREADS * PER_THREAD)
        .map(|_| recycler.acquire().serial)
        .collect();
    serials.sort_unstable();
    serials.dedup();
    assert_eq!(serials.len(), THREADS * PER_THREAD);
    assert_eq!(counters.built(), THREADS * PER_THREAD);
}

#[test]
fn recycle_method_routes_cross_thread() {
    use recycler_rs::Recyclable;

    let (recycler, counters) = tracked_with_capacity(64);
    let value = recycler.acquire();
    thread::spawn(move || {
        assert_eq!(value.recycle().ok(), Some(true));
    })
    .join()
    .unwrap();

    let again = recycler.acquire();
    assert_eq!(again.serial, 0);
    assert_eq!(counters.built(), 1);
}
