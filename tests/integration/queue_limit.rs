//! Per-thread limit on return queues toward pools of one recycler.

use std::sync::mpsc;
use std::thread;

use recycler_rs::RecyclerConfig;

use super::{tracked, Tracked};

/// Spawns an owner thread that acquires one value, hands it over, then waits
/// for `go` and reports its stats after a second acquire.
fn owner(
    recycler: recycler_rs::Recycler<Tracked>,
) -> (
    Tracked,
    mpsc::Sender<()>,
    thread::JoinHandle<(usize, recycler_rs::LocalStats)>,
) {
    let (value_tx, value_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        value_tx.send(recycler.acquire()).unwrap();
        go_rx.recv().unwrap();
        let again = recycler.acquire();
        (again.serial, recycler.local_stats())
    });
    (value_rx.recv().unwrap(), go_tx, handle)
}

#[test]
fn returns_beyond_the_limit_are_dropped() {
    let (recycler, counters) = tracked(RecyclerConfig {
        max_queues_per_thread: 1,
        ..RecyclerConfig::with_max_capacity(16)
    });

    let (first, go_first, first_owner) = owner(recycler.clone());
    let (second, go_second, second_owner) = owner(recycler.clone());
    let first_serial = first.serial;

    assert_eq!(recycler.release(first).ok(), Some(true));
    assert_eq!(counters.dropped(), 0);
    assert_eq!(recycler.release(second).ok(), Some(true));
    assert_eq!(counters.dropped(), 1);

    go_first.send(()).unwrap();
    go_second.send(()).unwrap();
    let (serial, stats) = first_owner.join().unwrap();
    assert_eq!(serial, first_serial);
    assert_eq!(stats.hits, 1);
    let (_, stats) = second_owner.join().unwrap();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
}

#[test]
fn zero_queue_limit_disables_cross_thread_recycling() {
    let (recycler, counters) = tracked(RecyclerConfig {
        max_queues_per_thread: 0,
        ..RecyclerConfig::with_max_capacity(16)
    });

    let value = recycler.acquire();
    let releaser = recycler.clone();
    thread::spawn(move || {
        assert_eq!(releaser.release(value).ok(), Some(true));
    })
    .join()
    .unwrap();
    assert_eq!(counters.dropped(), 1);

    let _ = recycler.acquire();
    assert_eq!(recycler.local_stats().scavenged, 0);
    assert_eq!(counters.built(), 2);
}
