//! A scavenge moves only what fits and leaves the rest queued.

use std::sync::mpsc;
use std::thread;

use super::tracked_with_capacity;

#[test]
fn only_the_prefix_that_fits_is_moved() {
    let (recycler, counters) = tracked_with_capacity(5);
    let values: Vec<_> = (0..20).map(|_| recycler.acquire()).collect();
    let mut expected: Vec<usize> = values.iter().map(|v| v.serial).collect();

    let releaser = recycler.clone();
    let (done_tx, done_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let foreign = thread::spawn(move || {
        for value in values {
            assert_eq!(releaser.release(value).ok(), Some(true));
        }
        done_tx.send(()).unwrap();
        let _ = stop_rx.recv();
    });
    done_rx.recv().unwrap();

    let first = recycler.acquire();
    let stats = recycler.local_stats();
    assert_eq!(stats.scavenged, 5);
    assert_eq!(stats.pooled, 4);
    assert_eq!(stats.return_queues, 1);

    let mut seen = vec![first.serial];
    seen.extend((1..20).map(|_| recycler.acquire().serial));
    seen.sort_unstable();
    expected.sort_unstable();
    assert_eq!(seen, expected);
    assert_eq!(counters.built(), 20);
    assert_eq!(counters.dropped(), 19);

    let stats = recycler.local_stats();
    assert_eq!(stats.scavenged, 20);
    assert_eq!(stats.drops, 0);

    stop_tx.send(()).unwrap();
    foreign.join().unwrap();
}
