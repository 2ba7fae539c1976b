//! Recycling the same checkout twice, on one thread or across threads.

use std::thread;

use recycler_rs::{Recyclable, Recycled, Recycler};

#[test]
fn same_thread_double_recycle_hands_the_value_back() {
    super::init_tracing();
    let recycler = Recycler::wrapping(8, || 0u32);
    let value = recycler.acquire();
    let twin = Recycled::new(42u32, value.ticket().clone());

    assert_eq!(recycler.release(value).ok(), Some(true));
    let err = recycler.release(twin).unwrap_err();
    assert_eq!(*err.into_inner(), 42);
    assert_eq!(recycler.local_stats().pooled, 1);
}

#[test]
fn cross_thread_double_recycle_is_rejected() {
    super::init_tracing();
    let recycler = Recycler::wrapping(8, || 0u32);
    let value = recycler.acquire();
    let twin = Recycled::new(7u32, value.ticket().clone());

    let releaser = recycler.clone();
    let rejected = thread::spawn(move || {
        assert_eq!(releaser.release(value).ok(), Some(true));
        releaser.release(twin).err().map(|err| *err.into_inner())
    })
    .join()
    .unwrap();
    assert_eq!(rejected, Some(7));

    let back = recycler.acquire();
    assert_eq!(*back, 0);
    assert_eq!(recycler.local_stats().scavenged, 1);
}

#[test]
fn rejected_foreign_double_recycle_registers_no_queue() {
    super::init_tracing();
    let recycler = Recycler::wrapping(8, || 0u32);
    let value = recycler.acquire();
    let twin = Recycled::new(3u32, value.ticket().clone());
    assert_eq!(recycler.release(value).ok(), Some(true));

    let before = recycler.local_stats();
    let releaser = recycler.clone();
    let rejected = thread::spawn(move || releaser.release(twin).err().map(|err| *err.into_inner()))
        .join()
        .unwrap();
    assert_eq!(rejected, Some(3));

    // No return queue was registered toward the owner's pool.
    let after = recycler.local_stats();
    assert_eq!(after, before);
    assert_eq!(after.return_queues, 0);

    // Nothing was queued for the owner to scavenge.
    let back = recycler.acquire();
    assert_eq!(*back, 0);
    assert_eq!(recycler.local_stats().scavenged, 0);
}

#[test]
fn racing_recycles_accept_exactly_one() {
    super::init_tracing();
    let recycler = Recycler::wrapping(8, || 0u32);
    for _ in 0..50 {
        let value = recycler.acquire();
        let twin = Recycled::new(1u32, value.ticket().clone());

        let a = {
            let recycler = recycler.clone();
            thread::spawn(move || recycler.release(value).is_ok())
        };
        let b = {
            let recycler = recycler.clone();
            thread::spawn(move || recycler.release(twin).is_ok())
        };
        let accepted = [a.join().unwrap(), b.join().unwrap()];
        assert_eq!(accepted.iter().filter(|ok| **ok).count(), 1);
    }
}
