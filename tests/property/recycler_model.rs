//! Random acquire/release sequences against a conservation model.
//!
//! An owner thread acquires and releases locally; a helper thread that stays
//! alive for the whole case releases values handed to it, so its return queue
//! is scavenged rather than drained as dead. Whatever the interleaving, no
//! value may be handed out twice, the pool never exceeds its bound, and every
//! value ever built is accounted for.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use recycler_rs::{Recyclable, Recycler, Ticket};

struct Tracked {
    serial: usize,
    dropped: Arc<AtomicUsize>,
    ticket: Ticket<Tracked>,
}

impl Recyclable for Tracked {
    fn ticket(&self) -> &Ticket<Self> {
        &self.ticket
    }
    fn ticket_mut(&mut self) -> &mut Ticket<Self> {
        &mut self.ticket
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug)]
enum Op {
    Acquire,
    ReleaseLocal(usize),
    ReleaseForeign(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        2 => any::<usize>().prop_map(Op::ReleaseLocal),
        2 => any::<usize>().prop_map(Op::ReleaseForeign),
    ]
}

/// Helper thread that releases whatever it is sent and acknowledges.
struct ForeignReleaser {
    tx: Option<mpsc::Sender<Tracked>>,
    ack: mpsc::Receiver<Option<bool>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ForeignReleaser {
    fn spawn(recycler: Recycler<Tracked>) -> Self {
        let (tx, rx) = mpsc::channel::<Tracked>();
        let (ack_tx, ack) = mpsc::channel();
        let handle = thread::spawn(move || {
            for value in rx {
                if ack_tx.send(recycler.release(value).ok()).is_err() {
                    break;
                }
            }
        });
        Self {
            tx: Some(tx),
            ack,
            handle: Some(handle),
        }
    }

    fn release(&self, value: Tracked) -> Option<bool> {
        self.tx.as_ref()?.send(value).ok()?;
        self.ack.recv().ok().flatten()
    }
}

impl Drop for ForeignReleaser {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cross_thread_conservation(
        max in 1usize..24,
        ops in proptest::collection::vec(op_strategy(), 1..160),
    ) {
        let built = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let recycler = {
            let built = built.clone();
            let dropped = dropped.clone();
            Recycler::new(max, move |ticket| Tracked {
                serial: built.fetch_add(1, Ordering::Relaxed),
                dropped: dropped.clone(),
                ticket,
            })
        };
        let foreign = ForeignReleaser::spawn(recycler.clone());
        let mut held: Vec<Tracked> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire => held.push(recycler.acquire()),
                Op::ReleaseLocal(pick) if !held.is_empty() => {
                    let value = held.swap_remove(pick % held.len());
                    prop_assert_eq!(recycler.release(value).ok(), Some(true));
                }
                Op::ReleaseForeign(pick) if !held.is_empty() => {
                    let value = held.swap_remove(pick % held.len());
                    prop_assert_eq!(foreign.release(value), Some(true));
                }
                Op::ReleaseLocal(_) | Op::ReleaseForeign(_) => {}
            }

            let unique: HashSet<usize> = held.iter().map(|v| v.serial).collect();
            prop_assert_eq!(unique.len(), held.len(), "value handed out twice");

            let stats = recycler.local_stats();
            prop_assert!(stats.pooled <= max);

            let live = built.load(Ordering::Relaxed) - dropped.load(Ordering::Relaxed);
            prop_assert!(
                live >= held.len() + stats.pooled,
                "live {} < held {} + pooled {}",
                live,
                held.len(),
                stats.pooled
            );
        }

        drop(foreign);
        drop(held);
        drop(recycler);
        prop_assert_eq!(built.load(Ordering::Relaxed), dropped.load(Ordering::Relaxed));
    }
}
