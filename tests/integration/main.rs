//! Integration tests for recycler-rs cross-thread behavior.
//!
//! Run with: `cargo test --test integration`

mod cross_thread;
mod double_recycle;
mod partial_transfer;
mod queue_limit;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use recycler_rs::{Recyclable, Recycler, RecyclerConfig, Ticket};

/// Routes recycler logs to the test harness. Safe to call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Pooled value that records its construction serial and its drop.
pub(crate) struct Tracked {
    pub serial: usize,
    drops: Arc<AtomicUsize>,
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
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

/// Construction and drop counters shared by every `Tracked` of one recycler.
#[derive(Clone, Default)]
pub(crate) struct Counters {
    built: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl Counters {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub(crate) fn tracked(config: RecyclerConfig) -> (Recycler<Tracked>, Counters) {
    init_tracing();
    let counters = Counters::default();
    let built = counters.built.clone();
    let dropped = counters.dropped.clone();
    let recycler = Recycler::with_config(config, move |ticket| Tracked {
        serial: built.fetch_add(1, Ordering::Relaxed),
        drops: dropped.clone(),
        ticket,
    })
    .expect("valid config");
    (recycler, counters)
}

pub(crate) fn tracked_with_capacity(max: usize) -> (Recycler<Tracked>, Counters) {
    tracked(RecyclerConfig::with_max_capacity(max))
}
