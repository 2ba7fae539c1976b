//! Thread-affine object recycling.
//!
//! ## Scope
//! A [`Recycler`] hands out reusable instances of a value type with no
//! allocation and no atomic read-modify-write on the common path. Values can
//! be released from any thread; a value released away from the thread that
//! issued it travels back through a lock-free single-producer queue.
//!
//! ## Key invariants
//! - Each thread's pool holds at most `max_capacity_per_thread` idle values.
//!   Excess releases drop the incoming value.
//! - Recycling is one-shot per checkout. A second recycle of the same checkout
//!   is rejected with [`DoubleRecycleError`] and hands the value back.
//! - Only the thread that owns a pool touches its free list. Foreign threads
//!   only append to their own return queue toward it.
//! - A pool never waits on another thread. Returns from a thread that has
//!   exited are drained once and the queue is unlinked.
//!
//! ## Flow
//! `acquire`: free list pop -> scavenge return queues -> construct.
//!
//! `release`: owning thread -> free list push; foreign thread -> return queue.
//!
//! ## Notable entry points
//! - [`Recycler`] / [`RecyclerConfig`]: the pool and its sizing.
//! - [`Recyclable`] / [`Ticket`]: what a pooled value carries.
//! - [`Lease`]: drop-to-recycle guard. [`Recycled`]: wrapper for plain values.
//! - [`LocalStats`]: per-thread counters.

pub mod config;
pub mod error;
mod identity;
mod recycler;
pub mod stats;
#[cfg(test)]
pub mod test_utils;

pub use config::{
    RecyclerConfig, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY_PER_THREAD, MAX_CAPACITY_LIMIT,
};
pub use error::{ConfigError, DoubleRecycleError};
pub use recycler::{Lease, Recyclable, Recycled, Recycler, Ticket};
pub use stats::LocalStats;
