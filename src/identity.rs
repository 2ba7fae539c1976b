//! Thread tokens, thread liveness, and id generation.
//!
//! # Purpose
//!
//! The recycler needs three small identity primitives:
//! - A per-thread token so a released value can tell whether it is being
//!   returned on the thread that owns its pool (`current_thread_token`).
//! - A liveness flag a thread clears during its own teardown, so other
//!   threads can observe "that thread is gone" without keeping it alive
//!   (`ThreadLiveness`).
//! - A process-wide source of non-zero ids for recyclers, pools, and return
//!   queues (`next_id`).
//!
//! # Correctness Invariant
//!
//! Thread tokens are never reused. Reuse would let two threads both believe
//! they own the same pool, and only the owner may touch a pool's free list.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Token reported for a thread whose thread-local state is already gone.
///
/// No pool is ever owned by this token, so such a thread always takes the
/// cross-thread path.
pub(crate) const NO_THREAD: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = {
        let next = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        // A wrapped counter would hand out NO_THREAD and then repeat tokens.
        if next == NO_THREAD {
            panic!("recycler: thread token space exhausted");
        }
        next
    };
}

/// Token of the calling thread.
///
/// # Performance
///
/// Single thread-local read after the first call. No atomics on the hot path.
#[inline]
pub(crate) fn current_thread_token() -> u64 {
    THREAD_TOKEN.try_with(|t| *t).unwrap_or(NO_THREAD)
}

/// Next process-wide id. Never returns 0.
///
/// Recycler ids double as the "recycled on the owning thread" marker and
/// queue ids as the "recycled through this queue" marker, so both must stay
/// distinct from the checked-out value 0.
#[inline]
pub(crate) fn next_id() -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    assert!(id != 0, "recycler: id space exhausted");
    id
}

// ============================================================================
// Liveness
// ============================================================================

/// Observation handle for a thread's lifetime.
///
/// Shared between the observed thread (which clears it on teardown) and any
/// number of observers. Holding one does not keep the thread alive.
#[derive(Debug)]
pub(crate) struct ThreadLiveness {
    alive: AtomicBool,
}

impl ThreadLiveness {
    pub(crate) fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    /// Returns `false` once the observed thread has torn down.
    ///
    /// Acquire pairs with the Release in `mark_dead`: once this returns
    /// `false`, every write the thread published before teardown is visible.
    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Called exactly once, by the observed thread, during its teardown.
    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}
