//! Per-thread pool counters.
//!
//! Counters live inside the thread-local pool and are only ever touched by
//! the owning thread, so they are plain integers rather than atomics. All
//! counters saturate instead of wrapping; they are displayed to operators, and
//! clamping at `MAX` is safer than silent wrap-around.

/// Saturating increment for a `u64` counter.
#[inline(always)]
pub(crate) fn sat_inc(counter: &mut u64) {
    *counter = counter.saturating_add(1);
}

/// Saturating add for a `u64` counter.
#[inline(always)]
pub(crate) fn sat_add(counter: &mut u64, delta: usize) {
    *counter = counter.saturating_add(delta as u64);
}

/// Snapshot of the calling thread's pool for one recycler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalStats {
    /// Acquires served from the free list (including after a scavenge).
    pub hits: u64,
    /// Acquires that had to construct a new value.
    pub misses: u64,
    /// Values dropped because the free list was at capacity.
    pub drops: u64,
    /// Values moved in from cross-thread return queues.
    pub scavenged: u64,
    /// Values currently idle in the free list.
    pub pooled: usize,
    /// Return queues currently linked to this pool.
    pub return_queues: usize,
}

impl LocalStats {
    /// Fraction of acquires served without constructing (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits.saturating_add(self.misses);
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
