//! Recycler configuration.
//!
//! # Sizing Guidelines
//!
//! - `max_capacity_per_thread`: bound on idle values each thread keeps. Peak
//!   idle memory is roughly `threads * max_capacity_per_thread * size_of::<T>()`.
//! - `initial_capacity`: backing array size allocated when a thread's pool is
//!   created. The array doubles on demand up to the maximum.
//! - `max_queues_per_thread`: how many distinct pools of one recycler a single
//!   thread will queue cross-thread returns for.
//!
//! # Configuration Tradeoffs
//!
//! | Config | Consequence |
//! |--------|-------------|
//! | `max_capacity_per_thread == 0` | Pooling disabled; every acquire constructs |
//! | `max_queues_per_thread == 0` | Cross-thread returns are always dropped |
//! | large `initial_capacity` | Fewer regrowths, more memory per idle thread |

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default `max_capacity_per_thread`.
pub const DEFAULT_MAX_CAPACITY_PER_THREAD: usize = 4 * 1024;

/// Default `initial_capacity`.
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;

/// Largest accepted `max_capacity_per_thread` / `initial_capacity`.
pub const MAX_CAPACITY_LIMIT: usize = 1 << 30;

/// Configuration for a [`Recycler`](crate::Recycler).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecyclerConfig {
    /// Maximum idle values kept per thread. `0` disables pooling.
    pub max_capacity_per_thread: usize,

    /// Backing array size allocated when a thread's pool is created.
    ///
    /// Clamped to `max_capacity_per_thread`.
    pub initial_capacity: usize,

    /// Maximum number of pools of one recycler a single thread queues
    /// cross-thread returns for. Returns to further pools are dropped.
    pub max_queues_per_thread: usize,
}

impl RecyclerConfig {
    /// Default configuration with the given per-thread capacity.
    pub fn with_max_capacity(max_capacity_per_thread: usize) -> Self {
        Self {
            max_capacity_per_thread,
            ..Self::default()
        }
    }

    /// Validate configuration.
    ///
    /// # Invariants Checked
    ///
    /// - `max_capacity_per_thread <= MAX_CAPACITY_LIMIT`
    /// - `initial_capacity <= MAX_CAPACITY_LIMIT`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_capacity_per_thread > MAX_CAPACITY_LIMIT {
            return Err(ConfigError::CapacityTooLarge {
                requested: self.max_capacity_per_thread,
                limit: MAX_CAPACITY_LIMIT,
            });
        }
        if self.initial_capacity > MAX_CAPACITY_LIMIT {
            return Err(ConfigError::InitialCapacityTooLarge {
                requested: self.initial_capacity,
                limit: MAX_CAPACITY_LIMIT,
            });
        }
        Ok(())
    }

    /// Whether pooling is enabled at all.
    #[inline]
    pub fn pooling_enabled(&self) -> bool {
        self.max_capacity_per_thread > 0
    }

    /// `initial_capacity` clamped to `max_capacity_per_thread`.
    #[inline]
    pub fn effective_initial_capacity(&self) -> usize {
        self.initial_capacity.min(self.max_capacity_per_thread)
    }
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_capacity_per_thread: DEFAULT_MAX_CAPACITY_PER_THREAD,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_queues_per_thread: parallelism.saturating_mul(2),
        }
    }
}
