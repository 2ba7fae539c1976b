//! Error types.
//!
//! Only two conditions are errors here. A double recycle is a use-after-recycle
//! bug in the caller and is always surfaced. An invalid configuration is
//! rejected when the recycler is built. Capacity drops and foreign tickets are
//! expected steady-state outcomes and are reported through return values and
//! stats instead.

use std::fmt;

use thiserror::Error;

/// A value was recycled twice within one checkout.
///
/// The rejected value is handed back untouched; the pool is not modified by
/// the failed call.
#[derive(Error)]
#[error("value was already recycled; recycling is one-shot per acquire")]
pub struct DoubleRecycleError<T> {
    value: T,
}

impl<T> DoubleRecycleError<T> {
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns the value whose recycle was rejected.
    pub fn into_inner(self) -> T {
        self.value
    }
}

// Manual impl so `T` does not need to be `Debug`.
impl<T> fmt::Debug for DoubleRecycleError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoubleRecycleError").finish_non_exhaustive()
    }
}

/// Invalid `RecyclerConfig`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_capacity_per_thread` is above the supported limit.
    #[error("max_capacity_per_thread ({requested}) exceeds the limit of {limit}")]
    CapacityTooLarge { requested: usize, limit: usize },

    /// `initial_capacity` is above the supported limit.
    #[error("initial_capacity ({requested}) exceeds the limit of {limit}")]
    InitialCapacityTooLarge { requested: usize, limit: usize },
}
