//! Tickets and the recycle protocol.
//!
//! # State machine
//!
//! ```text
//!             acquire()                 release()
//!   Idle ───────────────▶ Checked-out ───────────────▶ Recycling ──▶ Idle
//!  (in a pool)           ids == (0, 0)   same thread: (own, own) pushed
//!                                        foreign:     (0, queue)  queued
//!                                                     (queue, queue) on transfer
//! ```
//!
//! `last_recycle_id` is the one-shot gate: every recycle must move it from 0 to
//! a non-zero marker with a compare-exchange. A second recycle of the same
//! checkout (from any thread, through any clone of the ticket) loses that race
//! and is rejected with `DoubleRecycleError`.
//!
//! # Owner reference in transit
//!
//! A value queued for a foreign-thread return has its owner reference cleared
//! before it is published into a segment, and the consumer re-attaches it when
//! it transfers the value into the pool. The queue is reachable from the pool
//! handle, so a queued value holding the handle would form a reference cycle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::local_pool::{self, PoolHandle};
use super::return_queue;
use crate::error::DoubleRecycleError;
use crate::identity::current_thread_token;

/// Marker stored in `last_recycle_id` when a recycled value is dropped by
/// policy instead of queued (owner gone, queue limit reached).
pub(crate) const DROPPED_MARKER: u64 = u64::MAX;

/// A value type that carries its own [`Ticket`] and can be pooled.
///
/// Implementors hand the ticket given to the constructor callback back through
/// [`ticket`](Recyclable::ticket) and [`ticket_mut`](Recyclable::ticket_mut).
pub trait Recyclable: Sized + Send + 'static {
    /// The ticket this value was constructed with.
    fn ticket(&self) -> &Ticket<Self>;

    /// Mutable access to the ticket. Only the recycler mutates it.
    fn ticket_mut(&mut self) -> &mut Ticket<Self>;

    /// Clears per-use state before the value becomes available again.
    ///
    /// Runs on the releasing thread, after the recycle has been accepted.
    fn reset(&mut self) {}

    /// Returns this value to the pool that issued it.
    ///
    /// Same contract as [`Recycler::release`](crate::Recycler::release),
    /// without naming the recycler.
    fn recycle(self) -> Result<bool, DoubleRecycleError<Self>> {
        recycle(self)
    }
}

/// Shared recycle markers. Clones of a ticket share one of these.
struct RecycleState {
    recycle_id: AtomicU64,
    last_recycle_id: AtomicU64,
}

/// Capability bound to one pooled value; tracks its recycle state.
///
/// A ticket without an owner is the unpooled sentinel: recycling a value that
/// carries it is a no-op that reports `false`.
pub struct Ticket<T> {
    state: Option<Arc<RecycleState>>,
    owner: Option<Arc<PoolHandle<T>>>,
}

impl<T> Ticket<T> {
    /// A sentinel ticket for values that are not pooled.
    pub fn unpooled() -> Self {
        Self {
            state: None,
            owner: None,
        }
    }

    /// Fresh ticket owned by `owner`, in the checked-out state.
    pub(crate) fn issue(owner: Arc<PoolHandle<T>>) -> Self {
        Self {
            state: Some(Arc::new(RecycleState {
                recycle_id: AtomicU64::new(0),
                last_recycle_id: AtomicU64::new(0),
            })),
            owner: Some(owner),
        }
    }

    /// Whether this ticket belongs to a pool (is not the sentinel).
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.state.is_some()
    }

    /// Whether the value is currently checked out (not recycled yet).
    ///
    /// Always `false` for the sentinel.
    pub fn is_checked_out(&self) -> bool {
        match &self.state {
            Some(state) => {
                state.last_recycle_id.load(Ordering::Acquire) == 0
                    && state.recycle_id.load(Ordering::Relaxed) == 0
            }
            None => false,
        }
    }

    #[inline]
    pub(crate) fn owner(&self) -> Option<&Arc<PoolHandle<T>>> {
        self.owner.as_ref()
    }

    /// Id of the recycler whose pool issued this ticket, if any.
    #[inline]
    pub(crate) fn owner_recycler_id(&self) -> Option<u64> {
        self.owner.as_ref().map(|owner| owner.recycler_id())
    }

    #[inline]
    pub(crate) fn detach_owner(&mut self) -> Option<Arc<PoolHandle<T>>> {
        self.owner.take()
    }

    #[inline]
    pub(crate) fn attach_owner(&mut self, owner: Arc<PoolHandle<T>>) {
        debug_assert!(self.owner.is_none(), "ticket re-attached while owned");
        self.owner = Some(owner);
    }

    /// Same-thread recycle: checked-out -> (marker, marker).
    ///
    /// Returns `false` without touching state if the value is not checked out.
    #[inline]
    pub(crate) fn try_mark_recycled_local(&self, marker: u64) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        if state.recycle_id.load(Ordering::Relaxed) != 0 {
            return false;
        }
        if state
            .last_recycle_id
            .compare_exchange(0, marker, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        state.recycle_id.store(marker, Ordering::Relaxed);
        true
    }

    /// Foreign-thread recycle: checked-out -> (0, marker).
    ///
    /// `recycle_id` stays 0 until the owning thread transfers the value.
    #[inline]
    pub(crate) fn try_mark_recycled_foreign(&self, marker: u64) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        state
            .last_recycle_id
            .compare_exchange(0, marker, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Retags a foreign recycle that won the gate with `DROPPED_MARKER` once
    /// the value is known to be queued: (0, dropped) -> (0, q).
    ///
    /// Only the thread that won the compare-exchange may call this.
    #[inline]
    pub(crate) fn retag_queued(&self, queue_id: u64) {
        if let Some(state) = &self.state {
            debug_assert_eq!(
                state.last_recycle_id.load(Ordering::Relaxed),
                DROPPED_MARKER,
                "retagged a recycle this thread did not claim"
            );
            state.last_recycle_id.store(queue_id, Ordering::Release);
        }
    }

    /// Owning thread adopted a queued value: (0, q) -> (q, q).
    #[inline]
    pub(crate) fn mark_transferred(&self) {
        if let Some(state) = &self.state {
            let last = state.last_recycle_id.load(Ordering::Acquire);
            debug_assert_ne!(last, 0, "transferred a value that was never recycled");
            debug_assert_eq!(
                state.recycle_id.load(Ordering::Relaxed),
                0,
                "value recycled on its owning thread while queued"
            );
            state.recycle_id.store(last, Ordering::Relaxed);
        }
    }

    /// Value leaves the pool: (x, x) -> (0, 0).
    #[inline]
    pub(crate) fn mark_checked_out(&self) {
        if let Some(state) = &self.state {
            debug_assert_eq!(
                state.recycle_id.load(Ordering::Relaxed),
                state.last_recycle_id.load(Ordering::Relaxed),
                "pooled value recycled more than once"
            );
            state.recycle_id.store(0, Ordering::Relaxed);
            state.last_recycle_id.store(0, Ordering::Release);
        }
    }
}

impl<T> Clone for Ticket<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            owner: self.owner.clone(),
        }
    }
}

impl<T> Default for Ticket<T> {
    fn default() -> Self {
        Self::unpooled()
    }
}

impl<T> fmt::Debug for Ticket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("pooled", &self.is_pooled())
            .field("checked_out", &self.is_checked_out())
            .field("pool", &self.owner.as_ref().map(|owner| owner.id()))
            .finish()
    }
}

// ============================================================================
// Recycle protocol
// ============================================================================

/// Returns `value` to the pool named by its ticket.
///
/// - `Ok(false)`: sentinel ticket or no owner; the value is dropped.
/// - `Ok(true)`: accepted. The value is pooled, queued for its owning thread,
///   or dropped by capacity policy.
/// - `Err`: the checkout was already recycled; the value comes back unchanged.
pub(crate) fn recycle<T: Recyclable>(mut value: T) -> Result<bool, DoubleRecycleError<T>> {
    let Some(owner) = value.ticket().owner().cloned() else {
        return Ok(false);
    };

    if owner.owner_thread() != current_thread_token() {
        return return_queue::push_foreign(&owner, value);
    }

    if !value.ticket().try_mark_recycled_local(owner.recycler_id()) {
        return Err(DoubleRecycleError::new(value));
    }
    value.reset();
    local_pool::push_local(&owner, value);
    Ok(true)
}
