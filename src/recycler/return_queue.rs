//! Cross-thread return path.
//!
//! # Design
//!
//! A return queue carries values recycled on a foreign thread back to the pool
//! of the thread that issued them. There is exactly one queue per
//! (pool, foreign thread) pair, so every queue is single-producer /
//! single-consumer and needs no lock:
//!
//! ```text
//!   foreign thread                          owning thread
//!   ──────────────                          ─────────────
//!   ReturnRegistry (thread-local)           LocalPool
//!     pool id ─▶ ReturnProducer ─┐            queues: [ReturnConsumer, ..]
//!                                │                          │
//!                      tail ─────┴─▶ [Segment]─▶[Segment] ◀─┴── head
//! ```
//!
//! The producer half lives in the foreign thread's registry and appends to
//! the tail segment. The consumer half is handed to the owning pool through
//! the pool handle's registration queue and reads from the head segment
//! during scavenging.
//!
//! # Liveness
//!
//! The registry owns a `ThreadLiveness` flag and clears it when the foreign
//! thread tears its thread-locals down. A consumer that observes the flag
//! cleared knows no further value will ever be published, drains what is
//! left in one pass, and unlinks itself.
//!
//! The registry refers to pools only through `Weak` handles; it never keeps a
//! pool or its owning thread alive.

use std::any::Any;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use tracing::debug;

use super::local_pool::{FreeStack, PoolHandle};
use super::segment::Segment;
use super::ticket::{Recyclable, DROPPED_MARKER};
use crate::error::DoubleRecycleError;
use crate::identity::{next_id, ThreadLiveness};

// ============================================================================
// Queue halves
// ============================================================================

/// Creates a queue for returns to `owner`, written by the thread observed by
/// `producer_liveness`.
pub(crate) fn return_queue<T>(
    owner: &Arc<PoolHandle<T>>,
    producer_liveness: Arc<ThreadLiveness>,
) -> (ReturnProducer<T>, ReturnConsumer<T>) {
    let id = next_id();
    let segment = Arc::new(Segment::new());
    let producer = ReturnProducer {
        id,
        recycler_id: owner.recycler_id(),
        pool: Arc::downgrade(owner),
        tail: Some(segment.clone()),
    };
    let consumer = ReturnConsumer {
        id,
        head: segment,
        producer: producer_liveness,
    };
    (producer, consumer)
}

/// Producer half, owned by the foreign thread's registry.
pub(crate) struct ReturnProducer<T> {
    id: u64,
    recycler_id: u64,
    pool: Weak<PoolHandle<T>>,
    /// `None` when the per-thread queue limit refused this pool; returns to it
    /// are dropped.
    tail: Option<Arc<Segment<T>>>,
}

impl<T> ReturnProducer<T> {
    fn refused(owner: &Arc<PoolHandle<T>>) -> Self {
        Self {
            id: DROPPED_MARKER,
            recycler_id: owner.recycler_id(),
            pool: Arc::downgrade(owner),
            tail: None,
        }
    }

    /// Marker recorded in a ticket routed through this producer.
    #[inline]
    fn marker(&self) -> u64 {
        self.id
    }

    /// Appends to the tail segment, linking a new one when it is full.
    ///
    /// Returns the value back only for a refused producer.
    pub(crate) fn add(&mut self, value: T) -> Result<(), T> {
        let Some(tail) = self.tail.as_ref() else {
            return Err(value);
        };
        // SAFETY: this producer is the only writer of its tail segment; the
        // registry is thread-local and holds one producer per pool.
        let value = match unsafe { tail.try_push(value) } {
            Ok(()) => return Ok(()),
            Err(value) => value,
        };

        let next = Arc::new(Segment::new());
        // SAFETY: `next` is not shared yet.
        let pushed = unsafe { next.try_push(value) };
        debug_assert!(pushed.is_ok(), "fresh segment rejected a value");
        tail.link(next.clone());
        self.tail = Some(next);
        Ok(())
    }
}

/// Consumer half, linked into the owning thread's pool.
pub(crate) struct ReturnConsumer<T> {
    id: u64,
    head: Arc<Segment<T>>,
    producer: Arc<ThreadLiveness>,
}

impl<T> ReturnConsumer<T> {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Whether the producing thread may still publish values.
    #[inline]
    pub(crate) fn producer_alive(&self) -> bool {
        self.producer.is_alive()
    }

    /// Values published to the head segment and not yet transferred.
    ///
    /// Does not look past the head segment.
    #[cfg(test)]
    pub(crate) fn head_pending(&self) -> usize {
        self.head.pending()
    }
}

impl<T: Recyclable> ReturnConsumer<T> {
    /// Moves as many values from the head segment into `dst` as fit.
    ///
    /// Reads at most one segment per call. A fully read head segment is
    /// discarded as soon as its successor is linked. Returns the number of
    /// values moved.
    pub(crate) fn transfer(&mut self, dst: &mut FreeStack<T>) -> usize {
        if self.head.is_consumed() {
            match self.head.next() {
                Some(next) => self.head = next.clone(),
                None => return 0,
            }
        }

        let room = dst.remaining();
        if room == 0 {
            return 0;
        }
        let available = self.head.pending();
        if available == 0 {
            return 0;
        }

        // Only the prefix that fits moves; the read cursor advances by exactly
        // that much and the rest waits for the next scavenge.
        let batch = available.min(room);
        dst.reserve(batch);
        // SAFETY: the consumer half is owned by exactly one pool, and only
        // the pool's owning thread calls `transfer`.
        let moved = unsafe { self.head.drain_into(batch, |value| dst.adopt(value)) };

        if self.head.is_consumed() {
            if let Some(next) = self.head.next() {
                self.head = next.clone();
            }
        }
        moved
    }
}

// ============================================================================
// Foreign-thread registry
// ============================================================================

/// Type-erased view of a `ReturnProducer<T>` stored in the registry.
trait ProducerSlot {
    fn recycler_id(&self) -> u64;
    /// Whether this slot holds a live queue (not a refusal marker).
    fn holds_queue(&self) -> bool;
    /// The target pool is gone or its owning thread has exited.
    fn is_orphaned(&self) -> bool;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> ProducerSlot for ReturnProducer<T> {
    fn recycler_id(&self) -> u64 {
        self.recycler_id
    }

    fn holds_queue(&self) -> bool {
        self.tail.is_some()
    }

    fn is_orphaned(&self) -> bool {
        match self.pool.upgrade() {
            Some(pool) => !pool.is_alive(),
            None => true,
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-thread table of producer halves, keyed by target pool id.
struct ReturnRegistry {
    liveness: Arc<ThreadLiveness>,
    slots: AHashMap<u64, Box<dyn ProducerSlot>>,
}

impl ReturnRegistry {
    fn new() -> Self {
        Self {
            liveness: Arc::new(ThreadLiveness::new()),
            slots: AHashMap::new(),
        }
    }

    /// Creates the producer for `owner`, or a refusal marker when this thread
    /// already feeds `max_queues_per_thread` pools of the same recycler.
    ///
    /// Orphaned slots are moved to `retired` so the caller can drop them
    /// (and the values they hold) after releasing the registry borrow.
    fn register<T: Recyclable>(
        &mut self,
        owner: &Arc<PoolHandle<T>>,
        retired: &mut Vec<Box<dyn ProducerSlot>>,
    ) {
        let orphaned: Vec<u64> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_orphaned())
            .map(|(&pool_id, _)| pool_id)
            .collect();
        for pool_id in orphaned {
            if let Some(slot) = self.slots.remove(&pool_id) {
                retired.push(slot);
            }
        }

        let feeding = self
            .slots
            .values()
            .filter(|slot| slot.holds_queue() && slot.recycler_id() == owner.recycler_id())
            .count();

        let slot: Box<dyn ProducerSlot> = if feeding >= owner.max_queues_per_thread() {
            debug!(
                recycler_id = owner.recycler_id(),
                pool_id = owner.id(),
                limit = owner.max_queues_per_thread(),
                "return queue limit reached; cross-thread returns to this pool will be dropped"
            );
            Box::new(ReturnProducer::refused(owner))
        } else {
            let (producer, consumer) = return_queue(owner, self.liveness.clone());
            debug!(
                recycler_id = owner.recycler_id(),
                pool_id = owner.id(),
                queue_id = producer.id,
                "registered return queue"
            );
            owner.register_queue(consumer);
            Box::new(producer)
        };
        self.slots.insert(owner.id(), slot);
    }

    /// Resolves where a value recycled to `owner` goes, registering a queue
    /// on first contact. Never runs user code; orphaned slots that must be
    /// dropped are handed back in the route.
    fn route<T: Recyclable>(&mut self, owner: &Arc<PoolHandle<T>>) -> Route {
        let mut retired = Vec::new();

        if !owner.is_alive() {
            if let Some(stale) = self.slots.remove(&owner.id()) {
                retired.push(stale);
            }
            return Route::dropped(retired);
        }

        if !self.slots.contains_key(&owner.id()) {
            self.register(owner, &mut retired);
        }

        match self.producer_mut::<T>(owner.id()) {
            Some(producer) => Route {
                marker: producer.marker(),
                queued: producer.tail.is_some(),
                retired,
            },
            None => Route::dropped(retired),
        }
    }

    /// Appends `value` to the queue feeding `pool_id`. Hands the value back if
    /// the slot vanished or refuses values.
    fn publish<T: Recyclable>(&mut self, pool_id: u64, value: T) -> Option<T> {
        match self.producer_mut::<T>(pool_id) {
            Some(producer) => producer.add(value).err(),
            None => Some(value),
        }
    }

    fn producer_mut<T: Recyclable>(&mut self, pool_id: u64) -> Option<&mut ReturnProducer<T>> {
        self.slots
            .get_mut(&pool_id)
            .and_then(|slot| slot.as_any_mut().downcast_mut::<ReturnProducer<T>>())
    }
}

impl Drop for ReturnRegistry {
    fn drop(&mut self) {
        // Everything this thread published is ordered before this store.
        self.liveness.mark_dead();
    }
}

/// Outcome of `ReturnRegistry::route`.
struct Route {
    /// Marker to record in the ticket's `last_recycle_id`.
    marker: u64,
    /// Whether the value should be published (otherwise it is dropped).
    queued: bool,
    retired: Vec<Box<dyn ProducerSlot>>,
}

impl Route {
    fn dropped(retired: Vec<Box<dyn ProducerSlot>>) -> Self {
        Self {
            marker: DROPPED_MARKER,
            queued: false,
            retired,
        }
    }
}

thread_local! {
    static RETURN_QUEUES: RefCell<ReturnRegistry> = RefCell::new(ReturnRegistry::new());
}

/// Recycles `value` from a thread other than its pool's owner.
///
/// The one-shot gate is claimed before the registry is touched, so a rejected
/// double recycle leaves this thread's queues untouched. Values whose owner
/// has exited, or that this thread is not allowed to queue (queue limit,
/// thread teardown), are dropped and still reported as accepted.
///
/// User code (`reset`, `Drop`) only runs while the registry is not borrowed,
/// so it may itself recycle values on this thread.
pub(crate) fn push_foreign<T: Recyclable>(
    owner: &Arc<PoolHandle<T>>,
    mut value: T,
) -> Result<bool, DoubleRecycleError<T>> {
    if !value.ticket().try_mark_recycled_foreign(DROPPED_MARKER) {
        return Err(DoubleRecycleError::new(value));
    }

    let route = RETURN_QUEUES
        .try_with(|registry| {
            registry
                .try_borrow_mut()
                .ok()
                .map(|mut registry| registry.route(owner))
        })
        .ok()
        .flatten();
    let Some(route) = route else {
        // Registry torn down or re-entered; nowhere to queue.
        drop(value);
        return Ok(true);
    };
    drop(route.retired);
    if !route.queued {
        drop(value);
        return Ok(true);
    }

    value.ticket().retag_queued(route.marker);
    value.reset();
    // Cleared before publication; the owning thread re-attaches it on
    // transfer.
    let _detached = value.ticket_mut().detach_owner();

    let pool_id = owner.id();
    let leftover = RETURN_QUEUES.try_with(|registry| match registry.try_borrow_mut() {
        Ok(mut registry) => registry.publish(pool_id, value),
        Err(_) => Some(value),
    });
    if let Ok(Some(value)) = leftover {
        drop(value);
    }
    Ok(true)
}
