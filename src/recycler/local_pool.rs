//! Per-thread free list and its scavenging of cross-thread returns.
//!
//! # Design
//!
//! - **Thread-owned**: each thread keeps one `LocalPool` per recycler in a
//!   thread-local table. Only that thread ever pushes or pops, so the free
//!   list is a plain `Vec` behind a `RefCell`, with no atomics.
//! - **Shared identity**: the parts other threads need (owner token, liveness,
//!   queue registration) live in an `Arc<PoolHandle>` that tickets point to.
//! - **Bounded**: at most `max_capacity` idle values. A push into a full pool
//!   drops the incoming (youngest) value.
//! - **Scavenging**: when the free list is empty, `pop` pulls values from the
//!   return queues foreign threads have registered, resuming from where the
//!   previous scavenge stopped.
//!
//! # Re-entrancy
//!
//! No user code runs while a pool is borrowed. Values that must be dropped
//! (capacity overflow, dead queues) are handed back to the caller or parked in
//! `retired` and dropped after the borrow ends, because a value's `Drop` may
//! recycle other values on this thread.

use std::any::Any;
use std::cell::RefCell;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use crossbeam_queue::SegQueue;
use tracing::{debug, trace};

use super::return_queue::ReturnConsumer;
use super::ticket::Recyclable;
use crate::config::RecyclerConfig;
use crate::identity::{current_thread_token, next_id};
use crate::stats::{sat_add, sat_inc, LocalStats};

// ============================================================================
// Pool handle (shared)
// ============================================================================

/// The cross-thread face of a `LocalPool`.
///
/// Tickets hold it to find their way home; foreign threads use it to register
/// return queues. It outlives the pool itself when values are still checked
/// out, so it carries an explicit `alive` flag, plus the flag shared by every
/// pool of the same recycler, cleared when the last `Recycler` handle drops.
pub(crate) struct PoolHandle<T> {
    id: u64,
    recycler_id: u64,
    owner_thread: u64,
    max_queues_per_thread: usize,
    alive: AtomicBool,
    recycler_alive: Arc<AtomicBool>,
    /// Consumer halves registered by foreign threads, not yet adopted by the
    /// owning thread.
    incoming: SegQueue<ReturnConsumer<T>>,
}

impl<T> PoolHandle<T> {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn recycler_id(&self) -> u64 {
        self.recycler_id
    }

    #[inline]
    pub(crate) fn owner_thread(&self) -> u64 {
        self.owner_thread
    }

    #[inline]
    pub(crate) fn max_queues_per_thread(&self) -> usize {
        self.max_queues_per_thread
    }

    /// `false` once the owning thread has dropped its pool or the recycler
    /// itself is gone.
    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.recycler_alive()
    }

    /// `false` once every `Recycler` handle has been dropped.
    #[inline]
    pub(crate) fn recycler_alive(&self) -> bool {
        self.recycler_alive.load(Ordering::Acquire)
    }

    /// Hands a new queue's consumer half to the owning thread.
    pub(crate) fn register_queue(&self, consumer: ReturnConsumer<T>) {
        self.incoming.push(consumer);
    }
}

// ============================================================================
// Free stack
// ============================================================================

/// Bounded LIFO of idle values.
pub(crate) struct FreeStack<T> {
    items: Vec<T>,
    max_capacity: usize,
    owner: Arc<PoolHandle<T>>,
    stats: LocalStats,
}

impl<T> FreeStack<T> {
    /// Slots left before the capacity bound.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.max_capacity - self.items.len()
    }

    /// Grows the backing array geometrically so `additional` more values fit.
    ///
    /// Doubles the current capacity until it is large enough, never past
    /// `max_capacity`. Callers never ask for more than `remaining()`.
    pub(crate) fn reserve(&mut self, additional: usize) {
        let needed = self.items.len() + additional;
        debug_assert!(needed <= self.max_capacity);
        if needed <= self.items.capacity() {
            return;
        }
        let mut target = self.items.capacity().max(1);
        while target < needed {
            target = target.saturating_mul(2);
        }
        let target = target.min(self.max_capacity);
        self.items.reserve_exact(target - self.items.len());
    }

    /// Pushes a value recycled on this thread.
    ///
    /// Returns the value back when the stack is full; the caller drops it.
    #[inline]
    fn push(&mut self, value: T) -> Option<T> {
        if self.items.len() >= self.max_capacity {
            sat_inc(&mut self.stats.drops);
            return Some(value);
        }
        self.reserve(1);
        self.items.push(value);
        None
    }
}

impl<T: Recyclable> FreeStack<T> {
    /// Takes ownership of a value that arrived through a return queue.
    ///
    /// The caller has reserved room for it.
    #[inline]
    pub(crate) fn adopt(&mut self, mut value: T) {
        debug_assert!(self.items.len() < self.max_capacity);
        value.ticket_mut().attach_owner(self.owner.clone());
        value.ticket().mark_transferred();
        self.items.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Option<T> {
        let value = self.items.pop()?;
        value.ticket().mark_checked_out();
        sat_inc(&mut self.stats.hits);
        Some(value)
    }
}

// ============================================================================
// Local pool
// ============================================================================

/// One thread's pool for one recycler.
pub(crate) struct LocalPool<T> {
    handle: Arc<PoolHandle<T>>,
    stack: FreeStack<T>,
    /// Return queues adopted from `handle.incoming`, in scavenge order.
    queues: Vec<ReturnConsumer<T>>,
    /// Index of the queue the next scavenge starts from.
    cursor: usize,
    /// Unlinked queues awaiting a drop outside the pool borrow.
    retired: Vec<ReturnConsumer<T>>,
}

impl<T> LocalPool<T> {
    /// Creates the calling thread's pool for `recycler_id`.
    pub(crate) fn new(
        recycler_id: u64,
        config: &RecyclerConfig,
        recycler_alive: Arc<AtomicBool>,
    ) -> Self {
        let handle = Arc::new(PoolHandle {
            id: next_id(),
            recycler_id,
            owner_thread: current_thread_token(),
            max_queues_per_thread: config.max_queues_per_thread,
            alive: AtomicBool::new(true),
            recycler_alive,
            incoming: SegQueue::new(),
        });
        Self {
            stack: FreeStack {
                items: Vec::with_capacity(config.effective_initial_capacity()),
                max_capacity: config.max_capacity_per_thread,
                owner: handle.clone(),
                stats: LocalStats::default(),
            },
            handle,
            queues: Vec::new(),
            cursor: 0,
            retired: Vec::new(),
        }
    }

    /// Pool of a recycler that nothing else observes.
    #[cfg(test)]
    pub(crate) fn standalone(recycler_id: u64, config: &RecyclerConfig) -> Self {
        Self::new(recycler_id, config, Arc::new(AtomicBool::new(true)))
    }

    #[inline]
    pub(crate) fn handle(&self) -> &Arc<PoolHandle<T>> {
        &self.handle
    }

    /// Idle values in the free list.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.stack.items.len()
    }

    /// Pushes a value recycled on the owning thread.
    ///
    /// Returns the value back if it was dropped by the capacity bound.
    #[inline]
    pub(crate) fn push(&mut self, value: T) -> Option<T> {
        self.stack.push(value)
    }

    /// Counts an acquire that had to construct.
    #[inline]
    pub(crate) fn record_miss(&mut self) {
        sat_inc(&mut self.stack.stats.misses);
    }

    /// Queues unlinked by scavenging. Drop them after releasing the borrow.
    #[inline]
    pub(crate) fn take_retired(&mut self) -> Vec<ReturnConsumer<T>> {
        mem::take(&mut self.retired)
    }

    pub(crate) fn stats(&self) -> LocalStats {
        LocalStats {
            pooled: self.stack.items.len(),
            return_queues: self.queues.len() + self.handle.incoming.len(),
            ..self.stack.stats
        }
    }

    fn adopt_incoming(&mut self) {
        while let Some(consumer) = self.handle.incoming.pop() {
            self.queues.push(consumer);
        }
    }

    #[cfg(test)]
    pub(crate) fn stack_mut(&mut self) -> &mut FreeStack<T> {
        &mut self.stack
    }
}

impl<T: Recyclable> LocalPool<T> {
    /// Pops the most recently pushed idle value, scavenging return queues
    /// if the free list is empty.
    pub(crate) fn pop(&mut self) -> Option<T> {
        if let Some(value) = self.stack.pop() {
            return Some(value);
        }
        if !self.scavenge() {
            return None;
        }
        self.stack.pop()
    }

    /// Pops from the free list only.
    #[cfg(test)]
    pub(crate) fn pop_local(&mut self) -> Option<T> {
        self.stack.pop()
    }

    /// Moves returned values from the return queues into the free list.
    ///
    /// Visits each queue at most once, starting at the remembered cursor, and
    /// stops at the first queue that yields values; the next scavenge resumes
    /// after it. A queue whose producing thread has exited is drained as far
    /// as capacity allows and unlinked, whether or not it yielded anything.
    pub(crate) fn scavenge(&mut self) -> bool {
        self.adopt_incoming();

        let mut visits = self.queues.len();
        while visits > 0 && !self.queues.is_empty() {
            visits -= 1;
            if self.cursor >= self.queues.len() {
                self.cursor = 0;
            }
            let idx = self.cursor;

            // Read liveness before draining: once the producer is seen dead,
            // every value it published is visible to the transfers below.
            let producer_alive = self.queues[idx].producer_alive();
            let mut moved = self.queues[idx].transfer(&mut self.stack);

            if producer_alive {
                self.cursor = idx + 1;
            } else {
                loop {
                    let more = self.queues[idx].transfer(&mut self.stack);
                    if more == 0 {
                        break;
                    }
                    moved += more;
                }
                // Removing shifts the next queue into `idx`; the cursor stays.
                let dead = self.queues.remove(idx);
                debug!(
                    recycler_id = self.handle.recycler_id,
                    pool_id = self.handle.id,
                    queue_id = dead.id(),
                    drained = moved,
                    "unlinked return queue of exited thread"
                );
                self.retired.push(dead);
            }

            if moved > 0 {
                sat_add(&mut self.stack.stats.scavenged, moved);
                return true;
            }
        }
        false
    }
}

impl<T> Drop for LocalPool<T> {
    fn drop(&mut self) {
        self.handle.alive.store(false, Ordering::Release);
        // Queues registered after this point stay in `incoming` until the
        // handle itself goes away.
        while self.handle.incoming.pop().is_some() {}
    }
}

// ============================================================================
// Thread-local pool table
// ============================================================================

/// Entry of the thread-local pool table.
struct PoolEntry {
    recycler_alive: Arc<AtomicBool>,
    pool: Rc<dyn Any>,
}

thread_local! {
    static LOCAL_POOLS: RefCell<AHashMap<u64, PoolEntry>> = RefCell::new(AHashMap::new());
}

/// The calling thread's pool for `recycler_id`, created on first use.
///
/// Creating a pool also evicts this thread's pools of recyclers that have
/// been dropped. Returns `None` once the thread's locals are being torn down.
pub(crate) fn local_pool<T: Recyclable>(
    recycler_id: u64,
    config: &RecyclerConfig,
    recycler_alive: &Arc<AtomicBool>,
) -> Option<Rc<RefCell<LocalPool<T>>>> {
    let mut stale = Vec::new();
    let pool = LOCAL_POOLS
        .try_with(|pools| {
            let existing = pools.borrow().get(&recycler_id).map(|entry| entry.pool.clone());
            if let Some(pool) = existing {
                return pool.downcast::<RefCell<LocalPool<T>>>().ok();
            }

            let mut pools = pools.borrow_mut();
            pools.retain(|_, entry| {
                let keep = entry.recycler_alive.load(Ordering::Acquire);
                if !keep {
                    stale.push(entry.pool.clone());
                }
                keep
            });
            if !stale.is_empty() {
                debug!(evicted = stale.len(), "evicted pools of dropped recyclers");
            }

            let pool = Rc::new(RefCell::new(LocalPool::<T>::new(
                recycler_id,
                config,
                recycler_alive.clone(),
            )));
            trace!(
                recycler_id,
                pool_id = pool.borrow().handle.id,
                capacity = config.max_capacity_per_thread,
                "created thread-local pool"
            );
            pools.insert(
                recycler_id,
                PoolEntry {
                    recycler_alive: recycler_alive.clone(),
                    pool: pool.clone(),
                },
            );
            Some(pool)
        })
        .ok()
        .flatten();
    // Idle values of evicted pools are dropped outside the table borrow.
    drop(stale);
    pool
}

/// The calling thread's pool for `recycler_id`, if it exists.
pub(crate) fn existing_pool<T: Recyclable>(recycler_id: u64) -> Option<Rc<RefCell<LocalPool<T>>>> {
    LOCAL_POOLS
        .try_with(|pools| {
            let existing = pools.borrow().get(&recycler_id).map(|entry| entry.pool.clone());
            existing.and_then(|pool| pool.downcast::<RefCell<LocalPool<T>>>().ok())
        })
        .ok()
        .flatten()
}

/// Detaches the calling thread's pool for `recycler_id`.
///
/// The caller drops the returned pool (and its idle values) outside the table
/// borrow.
pub(crate) fn remove_pool(recycler_id: u64) -> Option<Rc<dyn Any>> {
    LOCAL_POOLS
        .try_with(|pools| pools.borrow_mut().remove(&recycler_id))
        .ok()
        .flatten()
        .map(|entry| entry.pool)
}

/// Pushes a value recycled on its owning thread.
///
/// The value is dropped if the pool is gone, was replaced, is busy, or is at
/// capacity. A pool whose recycler has been dropped is evicted along with it.
pub(crate) fn push_local<T: Recyclable>(owner: &Arc<PoolHandle<T>>, value: T) {
    if !owner.recycler_alive() {
        let stale = remove_pool(owner.recycler_id());
        drop(value);
        drop(stale);
        return;
    }
    let Some(pool) = existing_pool::<T>(owner.recycler_id()) else {
        return;
    };
    let rejected = match pool.try_borrow_mut() {
        Ok(mut pool) if Arc::ptr_eq(&pool.handle, owner) => pool.push(value),
        _ => Some(value),
    };
    drop(rejected);
}

/// Whether this thread's table still holds a pool for `recycler_id`.
#[cfg(test)]
pub(crate) fn has_pool(recycler_id: u64) -> bool {
    LOCAL_POOLS.with(|pools| pools.borrow().contains_key(&recycler_id))
}
