//! Thread-affine object recycler.
//!
//! # Architecture
//!
//! ```text
//! Recycler<T> ──acquire()──▶ LocalPool<T> (calling thread)
//!      │                         │ pop ─▶ free list (LIFO, bounded)
//!      │                         └ empty ─▶ scavenge return queues
//!      │                                     └ still empty ─▶ construct(Ticket)
//!      └─release(value)──▶ owning thread?  ─▶ push onto its free list
//!                          foreign thread? ─▶ ReturnQueue (SPSC) toward owner
//! ```
//!
//! - `ticket`: per-value recycle state and the recycle protocol.
//! - `local_pool`: the owning thread's free list and scavenging.
//! - `return_queue`: SPSC queues and the foreign thread's producer registry.
//! - `segment`: fixed-size publish/consume block the queues are built from.
//! - `lease`: RAII checkout and the `Recycled<V>` wrapper.
//!
//! # Threading
//!
//! A `Recycler` is `Send + Sync` and cheap to clone. Each thread that acquires
//! from it gets its own pool on first use; pools are never shared. Values may
//! be released from any thread.

mod lease;
mod local_pool;
mod return_queue;
mod segment;
mod ticket;

pub use lease::{Lease, Recycled};
pub use ticket::{Recyclable, Ticket};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::RecyclerConfig;
use crate::error::{ConfigError, DoubleRecycleError};
use crate::identity::next_id;
use crate::stats::LocalStats;

type Construct<T> = dyn Fn(Ticket<T>) -> T + Send + Sync;

struct Shared<T> {
    id: u64,
    config: RecyclerConfig,
    construct: Box<Construct<T>>,
    /// Shared with every pool of this recycler; cleared on drop.
    alive: Arc<AtomicBool>,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Pools on other threads see the cleared flag and are evicted on their
        // next local recycle or pool creation; foreign returns to them are
        // dropped from here on.
        self.alive.store(false, Ordering::Release);
        let pool = local_pool::remove_pool(self.id);
        drop(pool);
    }
}

/// Pool of reusable `T` values with one free list per thread.
///
/// # Example
///
/// ```
/// use recycler_rs::{Recyclable, Recycler, Ticket};
///
/// struct Buffer {
///     bytes: Vec<u8>,
///     ticket: Ticket<Buffer>,
/// }
///
/// impl Recyclable for Buffer {
///     fn ticket(&self) -> &Ticket<Self> {
///         &self.ticket
///     }
///     fn ticket_mut(&mut self) -> &mut Ticket<Self> {
///         &mut self.ticket
///     }
///     fn reset(&mut self) {
///         self.bytes.clear();
///     }
/// }
///
/// let recycler = Recycler::new(64, |ticket| Buffer {
///     bytes: Vec::with_capacity(4096),
///     ticket,
/// });
///
/// let mut buf = recycler.acquire();
/// buf.bytes.extend_from_slice(b"hello");
/// assert_eq!(recycler.release(buf).ok(), Some(true));
///
/// let buf = recycler.acquire();
/// assert!(buf.bytes.is_empty());
/// assert!(buf.bytes.capacity() >= 4096);
/// ```
pub struct Recycler<T: Recyclable> {
    shared: Arc<Shared<T>>,
}

/// How `acquire` obtained its value; resolved under the pool borrow, acted
/// on after it.
enum Checkout<T> {
    Pooled(T),
    Fresh(Ticket<T>),
}

impl<T: Recyclable> Recycler<T> {
    /// Creates a recycler keeping at most `max_capacity_per_thread` idle values
    /// per thread. `0` disables pooling.
    ///
    /// `construct` builds a new value around the ticket it is given; the value
    /// must hand that ticket back from [`Recyclable::ticket`].
    ///
    /// # Panics
    ///
    /// Panics if `max_capacity_per_thread` exceeds
    /// [`MAX_CAPACITY_LIMIT`](crate::MAX_CAPACITY_LIMIT).
    pub fn new<F>(max_capacity_per_thread: usize, construct: F) -> Self
    where
        F: Fn(Ticket<T>) -> T + Send + Sync + 'static,
    {
        match Self::with_config(
            RecyclerConfig::with_max_capacity(max_capacity_per_thread),
            construct,
        ) {
            Ok(recycler) => recycler,
            Err(err) => panic!("invalid recycler configuration: {err}"),
        }
    }

    /// Creates a recycler from an explicit configuration.
    pub fn with_config<F>(config: RecyclerConfig, construct: F) -> Result<Self, ConfigError>
    where
        F: Fn(Ticket<T>) -> T + Send + Sync + 'static,
    {
        config.validate()?;
        let id = next_id();
        debug!(
            recycler_id = id,
            value_type = std::any::type_name::<T>(),
            max_capacity_per_thread = config.max_capacity_per_thread,
            initial_capacity = config.effective_initial_capacity(),
            max_queues_per_thread = config.max_queues_per_thread,
            "created recycler"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                config,
                construct: Box::new(construct),
                alive: Arc::new(AtomicBool::new(true)),
            }),
        })
    }

    #[inline]
    pub fn config(&self) -> &RecyclerConfig {
        &self.shared.config
    }

    /// Takes an idle value from the calling thread's pool, or constructs one.
    ///
    /// With pooling disabled every call constructs a value carrying the
    /// unpooled ticket.
    pub fn acquire(&self) -> T {
        if !self.shared.config.pooling_enabled() {
            return (self.shared.construct)(Ticket::unpooled());
        }
        let Some(pool) =
            local_pool::local_pool::<T>(self.shared.id, &self.shared.config, &self.shared.alive)
        else {
            // Thread-locals are being torn down.
            return (self.shared.construct)(Ticket::unpooled());
        };

        let (checkout, retired) = match pool.try_borrow_mut() {
            Ok(mut pool) => {
                let checkout = match pool.pop() {
                    Some(value) => Checkout::Pooled(value),
                    None => {
                        pool.record_miss();
                        Checkout::Fresh(Ticket::issue(pool.handle().clone()))
                    }
                };
                (checkout, pool.take_retired())
            }
            // Re-entered from a value's `Drop` while this pool is busy.
            Err(_) => (Checkout::Fresh(Ticket::unpooled()), Vec::new()),
        };
        drop(retired);

        match checkout {
            Checkout::Pooled(value) => value,
            Checkout::Fresh(ticket) => (self.shared.construct)(ticket),
        }
    }

    /// Returns `value` to the pool that issued it.
    ///
    /// - `Ok(true)`: accepted. The value is pooled, queued toward its owning
    ///   thread, or dropped because that pool is full or gone.
    /// - `Ok(false)`: the value is unpooled or was issued by another recycler,
    ///   whatever that recycler's checkout state; it is dropped. Use
    ///   [`Recyclable::recycle`] to return a value to its own recycler.
    /// - `Err`: this checkout was already recycled. The value is handed back
    ///   and no pool is modified.
    pub fn release(&self, value: T) -> Result<bool, DoubleRecycleError<T>> {
        if value.ticket().owner_recycler_id() != Some(self.shared.id) {
            return Ok(false);
        }
        ticket::recycle(value)
    }

    /// Acquires a value wrapped in a guard that recycles it on drop.
    pub fn lease(&self) -> Lease<T> {
        Lease::new(self.acquire())
    }

    /// Counters of the calling thread's pool. All zero if this thread has not
    /// acquired from this recycler.
    pub fn local_stats(&self) -> LocalStats {
        let Some(pool) = local_pool::existing_pool::<T>(self.shared.id) else {
            return LocalStats::default();
        };
        let stats = match pool.try_borrow() {
            Ok(pool) => pool.stats(),
            Err(_) => LocalStats::default(),
        };
        stats
    }
}

impl<T: Recyclable> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Recyclable> fmt::Debug for Recycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycler")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
