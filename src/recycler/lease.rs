//! RAII checkout and a ticket-carrying wrapper for plain values.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use tracing::warn;

use super::ticket::{Recyclable, Ticket};
use super::Recycler;

/// A checked-out value that is recycled when the lease is dropped.
///
/// Obtained from [`Recycler::lease`]. Use [`detach`](Lease::detach) to keep
/// the value instead.
pub struct Lease<T: Recyclable> {
    value: ManuallyDrop<T>,
}

impl<T: Recyclable> Lease<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: ManuallyDrop::new(value),
        }
    }

    /// Ends the lease without recycling; the caller owns the value.
    pub fn detach(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the value is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.value) }
    }
}

impl<T: Recyclable> Deref for Lease<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Recyclable> DerefMut for Lease<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Recyclable> Drop for Lease<T> {
    fn drop(&mut self) {
        // SAFETY: `drop` runs once and the value is not touched afterwards.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        if let Err(err) = value.recycle() {
            // Only reachable if a clone of the ticket was recycled while
            // leased. The value is dropped.
            warn!(error = %err, "leased value was recycled elsewhere");
        }
    }
}

impl<T: Recyclable + fmt::Debug> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&*self.value).finish()
    }
}

/// Pools any `V` by storing the ticket next to it.
///
/// ```
/// use recycler_rs::{Recyclable, Recycler};
///
/// let recycler = Recycler::wrapping(16, || String::with_capacity(64));
/// let mut s = recycler.acquire();
/// s.push_str("scratch");
/// assert_eq!(s.recycle().ok(), Some(true));
/// ```
pub struct Recycled<V> {
    value: V,
    ticket: Ticket<Recycled<V>>,
}

impl<V> Recycled<V> {
    pub fn new(value: V, ticket: Ticket<Recycled<V>>) -> Self {
        Self { value, ticket }
    }

    /// Unwraps the value. The ticket is discarded and the value is not
    /// returned to any pool.
    pub fn into_inner(self) -> V {
        self.value
    }
}

impl<V: Send + 'static> Recyclable for Recycled<V> {
    fn ticket(&self) -> &Ticket<Self> {
        &self.ticket
    }

    fn ticket_mut(&mut self) -> &mut Ticket<Self> {
        &mut self.ticket
    }
}

impl<V> Deref for Recycled<V> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        &self.value
    }
}

impl<V> DerefMut for Recycled<V> {
    #[inline]
    fn deref_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

impl<V: fmt::Debug> fmt::Debug for Recycled<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycled")
            .field("value", &self.value)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl<V: Send + 'static> Recycler<Recycled<V>> {
    /// Recycler for plain values built by `make`.
    ///
    /// Values are not reset on release; clear them before releasing or after
    /// acquiring if stale contents matter.
    ///
    /// # Panics
    ///
    /// Same as [`Recycler::new`].
    pub fn wrapping<F>(max_capacity_per_thread: usize, make: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        Self::new(max_capacity_per_thread, move |ticket| {
            Recycled::new(make(), ticket)
        })
    }
}
