//! Fixed-capacity batch unit of a return queue.
//!
//! # Design
//!
//! A segment is written by exactly one producer (the foreign thread that
//! recycles values) and read by exactly one consumer (the thread that owns the
//! target pool). Unlike a ring, a segment is filled once and never wraps:
//! when it is full the producer links a fresh segment behind it, and the
//! consumer discards a segment once it has read every slot.
//!
//! # Ordering rationale
//!
//! ```text
//! Producer writes slot, then Release-stores write  →  consumer Acquire-loads write, then reads slot
//! Producer fills next, then sets link (OnceLock)   →  consumer gets link, then Acquire-loads next.write
//! ```
//!
//! The read cursor is touched only by the consumer (and by `Drop`, which has
//! exclusive access), so it is accessed with `Relaxed` ordering.
//!
//! # Safety
//!
//! Uses `unsafe` for `MaybeUninit` slot access. Producer-side and
//! consumer-side methods are `unsafe fn` because the single-producer /
//! single-consumer discipline is enforced by the owning queue halves, not by
//! the type system.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU32, Ordering};

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::{Arc, OnceLock};

use crossbeam_utils::CachePadded;

/// Slots per segment.
pub(crate) const SEGMENT_CAPACITY: usize = 16;

const CAPACITY: u32 = SEGMENT_CAPACITY as u32;

/// Create an uninitialized `[MaybeUninit<T>; N]` without running any constructors.
fn uninit_array<T, const N: usize>() -> [MaybeUninit<T>; N] {
    // SAFETY: An uninitialized MaybeUninit<T> is valid by definition.
    unsafe { MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init() }
}

/// One link of a return queue's segment chain.
///
/// # Invariants
///
/// - `read <= write <= SEGMENT_CAPACITY`.
/// - Slots in `[read, write)` are initialized; all others are uninitialized
///   (either never written or already moved out).
/// - Only the producer writes `write`, slots at `write`, and `next`.
/// - Only the consumer writes `read` and moves slots out of `[read, write)`.
pub(crate) struct Segment<T> {
    slots: UnsafeCell<[MaybeUninit<T>; SEGMENT_CAPACITY]>,
    /// Producer's publish cursor. Padded away from the slots the producer is
    /// writing so consumer polls do not bounce that line.
    write: CachePadded<AtomicU32>,
    /// Consumer's read cursor.
    read: AtomicU32,
    /// Successor, set once by the producer when this segment is full.
    next: OnceLock<Arc<Segment<T>>>,
}

// SAFETY: Producer and consumer touch disjoint slots; the write cursor's
// Release/Acquire pair orders slot initialization before slot reads.
unsafe impl<T: Send> Send for Segment<T> {}
unsafe impl<T: Send> Sync for Segment<T> {}

impl<T> Segment<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: UnsafeCell::new(uninit_array()),
            write: CachePadded::new(AtomicU32::new(0)),
            read: AtomicU32::new(0),
            next: OnceLock::new(),
        }
    }

    /// Raw pointer to one slot. Never forms a reference to the whole array,
    /// which the other side may be accessing concurrently.
    #[inline]
    fn slot_ptr(&self, idx: u32) -> *mut MaybeUninit<T> {
        debug_assert!(idx < CAPACITY);
        // SAFETY: `idx < CAPACITY` keeps the offset inside the array.
        unsafe { self.slots.get().cast::<MaybeUninit<T>>().add(idx as usize) }
    }

    /// Appends `value`, or returns it if every slot has been written.
    ///
    /// # Safety
    ///
    /// The caller must be this segment's only producer.
    #[inline]
    pub(crate) unsafe fn try_push(&self, value: T) -> Result<(), T> {
        // Relaxed: only the producer writes `write`.
        let write = self.write.load(Ordering::Relaxed);
        if write == CAPACITY {
            return Err(value);
        }

        // SAFETY: slot `write` is outside `[read, write)`, so the consumer
        // does not touch it until the store below publishes it.
        unsafe {
            self.slot_ptr(write).write(MaybeUninit::new(value));
        }

        self.write.store(write + 1, Ordering::Release);
        Ok(())
    }

    /// Links the successor segment. Called once, after this one fills.
    ///
    /// The successor should already hold its first value, so a consumer that
    /// follows the link always finds something to read.
    pub(crate) fn link(&self, next: Arc<Segment<T>>) {
        let linked = self.next.set(next).is_ok();
        debug_assert!(linked, "segment linked twice");
    }

    /// Successor segment, if the producer has linked one.
    #[inline]
    pub(crate) fn next(&self) -> Option<&Arc<Segment<T>>> {
        self.next.get()
    }

    /// Whether the consumer has read every slot this segment will ever hold.
    #[inline]
    pub(crate) fn is_consumed(&self) -> bool {
        self.read.load(Ordering::Relaxed) == CAPACITY
    }

    /// Published but unread values.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Relaxed);
        (write - read) as usize
    }

    /// Moves up to `max` published values into `sink`, oldest first.
    ///
    /// Returns the number of values moved. Values beyond `max` stay in the
    /// segment for the next call.
    ///
    /// # Safety
    ///
    /// The caller must be this segment's only consumer.
    pub(crate) unsafe fn drain_into(&self, max: usize, mut sink: impl FnMut(T)) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let count = ((write - read) as usize).min(max);

        for i in 0..count as u32 {
            let idx = read + i;
            // SAFETY: `idx` is in `[read, write)`, initialized and published.
            // The cursor is advanced before `sink` runs, so a panicking sink
            // cannot leave a moved-out slot inside `[read, write)`.
            let value = unsafe { self.slot_ptr(idx).read().assume_init() };
            self.read.store(idx + 1, Ordering::Relaxed);
            sink(value);
        }

        count
    }
}

impl<T> Default for Segment<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Relaxed);
        let slots = self.slots.get_mut();
        for slot in &mut slots[read as usize..write as usize] {
            // SAFETY: slots in `[read, write)` are initialized.
            unsafe { slot.assume_init_drop() };
        }

        // Unlink iteratively; a long chain dropped recursively could overflow
        // the stack.
        let mut next = self.next.take();
        while let Some(segment) = next {
            next = match Arc::try_unwrap(segment) {
                Ok(mut segment) => segment.next.take(),
                Err(_) => None,
            };
        }
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================
