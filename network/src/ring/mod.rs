//! Three-cursor ring.
//!
//! # Index protocol
//!
//! ```text
//!        begin            end                 next
//!          │               │                   │
//!   ───────┼───────────────┼───────────────────┼──────────
//!          │ adapter-owned │  available (free) │ returned │
//!          └──── posted ───┘  producer fills   └─ reclaim ┘
//! ```
//!
//! All cursors are taken mod `N` (a power of two). `end` may advance up to
//! `next - 1`, never to `next`; that one reserved slot keeps a full ring
//! distinguishable from an empty one, so the three region counts always sum
//! to `N - 1`.
//!
//! Only the translator moves `end` and `next`. Only the adapter moves
//! `begin` (via [`Ring::advance_begin`], which takes `&self` and may run on
//! another execution context). `begin` and `end` are published with release
//! stores and read with acquire loads.

mod set;

pub use set::RingSet;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{DatapathError, Result};

/// A run of ring indices `[start, start + count)` mod `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRange {
    pub start: u32,
    pub count: u32,
}

impl RingRange {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate the (masked) indices of this range.
    pub fn indices(self, mask: u32) -> impl Iterator<Item = u32> {
        (0..self.count).map(move |i| self.start.wrapping_add(i) & mask)
    }
}

/// Fixed-capacity ring of `T` records.
pub struct Ring<T> {
    elements: Box<[T]>,
    mask: u32,
    begin: AtomicU32,
    end: AtomicU32,
    next: u32,
}

impl<T: Default> Ring<T> {
    /// Create a ring of `count` default-initialised slots.
    ///
    /// `count` must be a power of two and at least 2.
    pub fn new(count: u32) -> Result<Self> {
        if count < 2 || !count.is_power_of_two() {
            return Err(DatapathError::InvalidConfig("ring size must be a power of two >= 2"));
        }
        let mut elements = Vec::with_capacity(count as usize);
        elements.resize_with(count as usize, T::default);
        Ok(Self {
            elements: elements.into_boxed_slice(),
            mask: count - 1,
            begin: AtomicU32::new(0),
            end: AtomicU32::new(0),
            next: 0,
        })
    }
}

impl<T> Ring<T> {
    /// Number of slots `N`.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// `N - 1`, the most slots that can ever be in flight.
    #[inline]
    pub fn usable(&self) -> u32 {
        self.mask
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    pub fn begin(&self) -> u32 {
        self.begin.load(Ordering::Acquire)
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.end.load(Ordering::Acquire)
    }

    #[inline]
    pub fn next(&self) -> u32 {
        self.next
    }

    /// `index + count` wrapped to the ring.
    #[inline]
    pub fn increment(&self, index: u32, count: u32) -> u32 {
        index.wrapping_add(count) & self.mask
    }

    /// Slots from `from` forward to `to`.
    #[inline]
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        to.wrapping_sub(from) & self.mask
    }

    /// `[begin, end)`: posted to the adapter, not yet returned.
    pub fn adapter_owned(&self) -> RingRange {
        let begin = self.begin();
        RingRange {
            start: begin,
            count: self.distance(begin, self.end()),
        }
    }

    /// `[end, next - 1)`: free for the producer.
    pub fn available(&self) -> RingRange {
        let end = self.end();
        RingRange {
            start: end,
            count: self.next.wrapping_sub(end).wrapping_sub(1) & self.mask,
        }
    }

    /// `[next, begin)`: returned by the adapter, awaiting reclaim.
    pub fn returned(&self) -> RingRange {
        let begin = self.begin();
        RingRange {
            start: self.next,
            count: self.distance(self.next, begin),
        }
    }

    /// Post `count` filled slots to the adapter.
    ///
    /// # Panics
    /// Panics if `count` exceeds [`Ring::available`].
    pub fn advance_end(&mut self, count: u32) {
        let available = self.available().count;
        assert!(
            count <= available,
            "BUG: advance_end({}) with only {} available",
            count,
            available
        );
        let end = self.increment(self.end(), count);
        self.end.store(end, Ordering::Release);
    }

    /// Reclaim `count` returned slots.
    ///
    /// # Panics
    /// Panics if `count` exceeds [`Ring::returned`].
    pub fn advance_next(&mut self, count: u32) {
        let returned = self.returned().count;
        assert!(
            count <= returned,
            "BUG: advance_next({}) with only {} returned",
            count,
            returned
        );
        self.next = self.increment(self.next, count);
    }

    /// Adapter side: hand `count` posted slots back to software.
    ///
    /// # Panics
    /// Panics if `count` exceeds [`Ring::adapter_owned`].
    pub fn advance_begin(&self, count: u32) {
        let owned = self.adapter_owned().count;
        assert!(
            count <= owned,
            "BUG: advance_begin({}) with only {} adapter-owned",
            count,
            owned
        );
        let begin = self.increment(self.begin(), count);
        self.begin.store(begin, Ordering::Release);
    }

    #[inline]
    pub fn get(&self, index: u32) -> &T {
        &self.elements[(index & self.mask) as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32) -> &mut T {
        &mut self.elements[(index & self.mask) as usize]
    }

    /// Split `range` into at most two contiguous pieces.
    fn split(&self, range: RingRange) -> (core::ops::Range<usize>, core::ops::Range<usize>) {
        let start = (range.start & self.mask) as usize;
        let count = range.count.min(self.capacity()) as usize;
        let first_len = count.min(self.capacity() as usize - start);
        (start..start + first_len, 0..count - first_len)
    }

    /// Two-piece view of `range`.
    pub fn slices(&self, range: RingRange) -> (&[T], &[T]) {
        let (first, second) = self.split(range);
        (&self.elements[first], &self.elements[second])
    }

    /// Two-piece mutable view of `range`.
    pub fn slices_mut(&mut self, range: RingRange) -> (&mut [T], &mut [T]) {
        let (first, second) = self.split(range);
        let second_len = second.len();
        let (head, tail) = self.elements.split_at_mut(first.start);
        // `second` always starts at 0 and ends before `first` begins.
        (&mut tail[..first.len()], &mut head[..second_len])
    }

    /// Mutable view of the free slots starting at `end`.
    pub fn reserve_for_adapter(&mut self) -> (&mut [T], &mut [T]) {
        let range = self.available();
        self.slices_mut(range)
    }

    /// Iterate `range` in ring order.
    pub fn iter_range(&self, range: RingRange) -> impl Iterator<Item = &T> {
        let (a, b) = self.slices(range);
        a.iter().chain(b.iter())
    }
}

impl<T> core::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .field("begin", &self.begin())
            .field("end", &self.end())
            .field("next", &self.next)
            .finish()
    }
}
