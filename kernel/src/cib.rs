//! Circular integer buffer
//!
//! Produces ring-buffer indices without storing the ring contents. Two
//! free-running counters and a mask are enough: `write_count - read_count`
//! is the fill level, and `counter & mask` is the slot index. The mailbox
//! and per-thread message queues layer their storage on top of this.
//!
//! The capacity must be zero or a power of two. Zero capacity is encoded
//! as an all-ones mask; such a buffer reports itself as permanently full,
//! which callers use to degrade a queue into a pure rendezvous.

/// Circular integer buffer state.
#[derive(Debug, Clone, Copy)]
pub struct Cib {
    read_count: u32,
    write_count: u32,
    mask: u32,
}

impl Cib {
    /// Create a buffer of the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is neither zero nor a power of two, or exceeds
    /// half the counter range.
    pub const fn new(capacity: u32) -> Self {
        assert!(
            capacity & capacity.wrapping_sub(1) == 0,
            "cib capacity must be 0 or a power of two"
        );
        assert!(capacity <= (u32::MAX / 2) + 1);
        Cib {
            read_count: 0,
            write_count: 0,
            mask: capacity.wrapping_sub(1),
        }
    }

    /// Number of items that can be read before the buffer is empty.
    #[inline]
    pub fn avail(&self) -> u32 {
        self.write_count.wrapping_sub(self.read_count)
    }

    /// Capacity of the buffer.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.mask.wrapping_add(1)
    }

    /// Whether a [`put`](Cib::put) would fail.
    ///
    /// A zero-capacity buffer has `mask == !0`, which the signed comparison
    /// treats as -1, so it is full even when `avail()` is 0.
    #[inline]
    pub fn full(&self) -> bool {
        self.avail() as i32 > self.mask as i32
    }

    /// Claim the index of the next slot to write, or `None` when full.
    #[inline]
    pub fn put(&mut self) -> Option<usize> {
        if self.full() {
            return None;
        }
        let index = (self.write_count & self.mask) as usize;
        self.write_count = self.write_count.wrapping_add(1);
        Some(index)
    }

    /// Claim the index of the next slot to read, or `None` when empty.
    #[inline]
    pub fn get(&mut self) -> Option<usize> {
        if self.avail() == 0 {
            return None;
        }
        let index = (self.read_count & self.mask) as usize;
        self.read_count = self.read_count.wrapping_add(1);
        Some(index)
    }

    /// Index of the next slot to read without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<usize> {
        if self.avail() == 0 {
            return None;
        }
        Some((self.read_count & self.mask) as usize)
    }
}
