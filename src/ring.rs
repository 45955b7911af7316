//! Fixed-capacity lock-free SPSC byte ring.
//!
//! One producer thread reserves and commits writes; one consumer thread
//! peeks and commits reads. Reservations are record-aligned: a reservation
//! that would cross the physical end of the buffer is rejected rather than
//! wrapped, so every record occupies a single contiguous slice and the
//! consumer can hand the decoder a plain `&[u8]`. The unused tail slack this
//! leaves behind is amortized by the queue layer's node doubling.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Rings smaller than this are rounded up; a record header alone needs a
/// few dozen bytes.
const MIN_CAPACITY: usize = 64;

const PAGE_SIZE: usize = 4096;

/// Lock-free single-producer single-consumer byte ring.
///
/// ### Concurrency design
///
/// Both positions are monotonically increasing byte counts; the physical
/// index is `pos & (capacity - 1)`. The invariants `write_pos >= read_pos`
/// and `write_pos - read_pos <= capacity` hold at all times.
///
/// - The producer publishes data with a release store in [`commit_write`];
///   the consumer observes it with an acquire load of `write_pos` in
///   [`peek_read`].
/// - The consumer frees space with a release store in [`commit_read`]; the
///   producer observes it with an acquire load of `read_pos` in
///   [`reserve_write`].
/// - Each position lives on its own cache line (`CachePadded`) so the two
///   threads do not false-share.
///
/// [`commit_write`]: RingBytes::commit_write
/// [`peek_read`]: RingBytes::peek_read
/// [`commit_read`]: RingBytes::commit_read
/// [`reserve_write`]: RingBytes::reserve_write
pub struct RingBytes {
    buf: Box<[UnsafeCell<u8>]>,
    mask: usize,
    write_pos: CachePadded<AtomicU64>,
    read_pos: CachePadded<AtomicU64>,
}

// SPSC contract: at most one thread calls the write-side operations and at
// most one thread calls the read-side operations at any time. Under that
// contract the acquire/release pairs above make the byte accesses data-race
// free; the storage is UnsafeCell so the aliasing is tracked.
unsafe impl Send for RingBytes {}
unsafe impl Sync for RingBytes {}

impl RingBytes {
    /// Creates a ring with at least `capacity` bytes, rounded up to the next
    /// power of two. The buffer is touched page by page so the first writes
    /// on the hot path do not take page faults.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let buf: Box<[UnsafeCell<u8>]> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        let mut offset = 0;
        while offset < capacity {
            // Volatile so the pre-faulting store is not optimized away.
            unsafe { std::ptr::write_volatile(buf[offset].get(), 0) };
            offset += PAGE_SIZE;
        }

        Self {
            buf,
            mask: capacity - 1,
            write_pos: CachePadded::new(AtomicU64::new(0)),
            read_pos: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Reserves `n` contiguous bytes for writing.
    ///
    /// Fails when the ring lacks `n` free bytes or when the reservation
    /// would cross the physical end of the buffer. Does not advance the
    /// write position; the producer fills the slice and then calls
    /// [`commit_write`](RingBytes::commit_write) with the same `n`.
    ///
    /// The slice stays valid until the matching commit. At most one
    /// reservation may be outstanding.
    #[inline]
    pub fn reserve_write(&self, n: usize) -> Option<&mut [u8]> {
        if n == 0 || n > self.capacity() {
            return None;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let free = self.capacity() - (write - read) as usize;
        if n > free {
            return None;
        }

        let index = (write as usize) & self.mask;
        if index + n > self.capacity() {
            // Would wrap: reject so the record stays contiguous.
            return None;
        }

        // Single producer: nothing else writes this region until commit, and
        // the consumer will not read past `write_pos`.
        Some(unsafe { std::slice::from_raw_parts_mut(self.buf[index].get(), n) })
    }

    /// Publishes `n` reserved bytes to the consumer.
    #[inline]
    pub fn commit_write(&self, n: usize) {
        let write = self.write_pos.load(Ordering::Relaxed);
        self.write_pos.store(write + n as u64, Ordering::Release);
    }

    /// Returns a view of the next `n` readable bytes without consuming them.
    ///
    /// The slice stays valid until the consumer's next
    /// [`commit_read`](RingBytes::commit_read).
    #[inline]
    pub fn peek_read(&self, n: usize) -> Option<&[u8]> {
        if n == 0 {
            return Some(&[]);
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        if n as u64 > write - read {
            return None;
        }

        let index = (read as usize) & self.mask;
        debug_assert!(index + n <= self.capacity(), "committed record wrapped");
        Some(unsafe { std::slice::from_raw_parts(self.buf[index].get(), n) })
    }

    /// Consumes `n` bytes, releasing their space back to the producer.
    #[inline]
    pub fn commit_read(&self, n: usize) {
        let read = self.read_pos.load(Ordering::Relaxed);
        self.read_pos.store(read + n as u64, Ordering::Release);
    }

    /// Bytes committed but not yet consumed.
    pub fn available_read(&self) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        (write - read) as usize
    }

    /// Free bytes, ignoring the contiguity requirement of
    /// [`reserve_write`](RingBytes::reserve_write).
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity() - (write - read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }
}
