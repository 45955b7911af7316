//! Growing SPSC byte queue: a singly linked chain of [`RingBytes`] nodes.
//!
//! The producer writes to the tail node and, when a reservation fails there,
//! links a fresh node with doubled capacity (capped at the configured
//! maximum). The consumer reads from the head node and frees it once it is
//! drained and a successor exists. Only the producer touches `tail` and
//! `next` links on the write side; only the consumer advances `head`, which
//! gives each pointer a single writer.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::ring::RingBytes;

struct Node {
    ring: RingBytes,
    next: AtomicPtr<Node>,
}

impl Node {
    fn alloc(capacity: usize) -> *mut Node {
        Box::into_raw(Box::new(Node {
            ring: RingBytes::new(capacity),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }))
    }
}

/// Unbounded-until-capped SPSC byte channel.
///
/// All operations take `&self`; the SPSC contract is that one thread (the
/// owning producer) calls the write-side operations and one thread (the
/// backend consumer) calls the read-side operations. Peeked slices are valid
/// until the consumer's next read-side call.
pub struct Queue {
    head: CachePadded<AtomicPtr<Node>>,
    tail: CachePadded<AtomicPtr<Node>>,
    max_node_capacity: usize,
    // Whole-queue byte accounting, kept outside the nodes so `is_empty` does
    // not have to walk a chain the consumer may be freeing concurrently.
    total_written: AtomicU64,
    total_read: AtomicU64,
}

unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

impl Queue {
    pub fn new(initial_capacity: usize, max_node_capacity: usize) -> Self {
        let max_node_capacity = max_node_capacity
            .next_power_of_two()
            .max(initial_capacity.next_power_of_two());
        let first = Node::alloc(initial_capacity);
        Self {
            head: CachePadded::new(AtomicPtr::new(first)),
            tail: CachePadded::new(AtomicPtr::new(first)),
            max_node_capacity,
            total_written: AtomicU64::new(0),
            total_read: AtomicU64::new(0),
        }
    }

    pub fn max_node_capacity(&self) -> usize {
        self.max_node_capacity
    }

    /// Reserves `n` contiguous bytes on the tail node, growing the chain if
    /// the tail is exhausted.
    ///
    /// Returns `None` when `n` exceeds the node capacity cap or when the
    /// tail node has already reached the cap and is full; the caller counts
    /// the record as dropped.
    #[inline]
    pub fn reserve_write(&self, n: usize) -> Option<&mut [u8]> {
        if n == 0 || n > self.max_node_capacity {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let tail_ref = unsafe { &*tail };
        if let Some(buf) = tail_ref.ring.reserve_write(n) {
            return Some(buf);
        }

        // Tail exhausted. At the cap the record is dropped; otherwise grow.
        let tail_capacity = tail_ref.ring.capacity();
        if tail_capacity >= self.max_node_capacity {
            return None;
        }

        let new_capacity = (tail_capacity * 2)
            .max(n)
            .next_power_of_two()
            .min(self.max_node_capacity);
        let new_node = Node::alloc(new_capacity);

        let buf = unsafe { &*new_node }
            .ring
            .reserve_write(n)
            .expect("fresh node sized for this reservation");

        // Publish the node before moving the tail so the consumer's acquire
        // of `next` sees a fully initialized ring.
        tail_ref.next.store(new_node, Ordering::Release);
        self.tail.store(new_node, Ordering::Relaxed);

        Some(buf)
    }

    /// Publishes the most recent reservation on the tail node.
    #[inline]
    pub fn commit_write(&self, n: usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        unsafe { &*tail }.ring.commit_write(n);
        self.total_written.fetch_add(n as u64, Ordering::Release);
    }

    /// Reserve, copy, commit in one call.
    pub fn write(&self, data: &[u8]) -> bool {
        match self.reserve_write(data.len()) {
            Some(buf) => {
                buf.copy_from_slice(data);
                self.commit_write(data.len());
                true
            }
            None => false,
        }
    }

    /// Returns a view of the next `n` readable bytes.
    ///
    /// Advances past (and frees) a drained head node when a successor is
    /// linked, so data in a newer node stays reachable even when the old
    /// head was abandoned by growth. The slice is valid until the consumer's
    /// next read-side call.
    #[inline]
    pub fn peek_read(&self, n: usize) -> Option<&[u8]> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let head_ref = unsafe { &*head };

            if let Some(buf) = head_ref.ring.peek_read(n) {
                return Some(buf);
            }

            if head_ref.ring.is_empty() {
                let next = head_ref.next.load(Ordering::Acquire);
                if !next.is_null() {
                    self.head.store(next, Ordering::Relaxed);
                    drop(unsafe { Box::from_raw(head) });
                    continue;
                }
            }

            return None;
        }
    }

    /// Consumes `n` bytes from the head node, freeing it when the commit
    /// drains a node that already has a successor.
    #[inline]
    pub fn commit_read(&self, n: usize) {
        let head = self.head.load(Ordering::Relaxed);
        let head_ref = unsafe { &*head };
        head_ref.ring.commit_read(n);
        self.total_read.fetch_add(n as u64, Ordering::Release);

        if head_ref.ring.is_empty() {
            let next = head_ref.next.load(Ordering::Acquire);
            if !next.is_null() {
                self.head.store(next, Ordering::Relaxed);
                drop(unsafe { Box::from_raw(head) });
            }
        }
    }

    /// Total committed-but-unread bytes across the whole chain.
    pub fn available_read(&self) -> usize {
        let written = self.total_written.load(Ordering::Acquire);
        let read = self.total_read.load(Ordering::Acquire);
        (written - read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Number of live nodes in the chain.
    ///
    /// Walks the chain, so it is only safe to call from the consumer side or
    /// while the consumer is quiescent; intended for tests and introspection.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut node = self.head.load(Ordering::Relaxed);
        while !node.is_null() {
            count += 1;
            node = unsafe { &*node }.next.load(Ordering::Acquire);
        }
        count
    }

    /// Capacity of the node the producer is currently writing to.
    pub fn current_capacity(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        unsafe { &*tail }.ring.capacity()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }
    }
}
