//! Registry of per-thread producer queues.
//!
//! Producers allocate a queue on first log and hand it back by marking it
//! orphaned from a thread-local destructor; destruction is always performed
//! by the consumer. The live set is published copy-on-write: the consumer
//! drains from a snapshot `Arc` that is only swapped when one of two atomic
//! flags says something changed, so the per-record drain path never walks a
//! locked structure.
//!
//! Reclamation is two-phase: a refresh that observes `orphaned && empty`
//! moves the wrapper out of the current list into a pending batch, and the
//! *next* delete refresh drops that batch. By then no snapshot can reference
//! it, so the consumer never holds a retired wrapper across its release.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::clock;
use crate::queue::Queue;

/// Construction parameters for newly allocated producer queues. Installed by
/// the backend; threads that log before any backend exists get the defaults.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueConfig {
    pub initial_capacity: usize,
    pub max_node_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 4096,
            max_node_capacity: 64 * 1024 * 1024,
        }
    }
}

/// A producer queue plus the lifecycle state the consumer needs to retire it.
pub(crate) struct QueueWrapper {
    pub queue: Queue,
    owner: ThreadId,
    orphaned: AtomicBool,
    created_at: u64,
    orphaned_at: AtomicU64,
}

impl QueueWrapper {
    fn new(config: QueueConfig) -> Self {
        Self {
            queue: Queue::new(config.initial_capacity, config.max_node_capacity),
            owner: thread::current().id(),
            orphaned: AtomicBool::new(false),
            created_at: clock::now_ns(),
            orphaned_at: AtomicU64::new(0),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn orphaned_at(&self) -> u64 {
        self.orphaned_at.load(Ordering::Relaxed)
    }
}

type WrapperList = Arc<Vec<Arc<QueueWrapper>>>;

pub(crate) struct Registry {
    /// Authoritative list; the mutex doubles as the writer mutex for orphan
    /// marking so publishes are serialized.
    current: Mutex<WrapperList>,
    add_flag: AtomicBool,
    delete_flag: AtomicBool,
    dropped: AtomicU64,
    queue_config: Mutex<QueueConfig>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(Vec::new())),
            add_flag: AtomicBool::new(false),
            delete_flag: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            queue_config: Mutex::new(QueueConfig::default()),
        }
    }

    pub fn set_queue_config(&self, config: QueueConfig) {
        *self.queue_config.lock() = config;
    }

    pub fn queue_config(&self) -> QueueConfig {
        *self.queue_config.lock()
    }

    /// Allocates and publishes a queue for the calling thread.
    ///
    /// Copy-on-write: `Arc::make_mut` clones the vector exactly when the
    /// consumer's snapshot still shares it, leaving that snapshot untouched.
    pub fn allocate_for_current_thread(&self) -> Arc<QueueWrapper> {
        let config = self.queue_config();
        let wrapper = Arc::new(QueueWrapper::new(config));

        let mut current = self.current.lock();
        Arc::make_mut(&mut current).push(wrapper.clone());
        self.add_flag.store(true, Ordering::Release);

        wrapper
    }

    /// Called from the owning thread's exit hook. The queue keeps being
    /// drained; retirement happens in the consumer's delete refresh.
    pub fn mark_orphaned(&self, wrapper: &QueueWrapper) {
        let _writer = self.current.lock();
        wrapper.orphaned.store(true, Ordering::Release);
        wrapper.orphaned_at.store(clock::now_ns(), Ordering::Relaxed);
        if wrapper.queue.is_empty() {
            self.delete_flag.store(true, Ordering::Release);
        }
    }

    /// Raised by the consumer when it drains an orphaned queue empty.
    pub fn raise_delete_flag(&self) {
        self.delete_flag.store(true, Ordering::Release);
    }

    pub fn add_pending(&self) -> bool {
        self.add_flag.load(Ordering::Acquire)
    }

    pub fn delete_pending(&self) -> bool {
        self.delete_flag.load(Ordering::Acquire)
    }

    /// Add refresh: share the current list as the new snapshot.
    pub fn refresh_add(&self) -> WrapperList {
        let current = self.current.lock();
        self.add_flag.store(false, Ordering::Release);
        current.clone()
    }

    /// Delete refresh: retire every wrapper that is orphaned and drained.
    /// Returns the new snapshot and the batch the caller must keep alive
    /// until its next delete refresh.
    pub fn refresh_delete(&self) -> (WrapperList, Vec<Arc<QueueWrapper>>) {
        let mut current = self.current.lock();

        let mut retired = Vec::new();
        let list = Arc::make_mut(&mut current);
        list.retain(|wrapper| {
            let retire = wrapper.is_orphaned() && wrapper.queue.is_empty();
            if retire {
                retired.push(wrapper.clone());
            }
            !retire
        });

        self.delete_flag.store(false, Ordering::Release);
        (current.clone(), retired)
    }

    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn reset_dropped_count(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Number of live wrappers; test and introspection use.
    pub fn len(&self) -> usize {
        self.current.lock().len()
    }
}

lazy_static! {
    /// Process-wide registry. Producer threads log into it whether or not a
    /// backend is currently running, which is the initialization gate that
    /// keeps first-log from racing backend construction.
    pub(crate) static ref GLOBAL: Registry = Registry::new();
}

/// Owned handle kept in thread-local storage; its destructor is the
/// thread-exit hook that relinquishes the queue.
struct ThreadQueue {
    wrapper: Arc<QueueWrapper>,
}

impl Drop for ThreadQueue {
    fn drop(&mut self) {
        GLOBAL.mark_orphaned(&self.wrapper);
    }
}

thread_local! {
    static THREAD_QUEUE: RefCell<Option<ThreadQueue>> = const { RefCell::new(None) };
}

/// Runs `f` with the calling thread's queue, allocating it on first use.
///
/// Returns `None` when thread-local storage is already torn down (a log call
/// from another destructor during thread exit); the caller counts the record
/// as dropped.
#[inline]
pub(crate) fn with_thread_queue<R>(f: impl FnOnce(&Queue) -> R) -> Option<R> {
    THREAD_QUEUE
        .try_with(|slot| {
            let mut slot = slot.borrow_mut();
            let entry = slot.get_or_insert_with(|| ThreadQueue {
                wrapper: GLOBAL.allocate_for_current_thread(),
            });
            debug_assert_eq!(entry.wrapper.owner(), thread::current().id());
            f(&entry.wrapper.queue)
        })
        .ok()
}
