//! Asynchronous low-latency logging with deferred formatting.
//!
//! A log call serializes its raw arguments (not text) into a lock-free
//! queue owned by the calling thread, together with a function pointer that
//! knows how to render exactly that call site's argument types. All
//! formatting and file I/O happens on one background consumer thread, which
//! merges the per-thread queues in timestamp order and writes rotating
//! `YYYY-MM-DD_N.log` files.
//!
//! ```no_run
//! use deferlog::{info, Backend, Config};
//!
//! let backend = Backend::new(Config::default()).unwrap();
//! backend.start();
//!
//! info!("pi={} name={}", 3.1415, "test");
//!
//! backend.stop();
//! ```
//!
//! The hot path is a timestamp sample, a size computation, one reservation
//! on an SPSC byte ring, and a handful of copies; it never locks, blocks, or
//! allocates (queue growth allocates, amortized by capacity doubling). When
//! a queue reaches its capacity cap further records are dropped and counted
//! rather than ever stalling the caller.

pub mod backend;
pub mod clock;
pub mod codec;
pub mod error;
pub mod format;
pub mod level;
pub mod queue;
mod registry;
pub mod ring;
pub mod sink;
pub mod stage;

mod macros;

pub use backend::{Backend, Config};
pub use codec::StaticStr;
pub use error::Error;
pub use level::{level_enabled, Level, MIN_LEVEL};
