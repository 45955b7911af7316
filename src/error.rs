use std::io;

use thiserror::Error;

/// Errors surfaced at backend construction time.
///
/// Hot-path failures are never reported through this type: a log call that
/// cannot reserve queue space is counted in the dropped-record counter, and
/// sink I/O errors are reported once on stderr and then suppressed.
#[derive(Debug, Error)]
pub enum Error {
    /// The log directory could not be created or the initial file could not
    /// be opened.
    #[error("log sink initialization failed: {0}")]
    Io(#[from] io::Error),

    /// Another backend instance currently owns the consumer role.
    #[error("a logging backend is already running in this process")]
    AlreadyRunning,
}
