use std::io;

use thiserror::Error;

/// Transient errors are retried inside the reader/writer loops and never
/// surface to callers. Everything else kills the connection incarnation.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[derive(Debug, Error)]
pub enum DialError {
    /// The dial loop retries forever; the only way out without a connection
    /// is the owning scope getting cancelled.
    #[error("dial loop cancelled before a connection was established")]
    Cancelled,
}
