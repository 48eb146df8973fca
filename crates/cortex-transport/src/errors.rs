//! Transport error types.

use thiserror::Error;

/// Errors produced by transport operations.
///
/// [`TransportError::Timeout`] and [`TransportError::Eof`] are the two
/// variants higher layers branch on: a timeout is fatal for the session, and
/// EOF at a frame boundary is the clean shutdown signal. Everything else is
/// reported upward unmodified; the core never retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The receive deadline elapsed before any byte arrived.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the carrier cleanly.
    #[error("peer closed the transport")]
    Eof,

    /// The peer vanished mid-operation.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// This endpoint already called `close`.
    #[error("transport is closed")]
    Closed,

    /// Active connect failed or timed out.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Peer address in `host:port` form.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Bind/listen/accept failed or the accept deadline elapsed.
    #[error("accept failed: {source}")]
    Accept {
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// The transport URI could not be parsed.
    #[error("invalid transport uri: {0}")]
    InvalidUri(String),

    /// The URI parsed but describes an unusable configuration (bad baud,
    /// empty shm name, role mismatch).
    #[error("transport configuration: {0}")]
    Config(String),

    /// Any other I/O failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
