//! Session error types.

use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// Everything that happens on an established connection (resets, timeouts,
/// malformed frames) is absorbed by the reconnect loop and never reaches the
/// caller. What remains is configuration rejected up front, I/O raised
/// outside the recovery path, and misuse of a finished session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration rejected before any connection attempt.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error outside the reconnect loop.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame construction failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] vtu_protocol::ProtocolError),

    /// Route file could not be read or parsed.
    #[error("route file error: {0}")]
    RouteFile(String),

    /// The session already ran to completion and cannot be restarted.
    #[error("session closed")]
    Closed,
}
