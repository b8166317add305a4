//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid RTMP URL.
    #[error("Invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// Connection or handshake failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection attempt exceeded its deadline.
    #[error("Connection timed out after {0} ms")]
    Timeout(u64),

    /// Opened without parameter sets.
    #[error("No media info set before open")]
    MissingMediaInfo,

    /// The session is already connecting or connected.
    #[error("Session already open")]
    AlreadyOpen,

    /// The session has been closed; a new one must be constructed.
    #[error("Session closed")]
    Closed,

    /// Sending a packet failed.
    #[error("Send error: {0}")]
    Send(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
