//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The server refused the session.
    #[error("Server rejected the session: {0}")]
    Rejected(String),

    /// An operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Invalid ingest URL.
    #[error("Invalid ingest URL: {0}")]
    InvalidUrl(String),

    /// Malformed frame on the wire.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame payload above the protocol limit.
    #[error("Frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// Already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// A link test is already running.
    #[error("Link test already running")]
    LinktestRunning,

    /// The link test needs an application id.
    #[error("Application id is required")]
    MissingApplicationId,

    /// Channel disconnected.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload error.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}
