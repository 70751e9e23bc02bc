//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The driver reported no camera at all.
    #[error("No camera available")]
    NoDevice,

    /// Camera not found.
    #[error("Camera not found: {0}")]
    SourceNotFound(String),

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Capture not started.
    #[error("Capture not started")]
    NotStarted,

    /// The active camera lacks the requested capability.
    #[error("Not supported by the current camera: {0}")]
    Unsupported(String),

    /// Value outside what the camera accepts.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Property cannot change once capture is running.
    #[error("Cannot change {0} while capturing")]
    Immutable(&'static str),

    /// Device lost during capture.
    #[error("Capture device lost")]
    DeviceLost,

    /// Platform driver failure.
    #[error("Camera driver error: {0}")]
    Driver(String),

    /// Channel send error.
    #[error("Failed to send frame: channel disconnected")]
    ChannelDisconnected,
}
