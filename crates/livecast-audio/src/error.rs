//! Error types for the audio module.

use thiserror::Error;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Audio source not found.
    #[error("Audio source not found: {0}")]
    DeviceNotFound(String),

    /// Audio format not supported.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// Capture already started.
    #[error("Audio capture already started")]
    AlreadyStarted,

    /// Capture not started.
    #[error("Audio capture not started")]
    NotStarted,

    /// Device lost during capture.
    #[error("Audio device lost")]
    DeviceLost,

    /// Channel send error.
    #[error("Failed to send audio: channel disconnected")]
    ChannelDisconnected,

    /// Worker thread could not be spawned or panicked.
    #[error("Audio thread error: {0}")]
    Thread(String),

    /// Mixer error.
    #[error("Mixer error: {0}")]
    MixerError(String),
}
