//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// No encoder implementation is available in this build.
    #[error("Encoder not supported: {0}")]
    NotSupported(String),

    /// Quality preset other than automatic.
    #[error("Unsupported quality preset: {0}")]
    UnsupportedPreset(String),

    /// General initialization error.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// General encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Pipeline already running.
    #[error("Encoder pipeline already started")]
    AlreadyStarted,

    /// Worker thread could not be spawned or panicked.
    #[error("Encoder thread error: {0}")]
    Thread(String),

    /// Downstream consumer went away.
    #[error("Encoded output disconnected")]
    OutputDisconnected,
}
