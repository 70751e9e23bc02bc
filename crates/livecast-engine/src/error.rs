//! Error types for the engine.

use thiserror::Error;

use livecast_audio::AudioError;
use livecast_capture::CaptureError;
use livecast_encoder::EncoderError;
use livecast_transport::TransportError;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The device or build lacks the requested capability.
    #[error("Capability not supported: {0}")]
    CapabilityUnsupported(String),

    /// The operation is not allowed in the current session state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// No pending or active talkback with this id.
    #[error("Unknown talkback id: {0}")]
    UnknownTalkbackId(u32),

    /// The ingest server could not be reached or refused the session.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Value rejected at the API boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Capture error: {0}")]
    Capture(#[source] CaptureError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Thread error: {0}")]
    Thread(String),
}

impl EngineError {
    pub(crate) fn invalid_state(operation: &'static str, state: &livecast_ipc::SessionState) -> Self {
        Self::InvalidState {
            operation,
            state: state.name(),
        }
    }
}

impl From<CaptureError> for EngineError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::Unsupported(what) => Self::CapabilityUnsupported(what),
            CaptureError::InvalidArgument(what) => Self::InvalidArgument(what),
            CaptureError::Immutable(what) => Self::InvalidState {
                operation: what,
                state: "Capturing",
            },
            other => Self::Capture(other),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::ConnectionFailed(message)
            | TransportError::ConnectionLost(message)
            | TransportError::Rejected(message)
            | TransportError::Timeout(message) => Self::NetworkFailure(message),
            TransportError::MissingApplicationId => {
                Self::InvalidArgument("application id is not set".to_string())
            }
            TransportError::LinktestRunning => Self::InvalidState {
                operation: "start a link test",
                state: "link test running",
            },
            other => Self::Transport(other),
        }
    }
}
