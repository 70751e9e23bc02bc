//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The current state of the broadcast session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// Engine is torn down.
    #[default]
    Idle,

    /// Preset applied, capture properties can still be changed.
    Prepared,

    /// Camera is running, no broadcast.
    Capturing,

    /// Connecting to the ingest server.
    Connecting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Live and streaming.
    Broadcasting {
        /// Broadcast identifier assigned by the server.
        broadcast_id: String,
    },

    /// Broadcast is being torn down.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,
    },
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::Prepared)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    pub fn is_broadcasting(&self) -> bool {
        matches!(self, Self::Broadcasting { .. })
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// True while a broadcast is connecting or live. Broadcast-scoped
    /// settings are frozen in this window.
    pub fn is_broadcast_active(&self) -> bool {
        self.is_connecting() || self.is_broadcasting()
    }

    /// True when `start_broadcasting` may be called.
    pub fn can_start(&self) -> bool {
        self.is_capturing()
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Prepared => "Prepared",
            Self::Capturing => "Capturing",
            Self::Connecting { .. } => "Connecting",
            Self::Broadcasting { .. } => "Broadcasting",
            Self::Stopping { .. } => "Stopping",
        }
    }
}

/// Startup phases of a broadcast, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Starting the audio mixer.
    InitAudio,

    /// Connecting to the ingest server.
    ConnectIngest,

    /// Creating encoders and the local recording.
    InitEncoder,

    /// Starting the uplink monitor.
    StartTransmission,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::InitAudio => Some(Self::ConnectIngest),
            Self::ConnectIngest => Some(Self::InitEncoder),
            Self::InitEncoder => Some(Self::StartTransmission),
            Self::StartTransmission => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::InitAudio => None,
            Self::ConnectIngest => Some(Self::InitAudio),
            Self::InitEncoder => Some(Self::ConnectIngest),
            Self::StartTransmission => Some(Self::InitEncoder),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::InitAudio => "Initializing audio",
            Self::ConnectIngest => "Connecting to server",
            Self::InitEncoder => "Initializing encoder",
            Self::StartTransmission => "Starting stream",
        }
    }
}

/// Reason a broadcast stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// Caller requested stop.
    UserRequested,

    /// Network connection lost.
    NetworkLost { message: String },

    /// Server ended the broadcast.
    ServerClosed { message: String },

    /// Encoder error.
    EncoderError { message: String },

    /// Capture error.
    CaptureError { message: String },

    /// Engine is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Broadcast stopped by user".to_string(),
            Self::NetworkLost { message } => format!("Network connection lost: {message}"),
            Self::ServerClosed { message } => format!("Server closed the broadcast: {message}"),
            Self::EncoderError { message } => format!("Encoder error: {message}"),
            Self::CaptureError { message } => format!("Capture error: {message}"),
            Self::Shutdown => "Engine shut down".to_string(),
        }
    }
}
