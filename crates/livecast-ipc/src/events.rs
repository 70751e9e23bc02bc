//! Events sent from the engine to the caller.

use serde::{Deserialize, Serialize};

use crate::state::{SessionState, StopReason};
use crate::types::{
    ChatMessage, Snapshot, StreamMetrics, TalkbackRequest, TalkbackState, WarningType,
};

/// Events that the engine can send to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// Server accepted the broadcast.
    ConnectionEstablished { broadcast_id: String },

    /// Connecting to the server failed.
    ConnectionFailed { message: String },

    /// The broadcast stopped.
    BroadcastStopped { reason: StopReason },

    /// Updated stream metrics.
    Metrics(StreamMetrics),

    /// Performance warning detected.
    PerformanceWarning(WarningType),

    /// The live stream moved to another quality rung.
    QualityChanged {
        width: u32,
        height: u32,
        bitrate_kbps: u32,
    },

    /// A snapshot was produced.
    SnapshotTaken(Snapshot),

    /// A viewer requested talkback.
    TalkbackRequested(TalkbackRequest),

    /// Talkback channel state changed.
    TalkbackStateChanged(TalkbackState),

    /// The active talkback ended.
    TalkbackEnded { talkback_id: u32 },

    /// Link test finished.
    LinktestCompleted {
        /// Measured speed in bytes per second.
        speed_bytes_per_sec: f32,

        /// Whether broadcasting is recommended.
        recommendation: bool,
    },

    /// A chat message arrived.
    ChatMessage(ChatMessage),

    /// A local recording was finalized.
    RecordingComplete { path: String },

    /// Error occurred.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
