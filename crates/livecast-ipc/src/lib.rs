//! Typed caller<->engine messages for the live broadcaster.
//!
//! This crate defines all the message types used for communication between
//! the controlling application and the engine core.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{SessionState, StartupPhase, StopReason};
pub use types::{
    AudioQuality, BroadcastSettings, CameraPosition, CaptureConfig, ChatMessage, ExposureMode,
    FocusMode, Orientation, Point, Position, Rect, Snapshot, StreamMetrics, TalkbackRequest,
    TalkbackState, TemperatureTint, UplinkMetrics, VideoPreset, WarningType, WhiteBalanceGains,
    MAX_BROADCAST_DIMENSION, MAX_CUSTOM_DATA_BYTES, MAX_FRAMERATE, MIN_BROADCAST_DIMENSION,
    MIN_FRAMERATE,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (caller → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → caller).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
