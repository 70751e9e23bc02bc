//! Commands sent from the caller to the engine.

use serde::{Deserialize, Serialize};

use crate::types::{
    AudioQuality, CameraPosition, ExposureMode, FocusMode, Orientation, Point, Position, Rect,
    TemperatureTint, VideoPreset, WhiteBalanceGains,
};

/// Commands that the caller can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start the camera. Valid once per engine.
    StartCapture,

    /// Connect and start a broadcast.
    StartBroadcast,

    /// Stop the current broadcast.
    StopBroadcast,

    /// Toggle between front and back camera.
    SwapCamera,

    /// Select a camera.
    SetCameraPosition(CameraPosition),

    /// Enable or disable the virtual (multi-lens) camera.
    SetVirtualCameraEnabled(bool),

    /// Set the zoom level.
    SetZoom(f32),

    /// Turn the torch on or off.
    SetTorch(bool),

    /// Set capture orientation, preview orientation and optional aspect crop.
    SetOrientation {
        orientation: Orientation,
        preview_orientation: Option<Orientation>,
        aspect: Option<(u32, u32)>,
    },

    /// Set the preview rectangle.
    SetPreviewFrame(Rect),

    /// Set the capture framerate range.
    SetFramerate { max: f32, min: Option<f32> },

    /// Set focus point and mode.
    SetFocus { point: Point, mode: FocusMode },

    /// Set exposure point and mode.
    SetExposure { point: Point, mode: ExposureMode },

    /// Set focus and exposure in one atomic step.
    SetPointOfInterest {
        point: Point,
        exposure_mode: ExposureMode,
        focus_mode: FocusMode,
    },

    /// Set the exposure target bias in EV.
    SetExposureTargetBias(f32),

    /// Lock white balance to the given gains.
    LockWhiteBalanceGains(WhiteBalanceGains),

    /// Lock white balance to the given temperature and tint.
    LockWhiteBalanceTemperatureTint(TemperatureTint),

    /// Lock white balance to the camera's current gains.
    LockCurrentWhiteBalance,

    /// Return to continuous white balance.
    UnlockWhiteBalance,

    /// Lock focus at the current lens position.
    LockCurrentLensPosition,

    /// Set the application identity.
    SetApplicationId(String),

    /// Set the author.
    SetAuthor(String),

    /// Set or update the title.
    SetTitle(String),

    /// Set or update the custom data.
    SetCustomData(String),

    /// Keep the broadcast on the server afterwards.
    SetSaveOnServer(bool),

    /// Write a local copy.
    SetSaveLocally(bool),

    /// Path of the local copy.
    SetLocalPath(Option<String>),

    /// Accept talkback requests in the next broadcast.
    SetTalkback(bool),

    /// Mix talkback audio into the broadcast.
    SetTalkbackMix(bool),

    /// Send the device position in the next broadcast.
    SetSendPosition(bool),

    /// Select the audio quality preset.
    SetAudioQuality(AudioQuality),

    /// Select the video quality preset.
    SetVideoPreset(VideoPreset),

    /// Bound the long edge of the live stream.
    SetMaxBroadcastDimension(u32),

    /// Accept a pending talkback request.
    AcceptTalkback(u32),

    /// Decline a pending talkback request.
    DeclineTalkback(u32),

    /// End the active talkback session.
    EndTalkback,

    /// Send a chat message.
    SendChat(String),

    /// Report the device position.
    UpdatePosition(Position),

    /// Take a snapshot of the next frame.
    TakeSnapshot,

    /// Run an uplink test.
    StartLinktest,

    /// Request current engine state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
