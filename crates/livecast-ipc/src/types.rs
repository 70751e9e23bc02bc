//! Common types used across IPC messages.

use serde::{Deserialize, Serialize};

/// Server-side limit for the custom data field, in bytes.
pub const MAX_CUSTOM_DATA_BYTES: usize = 10_000;

/// Lowest accepted capture framerate.
pub const MIN_FRAMERATE: f32 = 24.0;

/// Highest accepted capture framerate.
pub const MAX_FRAMERATE: f32 = 30.0;

/// Bounds for a non-zero `max_broadcast_dimension`.
pub const MIN_BROADCAST_DIMENSION: u32 = 200;
pub const MAX_BROADCAST_DIMENSION: u32 = 1280;

/// Interface orientation of the capture or of the preview UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    #[default]
    LandscapeRight,
}

impl Orientation {
    /// Returns true for the two portrait orientations.
    pub fn is_portrait(self) -> bool {
        matches!(self, Self::Portrait | Self::PortraitUpsideDown)
    }

    /// Returns true if `other` is this orientation or its 180 degree flip.
    pub fn same_axis(self, other: Orientation) -> bool {
        self.is_portrait() == other.is_portrait()
    }

    /// Clockwise rotation in quarter turns from the sensor's native
    /// landscape-right orientation.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Self::LandscapeRight => 0,
            Self::Portrait => 1,
            Self::LandscapeLeft => 2,
            Self::PortraitUpsideDown => 3,
        }
    }
}

/// Which physical camera is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraPosition {
    #[default]
    Back,
    Front,
    /// Setting this has no effect.
    Unspecified,
}

impl CameraPosition {
    /// The opposite camera, used by camera swap.
    pub fn opposite(self) -> Self {
        match self {
            Self::Back => Self::Front,
            Self::Front => Self::Back,
            Self::Unspecified => Self::Unspecified,
        }
    }
}

/// Video quality preset.
///
/// Only `Auto` is accepted. The fixed presets are kept so older callers get
/// an explicit rejection instead of a parse error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoPreset {
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

/// Audio quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioQuality {
    #[default]
    High,
    Low,
    /// No audio track.
    Off,
}

impl AudioQuality {
    /// AAC bitrate for this preset, `None` when audio is disabled.
    pub fn bitrate_kbps(self) -> Option<u32> {
        match self {
            Self::High => Some(96),
            Self::Low => Some(32),
            Self::Off => None,
        }
    }

    /// Channel count for this preset.
    pub fn channels(self) -> u16 {
        match self {
            Self::High => 2,
            Self::Low | Self::Off => 1,
        }
    }
}

/// A point in the preview (view) coordinate space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A rectangle in the preview coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center of the rectangle.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1280.0, 720.0)
    }
}

/// Focus mode of the active camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

/// Exposure mode of the active camera.
///
/// `Custom` (manual ISO / shutter) is never supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExposureMode {
    Locked,
    AutoExpose,
    ContinuousAutoExposure,
    Custom,
}

/// Red, green and blue white balance gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalanceGains {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl WhiteBalanceGains {
    pub fn new(red: f32, green: f32, blue: f32) -> Self {
        Self { red, green, blue }
    }

    /// Unity gains.
    pub fn neutral() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// Correlated color temperature (kelvin) and green/magenta tint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureTint {
    pub temperature: f32,
    pub tint: f32,
}

impl TemperatureTint {
    pub fn new(temperature: f32, tint: f32) -> Self {
        Self { temperature, tint }
    }
}

/// Capture configuration applied by `start_capture`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Video quality preset.
    pub preset: VideoPreset,

    /// Maximum capture framerate.
    pub max_framerate: f32,

    /// Minimum capture framerate.
    pub min_framerate: f32,

    /// Orientation the video is recorded in.
    pub orientation: Orientation,

    /// Orientation of the UI showing the preview.
    pub preview_orientation: Orientation,

    /// Aspect ratio crop (width, height), `None` for the camera's native aspect.
    pub aspect: Option<(u32, u32)>,

    /// Upper bound for the long edge of the live stream, 0 for no bound.
    pub max_broadcast_dimension: u32,

    /// Active camera.
    pub camera_position: CameraPosition,

    /// Use every lens of a virtual camera when zooming.
    pub virtual_camera_enabled: bool,

    /// Preview rectangle in view coordinates.
    pub preview_frame: Rect,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preset: VideoPreset::Auto,
            max_framerate: MAX_FRAMERATE,
            min_framerate: MIN_FRAMERATE,
            orientation: Orientation::LandscapeRight,
            preview_orientation: Orientation::LandscapeRight,
            aspect: None,
            max_broadcast_dimension: 0,
            camera_position: CameraPosition::Back,
            virtual_camera_enabled: true,
            preview_frame: Rect::default(),
        }
    }
}

/// Settings describing the next (or current) broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastSettings {
    /// Application identity, used to route to an ingest server.
    pub application_id: String,

    /// Author associated with the broadcast.
    pub author: String,

    /// Title, can be updated live.
    pub title: String,

    /// Arbitrary data, can be updated live.
    pub custom_data: String,

    /// Keep the broadcast available on demand afterwards.
    pub save_on_server: bool,

    /// Write a local copy of the broadcast.
    pub save_locally: bool,

    /// Path of the local copy, `None` for a unique file in the temp dir.
    pub local_path: Option<String>,

    /// Accept talkback requests.
    pub talkback: bool,

    /// Mix talkback audio into the broadcast and the local copy.
    pub talkback_mix: bool,

    /// Continuously send the device position.
    pub send_position: bool,

    /// Audio quality preset.
    pub audio_quality: AudioQuality,
}

/// Uplink health and link-test results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UplinkMetrics {
    /// Stream health, 0 (congested) to 100 (healthy).
    pub health: u8,

    /// Measured uplink speed in bytes per second.
    pub speed_bytes_per_sec: f32,

    /// Whether broadcasting is recommended.
    pub recommendation: bool,
}

/// Real-time stream metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Current video frames per second.
    pub fps: f32,

    /// Target video frames per second.
    pub target_fps: f32,

    /// Current outgoing bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Target bitrate of the active rung in kbps.
    pub target_bitrate_kbps: u32,

    /// Live stream width.
    pub width: u32,

    /// Live stream height.
    pub height: u32,

    /// Total dropped frames since stream start.
    pub dropped_frames: u64,

    /// Frames dropped between capture and encoder.
    pub capture_drops: u64,

    /// Frames that failed to encode.
    pub encode_drops: u64,

    /// Frames dropped from the send buffer.
    pub network_drops: u64,

    /// Stream health, 0 to 100.
    pub health: u8,

    /// Bytes waiting in the send buffer.
    pub backlog_bytes: u64,

    /// Stream uptime in seconds.
    pub uptime_seconds: u64,
}

/// Types of performance warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WarningType {
    /// The uplink cannot keep up.
    NetworkCongestion { health: u8 },

    /// Frames are being dropped before the encoder.
    CaptureDrops { count: u64 },

    /// Frames are failing to encode.
    EncodeDrops { count: u64 },
}

/// An inbound talkback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkbackRequest {
    /// Identifier, unique among pending requests.
    pub talkback_id: u32,

    /// Caller identity.
    pub caller: String,
}

/// Current state of the talkback channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TalkbackState {
    #[default]
    Idle,
    /// At least one request awaits an answer, none is active.
    Pending,
    /// A talkback session is active.
    Active,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender name, `None` for messages from this client.
    pub from: Option<String>,

    /// Message body.
    pub text: String,
}

/// A still image taken from the camera, NV12.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Device position sent during a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_axis() {
        assert!(Orientation::LandscapeLeft.same_axis(Orientation::LandscapeRight));
        assert!(Orientation::Portrait.same_axis(Orientation::PortraitUpsideDown));
        assert!(!Orientation::Portrait.same_axis(Orientation::LandscapeRight));
    }

    #[test]
    fn test_camera_position_opposite() {
        assert_eq!(CameraPosition::Back.opposite(), CameraPosition::Front);
        assert_eq!(
            CameraPosition::Unspecified.opposite(),
            CameraPosition::Unspecified
        );
    }

    #[test]
    fn test_audio_quality_bitrates() {
        assert_eq!(AudioQuality::High.bitrate_kbps(), Some(96));
        assert_eq!(AudioQuality::Off.bitrate_kbps(), None);
    }
}
