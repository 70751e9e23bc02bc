//! Adaptive video and audio encoding.
//!
//! Frames from the capture source are rotated, cropped and scaled to the
//! current rung of a [`QualityLadder`] and encoded for the live stream. An
//! optional second encoder produces the local recording at full resolution,
//! independent of live adaptation. H.264 (x264) and AAC (fdk-aac) backends
//! are enabled with the `x264` and `aac` features.

#[cfg(feature = "aac")]
mod aac;
mod adaptation;
mod backend;
mod control;
mod error;
mod ladder;
mod pipeline;
mod scale;
#[cfg(feature = "x264")]
mod x264;

#[cfg(feature = "aac")]
pub use aac::AacEncoder;
pub use adaptation::{AdaptationController, AdaptationDecision, AdaptationParams, UplinkWindow};
pub use backend::{DefaultBackend, EncoderBackend};
pub use control::EncoderControl;
pub use error::EncoderError;
pub use ladder::{QualityLadder, QualityRung};
pub use pipeline::{EncodedPacket, EncoderPipeline, PacketSink, PipelineConfig, PipelineStats};
pub use scale::Nv12Transform;
#[cfg(feature = "x264")]
pub use x264::X264Encoder;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use livecast_ipc::AudioQuality;

/// Channel capacity for encoded packets.
pub const ENCODED_CHANNEL_CAPACITY: usize = 8;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Target frames per second.
    pub fps: u32,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,

    /// H.264 profile.
    pub profile: H264Profile,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_kbps: 2500,
            keyframe_interval_secs: 2,
            profile: H264Profile::Main,
        }
    }
}

/// H.264 profile levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

/// Audio encoding configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of channels.
    pub channels: u16,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,
}

impl AudioEncoderConfig {
    /// Encoder settings for an audio quality preset, `None` when audio is off.
    pub fn for_quality(quality: AudioQuality) -> Option<Self> {
        quality.bitrate_kbps().map(|bitrate_kbps| Self {
            sample_rate: livecast_audio::SAMPLE_RATE,
            channels: quality.channels(),
            bitrate_kbps,
        })
    }
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: livecast_audio::SAMPLE_RATE,
            channels: livecast_audio::CHANNELS,
            bitrate_kbps: 96,
        }
    }
}

/// An encoded video packet.
#[derive(Debug, Clone)]
pub struct EncodedVideoPacket {
    /// Encoded NAL data (Annex B).
    pub data: Bytes,

    /// Presentation timestamp in 100ns units.
    pub pts_100ns: u64,

    /// Decode timestamp in 100ns units.
    pub dts_100ns: u64,

    /// Whether this is a keyframe.
    pub is_keyframe: bool,

    /// Frame type for priority ordering.
    pub frame_type: FrameType,
}

/// Video frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameType {
    /// I-frame (keyframe) - highest priority.
    I = 0,

    /// P-frame - medium priority.
    P = 1,

    /// B-frame - lowest priority.
    B = 2,
}

/// An encoded audio packet.
#[derive(Debug, Clone)]
pub struct EncodedAudioPacket {
    /// Encoded AAC data.
    pub data: Bytes,

    /// Presentation timestamp in 100ns units.
    pub pts_100ns: u64,
}

/// Trait for video encoders.
pub trait VideoEncoder: Send {
    /// Encode a frame in NV12 format.
    fn encode(&mut self, frame: &[u8], pts_100ns: u64)
        -> EncoderResult<Option<EncodedVideoPacket>>;

    /// Flush any remaining frames.
    fn flush(&mut self) -> EncoderResult<Vec<EncodedVideoPacket>>;

    /// Stream headers (SPS/PPS in Annex B) sent ahead of the first frame.
    fn headers(&self) -> Option<Bytes>;

    /// Check if the encoder supports hardware acceleration.
    fn is_hardware_accelerated(&self) -> bool;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Trait for audio encoders.
pub trait AudioEncoder: Send {
    /// Encode audio samples.
    fn encode(
        &mut self,
        samples: &[f32],
        pts_100ns: u64,
    ) -> EncoderResult<Option<EncodedAudioPacket>>;

    /// Flush any remaining samples.
    fn flush(&mut self) -> EncoderResult<Vec<EncodedAudioPacket>>;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}
