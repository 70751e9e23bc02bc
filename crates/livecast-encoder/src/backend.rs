//! Encoder construction.

use crate::{AudioEncoder, AudioEncoderConfig, EncoderResult, VideoEncoder, VideoEncoderConfig};

/// Creates encoders for the pipeline. A pipeline creates a new live video
/// encoder on every rung change.
pub trait EncoderBackend: Send + Sync {
    fn video(&self, config: VideoEncoderConfig) -> EncoderResult<Box<dyn VideoEncoder>>;

    fn audio(&self, config: AudioEncoderConfig) -> EncoderResult<Box<dyn AudioEncoder>>;
}

/// Encoders compiled into this build: x264 with the `x264` feature and
/// fdk-aac with the `aac` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackend;

impl EncoderBackend for DefaultBackend {
    fn video(&self, config: VideoEncoderConfig) -> EncoderResult<Box<dyn VideoEncoder>> {
        create_video_encoder(config)
    }

    fn audio(&self, config: AudioEncoderConfig) -> EncoderResult<Box<dyn AudioEncoder>> {
        create_audio_encoder(config)
    }
}

#[cfg(feature = "x264")]
fn create_video_encoder(config: VideoEncoderConfig) -> EncoderResult<Box<dyn VideoEncoder>> {
    let encoder = crate::x264::X264Encoder::new(config)?;
    tracing::info!("Using x264 software encoder");
    Ok(Box::new(encoder))
}

#[cfg(not(feature = "x264"))]
fn create_video_encoder(_config: VideoEncoderConfig) -> EncoderResult<Box<dyn VideoEncoder>> {
    Err(crate::EncoderError::NotSupported(
        "built without the x264 feature".into(),
    ))
}

#[cfg(feature = "aac")]
fn create_audio_encoder(config: AudioEncoderConfig) -> EncoderResult<Box<dyn AudioEncoder>> {
    let encoder = crate::aac::AacEncoder::new(config)?;
    Ok(Box::new(encoder))
}

#[cfg(not(feature = "aac"))]
fn create_audio_encoder(_config: AudioEncoderConfig) -> EncoderResult<Box<dyn AudioEncoder>> {
    Err(crate::EncoderError::NotSupported(
        "built without the aac feature".into(),
    ))
}

#[cfg(all(test, not(feature = "x264")))]
mod tests {
    use super::*;
    use crate::EncoderError;

    #[test]
    fn test_default_backend_without_x264() {
        let result = DefaultBackend.video(VideoEncoderConfig::default());
        assert!(matches!(result, Err(EncoderError::NotSupported(_))));
    }
}
