//! Audio mixing for live broadcasting.
//!
//! Microphone audio is mixed with inbound talkback audio. The mix feeds the
//! audio encoder; talkback is always played on the local monitor output and
//! only reaches the mix when talkback mixing is enabled.

mod chunk;
mod error;
mod level;
mod mixer;
mod source;

pub use chunk::AudioChunk;
pub use error::AudioError;
pub use level::{LevelMeter, SILENCE_DB};
pub use mixer::{AudioMixer, MixerOutputs};
pub use source::{AudioSource, ToneSource};

/// Channel capacity for audio chunks.
pub const AUDIO_CHANNEL_CAPACITY: usize = 8;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of audio channels.
pub const CHANNELS: u16 = 2;

/// Samples per audio chunk per channel (10ms at 48kHz).
pub const SAMPLES_PER_CHUNK: usize = 480;
