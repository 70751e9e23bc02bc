//! Audio chunk type.

use crate::error::AudioError;
use crate::{AudioResult, CHANNELS, SAMPLES_PER_CHUNK};

/// 10ms of interleaved stereo f32 audio at 48kHz.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,

    /// Presentation timestamp in 100ns units.
    pub pts_100ns: u64,

    /// Sequence number.
    pub sequence: u64,
}

impl AudioChunk {
    /// Interleaved sample count of a full chunk.
    pub const LEN: usize = SAMPLES_PER_CHUNK * CHANNELS as usize;

    pub fn new(samples: Vec<f32>, pts_100ns: u64, sequence: u64) -> Self {
        Self {
            samples,
            pts_100ns,
            sequence,
        }
    }

    /// A chunk of silence.
    pub fn silence(pts_100ns: u64, sequence: u64) -> Self {
        Self::new(vec![0.0; Self::LEN], pts_100ns, sequence)
    }

    /// Presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }

    /// Encode samples as little-endian f32.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Decode little-endian f32 samples, e.g. talkback audio from the network.
    pub fn from_le_bytes(data: &[u8], pts_100ns: u64, sequence: u64) -> AudioResult<Self> {
        if data.len() % (4 * CHANNELS as usize) != 0 {
            return Err(AudioError::FormatNotSupported(format!(
                "{} bytes is not whole stereo f32 frames",
                data.len()
            )));
        }
        let samples = data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self::new(samples, pts_100ns, sequence))
    }
}
