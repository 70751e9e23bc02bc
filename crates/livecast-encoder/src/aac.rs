//! AAC-LC encoding with fdk-aac.

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::error::EncoderError;
use crate::{AudioEncoder, AudioEncoderConfig, EncodedAudioPacket, EncoderResult};

/// Samples per channel in one AAC-LC access unit.
const FRAME_SAMPLES: usize = 1024;

/// AAC-LC encoder producing raw access units.
///
/// Input is interleaved f32 at the configured channel count. Packet
/// timestamps follow the samples, anchored at the first chunk's timestamp,
/// so buffering does not skew audio against video.
pub struct AacEncoder {
    encoder: fdk_aac::enc::Encoder,
    sample_rate: u64,
    channels: usize,
    pending: Vec<f32>,
    pcm: Vec<i16>,
    out: Vec<u8>,
    /// Stream time of the first buffered sample.
    anchor_100ns: Option<u64>,
    /// Per-channel samples consumed since the anchor.
    consumed: u64,
}

impl AacEncoder {
    #[instrument(name = "aac_new", skip_all, fields(bitrate_kbps = config.bitrate_kbps))]
    pub fn new(config: AudioEncoderConfig) -> EncoderResult<Self> {
        let channels = match config.channels {
            1 => fdk_aac::enc::ChannelMode::Mono,
            2 => fdk_aac::enc::ChannelMode::Stereo,
            n => {
                return Err(EncoderError::Initialization(format!("{} audio channels", n)));
            }
        };

        let encoder = fdk_aac::enc::Encoder::new(fdk_aac::enc::EncoderParams {
            bit_rate: fdk_aac::enc::BitRate::Cbr(config.bitrate_kbps * 1000),
            sample_rate: config.sample_rate,
            transport: fdk_aac::enc::Transport::Raw,
            channels,
        })
        .map_err(|e| EncoderError::Initialization(format!("fdk-aac: {:?}", e)))?;
        let info = encoder
            .info()
            .map_err(|e| EncoderError::Initialization(format!("fdk-aac: {:?}", e)))?;

        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            max_access_unit = info.maxOutBufBytes,
            "AAC ready"
        );

        let block = FRAME_SAMPLES * config.channels as usize;
        Ok(Self {
            encoder,
            sample_rate: u64::from(config.sample_rate.max(1)),
            channels: config.channels as usize,
            pending: Vec::with_capacity(block * 2),
            pcm: Vec::with_capacity(block),
            out: vec![0; info.maxOutBufBytes as usize],
            anchor_100ns: None,
            consumed: 0,
        })
    }

    fn block_len(&self) -> usize {
        FRAME_SAMPLES * self.channels
    }

    fn next_pts(&self) -> u64 {
        self.anchor_100ns.unwrap_or(0) + self.consumed * 10_000_000 / self.sample_rate
    }

    /// Encode one full block from the front of `pending`.
    fn encode_block(&mut self) -> EncoderResult<Option<EncodedAudioPacket>> {
        let block = self.block_len();
        self.pcm.clear();
        self.pcm.extend(
            self.pending
                .drain(..block)
                .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16),
        );

        let pts_100ns = self.next_pts();
        self.consumed += FRAME_SAMPLES as u64;

        let info = self
            .encoder
            .encode(&self.pcm, &mut self.out)
            .map_err(|e| EncoderError::Encoding(format!("fdk-aac: {:?}", e)))?;
        // Encoder delay: the first blocks produce nothing
        if info.output_size == 0 {
            return Ok(None);
        }
        Ok(Some(EncodedAudioPacket {
            data: Bytes::copy_from_slice(&self.out[..info.output_size]),
            pts_100ns,
        }))
    }
}

impl AudioEncoder for AacEncoder {
    fn encode(&mut self, samples: &[f32], pts_100ns: u64) -> EncoderResult<Option<EncodedAudioPacket>> {
        if self.anchor_100ns.is_none() {
            self.anchor_100ns = Some(pts_100ns);
        }
        self.pending.extend_from_slice(samples);
        if self.pending.len() < self.block_len() {
            return Ok(None);
        }
        trace!(pending = self.pending.len(), "AAC block");
        // The pipeline feeds 10 ms chunks, so at most one block is ready
        self.encode_block()
    }

    fn flush(&mut self) -> EncoderResult<Vec<EncodedAudioPacket>> {
        let mut packets = Vec::new();
        while self.pending.len() >= self.block_len() {
            packets.extend(self.encode_block()?);
        }
        if !self.pending.is_empty() {
            let block = self.block_len();
            self.pending.resize(block, 0.0);
            packets.extend(self.encode_block()?);
        }
        debug!(packets = packets.len(), "AAC flushed");
        Ok(packets)
    }

    fn name(&self) -> &'static str {
        "fdk-aac"
    }
}
