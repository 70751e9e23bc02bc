//! Encoded packets and session messages onto the send buffer.

use std::sync::Arc;
use std::time::Instant;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tracing::{debug, trace};

use livecast_encoder::{EncodedPacket, EncoderError, EncoderResult, PacketSink};
use livecast_transport::{
    annex_b_to_avcc, decoder_config_from_headers, ChatPayload, ControlMessage, Frame, FrameKind,
    SendBuffer, TransportError, TransportResult, FLAG_KEYFRAME,
};

/// `AudioConfig` frame payload.
#[derive(Debug, Serialize)]
struct AudioConfigPayload {
    codec: &'static str,
    sample_rate: u32,
    channels: u16,
    bitrate_kbps: u32,
}

fn pts_to_ms(pts_100ns: u64) -> u32 {
    (pts_100ns / 10_000).min(u32::MAX as u64) as u32
}

/// Map one encoder packet to its wire frame.
///
/// `VideoConfig` payload is `width u16 | height u16 | AVC decoder
/// configuration record`; video is AVCC without parameter sets. Returns
/// `None` for packets with nothing to send.
pub fn packet_to_frame(packet: &EncodedPacket) -> TransportResult<Option<Frame>> {
    let frame = match packet {
        EncodedPacket::VideoConfig {
            width,
            height,
            headers,
        } => {
            let Some(record) = decoder_config_from_headers(headers) else {
                debug!(len = headers.len(), "Encoder headers without SPS/PPS");
                return Ok(None);
            };
            let mut payload = BytesMut::with_capacity(4 + record.len());
            payload.put_u16((*width).min(u16::MAX as u32) as u16);
            payload.put_u16((*height).min(u16::MAX as u32) as u16);
            payload.put_slice(&record);
            Frame::new(FrameKind::VideoConfig, 0, payload.freeze())
        }
        EncodedPacket::Video(video) => {
            let avcc = annex_b_to_avcc(&video.data);
            if avcc.is_empty() {
                return Ok(None);
            }
            let frame = Frame::new(FrameKind::Video, pts_to_ms(video.pts_100ns), avcc);
            if video.is_keyframe {
                frame.with_flags(FLAG_KEYFRAME)
            } else {
                frame
            }
        }
        EncodedPacket::AudioConfig(config) => Frame::json(
            FrameKind::AudioConfig,
            0,
            &AudioConfigPayload {
                codec: "aac",
                sample_rate: config.sample_rate,
                channels: config.channels,
                bitrate_kbps: config.bitrate_kbps,
            },
        )?,
        EncodedPacket::Audio(audio) => Frame::new(
            FrameKind::Audio,
            pts_to_ms(audio.pts_100ns),
            audio.data.clone(),
        ),
    };
    Ok(Some(frame))
}

/// Session messages queued on the send buffer of the live connection.
#[derive(Clone)]
pub struct Outbound {
    buffer: Arc<SendBuffer>,
    epoch: Instant,
}

impl Outbound {
    pub fn new(buffer: Arc<SendBuffer>) -> Self {
        Self {
            buffer,
            epoch: Instant::now(),
        }
    }

    pub fn buffer(&self) -> &Arc<SendBuffer> {
        &self.buffer
    }

    fn timestamp_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis().min(u32::MAX as u128) as u32
    }

    pub fn control(&self, message: &ControlMessage) -> TransportResult<()> {
        self.buffer
            .push(Frame::json(FrameKind::Control, self.timestamp_ms(), message)?)
    }

    pub fn chat(&self, payload: &ChatPayload) -> TransportResult<()> {
        self.buffer
            .push(Frame::json(FrameKind::Chat, self.timestamp_ms(), payload)?)
    }

    /// Live stream sink for the encoder pipeline.
    pub fn media_sink(&self) -> LiveSink {
        LiveSink {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Encoder output for the live connection.
pub struct LiveSink {
    buffer: Arc<SendBuffer>,
}

impl PacketSink for LiveSink {
    fn send(&mut self, packet: EncodedPacket) -> EncoderResult<()> {
        let frame = match packet_to_frame(&packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => return Err(EncoderError::Encoding(e.to_string())),
        };
        match self.buffer.push(frame) {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected) => Err(EncoderError::OutputDisconnected),
            Err(e) => {
                trace!("Dropping live packet: {}", e);
                Ok(())
            }
        }
    }
}
