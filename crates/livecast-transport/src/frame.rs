//! Wire framing.
//!
//! Every frame is a 10 byte header followed by the payload:
//!
//! ```text
//! kind u8 | flags u8 | timestamp_ms u32 | length u32 | payload
//! ```
//!
//! All integers are big-endian. Hello, control, chat and link-test report
//! payloads are JSON; media payloads are raw codec data.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use livecast_ipc::Position;

use crate::error::TransportError;
use crate::send_buffer::Lane;
use crate::{TransportResult, MAX_FRAME_PAYLOAD};

/// Version announced in [`SessionHello`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Set on video frames that start a keyframe.
pub const FLAG_KEYFRAME: u8 = 0x01;

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Hello = 0x01,
    HelloAck = 0x02,
    Video = 0x10,
    /// AVC decoder configuration record.
    VideoConfig = 0x11,
    Audio = 0x12,
    AudioConfig = 0x13,
    Chat = 0x20,
    Control = 0x30,
    /// Interleaved f32le stereo at 48kHz.
    TalkbackAudio = 0x40,
    LinktestData = 0x50,
    LinktestEnd = 0x51,
    LinktestReport = 0x52,
    Goodbye = 0x7F,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::Hello,
            0x02 => Self::HelloAck,
            0x10 => Self::Video,
            0x11 => Self::VideoConfig,
            0x12 => Self::Audio,
            0x13 => Self::AudioConfig,
            0x20 => Self::Chat,
            0x30 => Self::Control,
            0x40 => Self::TalkbackAudio,
            0x50 => Self::LinktestData,
            0x51 => Self::LinktestEnd,
            0x52 => Self::LinktestReport,
            0x7F => Self::Goodbye,
            _ => return None,
        })
    }

    /// Send buffer lane for outgoing frames of this kind.
    pub fn lane(self) -> Lane {
        match self {
            Self::Video
            | Self::VideoConfig
            | Self::Audio
            | Self::AudioConfig
            | Self::TalkbackAudio
            | Self::LinktestData => Lane::Media,
            Self::Chat => Lane::Chat,
            _ => Lane::Control,
        }
    }

    /// Stream configuration frames are never dropped from the media lane.
    pub fn is_config(self) -> bool {
        matches!(self, Self::VideoConfig | Self::AudioConfig)
    }
}

/// One frame of the ingest protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub flags: u8,
    pub timestamp_ms: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Size of the fixed header.
    pub const HEADER_LEN: usize = 10;

    pub fn new(kind: FrameKind, timestamp_ms: u32, payload: Bytes) -> Self {
        Self {
            kind,
            flags: 0,
            timestamp_ms,
            payload,
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// A frame with a JSON payload.
    pub fn json<T: Serialize>(kind: FrameKind, timestamp_ms: u32, value: &T) -> TransportResult<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(kind, timestamp_ms, Bytes::from(payload)))
    }

    /// Parse the JSON payload.
    pub fn parse_json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & FLAG_KEYFRAME != 0
    }

    /// Size on the wire.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.flags);
        buf.put_u32(self.timestamp_ms);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Take one frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. The length is
    /// checked before the payload arrives, so a bogus header fails fast.
    pub fn decode(buf: &mut BytesMut) -> TransportResult<Option<Frame>> {
        if buf.len() < Self::HEADER_LEN {
            return Ok(None);
        }

        let kind_byte = buf[0];
        let kind = FrameKind::from_u8(kind_byte)
            .ok_or_else(|| TransportError::InvalidFrame(format!("unknown kind 0x{kind_byte:02x}")))?;
        let len = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(TransportError::FrameTooLarge {
                len,
                max: MAX_FRAME_PAYLOAD,
            });
        }
        if buf.len() < Self::HEADER_LEN + len {
            return Ok(None);
        }

        buf.advance(1);
        let flags = buf.get_u8();
        let timestamp_ms = buf.get_u32();
        buf.advance(4);
        let payload = buf.split_to(len).freeze();

        Ok(Some(Frame {
            kind,
            flags,
            timestamp_ms,
            payload,
        }))
    }
}

/// Read the next frame, buffering partial reads in `buf`. Returns `None` on a
/// clean end of stream. Cancel safe: unread bytes stay in `buf`.
pub(crate) async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> TransportResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = Frame::decode(buf)? {
            return Ok(Some(frame));
        }
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(TransportError::ConnectionLost(
                "stream ended inside a frame".into(),
            ));
        }
    }
}

/// First frame on a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHello {
    pub protocol_version: u8,
    pub application_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub custom_data: String,
    #[serde(default)]
    pub save_on_server: bool,
    #[serde(default)]
    pub talkback: bool,
    #[serde(default)]
    pub send_position: bool,
    #[serde(default)]
    pub video_width: u32,
    #[serde(default)]
    pub video_height: u32,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
}

impl SessionHello {
    /// Hello sent by the link tester.
    pub fn probe(application_id: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            application_id: application_id.to_string(),
            ..Default::default()
        }
    }
}

/// Server reply to [`SessionHello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    pub broadcast_id: String,
}

/// Sent by either side before closing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodbyePayload {
    #[serde(default)]
    pub reason: String,
}

/// Control messages exchanged during a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    UpdateTitle { title: String },
    UpdateCustomData { custom_data: String },
    TalkbackRequest { talkback_id: u32, caller: String },
    TalkbackAccept { talkback_id: u32 },
    TalkbackDecline { talkback_id: u32 },
    TalkbackEnd { talkback_id: u32 },
    Position(Position),
    /// Server asks the client to stop broadcasting.
    Stop { reason: String },
}

/// Chat frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub from: Option<String>,
    pub text: String,
}

/// Client's closing frame of a link test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinktestEnd {
    pub bytes_sent: u64,
}

/// Server's measurement of a link test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinktestReport {
    pub bytes_received: u64,
    pub duration_ms: u64,
}

impl LinktestReport {
    pub fn speed_bytes_per_sec(&self) -> f32 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.bytes_received as f64 * 1000.0 / self.duration_ms as f64) as f32
    }
}
