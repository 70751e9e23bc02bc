//! H.264 encoding with x264.
//!
//! One encoder serves one rung: the pipeline builds a fresh encoder when the
//! live stream changes size, so the first packet of every encoder is an IDR
//! frame preceded by its own SPS/PPS.

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::error::EncoderError;
use crate::{
    EncodedVideoPacket, EncoderResult, FrameType, H264Profile, VideoEncoder, VideoEncoderConfig,
};

/// Converts between stream time (100ns) and encoder ticks (1/fps).
#[derive(Debug, Clone, Copy)]
struct Timebase {
    fps: u64,
}

impl Timebase {
    fn to_ticks(self, pts_100ns: u64) -> i64 {
        (pts_100ns * self.fps / 10_000_000) as i64
    }

    fn to_100ns(self, ticks: i64) -> u64 {
        ticks.max(0) as u64 * 10_000_000 / self.fps
    }
}

/// Software H.264 encoder for NV12 frames.
pub struct X264Encoder {
    encoder: Option<x264::Encoder>,
    width: u32,
    height: u32,
    timebase: Timebase,
    frames_in: u64,
    packets_out: u64,
    headers: Bytes,
}

impl X264Encoder {
    #[instrument(name = "x264_new", skip_all, fields(width = config.width, height = config.height))]
    pub fn new(config: VideoEncoderConfig) -> EncoderResult<Self> {
        if config.width == 0 || config.height == 0 || config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(EncoderError::Initialization(format!(
                "NV12 needs even dimensions, got {}x{}",
                config.width, config.height
            )));
        }
        let fps = config.fps.max(1);
        let gop = (fps * config.keyframe_interval_secs.max(1)) as i32;

        // Zero latency: every frame produces a packet, no B-frames
        let setup = x264::Setup::preset(x264::Preset::Veryfast, x264::Tune::None, false, true)
            .fps(fps, 1)
            .bitrate(config.bitrate_kbps as i32)
            .max_keyframe_interval(gop)
            .scenecut_threshold(0);
        let setup = match config.profile {
            H264Profile::Baseline => setup.baseline(),
            H264Profile::Main => setup.main(),
            H264Profile::High => setup.high(),
        };

        let mut encoder = setup
            .build(x264::Colorspace::NV12, config.width as i32, config.height as i32)
            .map_err(|e| EncoderError::Initialization(format!("x264: {:?}", e)))?;
        let headers = match encoder.headers() {
            Ok(headers) => Bytes::from(headers.entirety().to_vec()),
            Err(e) => {
                return Err(EncoderError::Initialization(format!("x264 headers: {:?}", e)));
            }
        };

        debug!(
            bitrate_kbps = config.bitrate_kbps,
            fps,
            gop,
            header_bytes = headers.len(),
            "x264 ready"
        );

        Ok(Self {
            encoder: Some(encoder),
            width: config.width,
            height: config.height,
            timebase: Timebase { fps: fps as u64 },
            frames_in: 0,
            packets_out: 0,
            headers,
        })
    }
}

fn to_packet(
    timebase: Timebase,
    packets_out: &mut u64,
    data: x264::Data<'_>,
    picture: &x264::Picture,
    pts_100ns: Option<u64>,
) -> EncodedVideoPacket {
    // The first packet of a fresh encoder is always IDR
    let is_keyframe = picture.keyframe() || *packets_out == 0;
    *packets_out += 1;
    EncodedVideoPacket {
        data: Bytes::from(data.entirety().to_vec()),
        pts_100ns: pts_100ns.unwrap_or_else(|| timebase.to_100ns(picture.pts())),
        dts_100ns: timebase.to_100ns(picture.dts()),
        is_keyframe,
        frame_type: if is_keyframe { FrameType::I } else { FrameType::P },
    }
}

impl VideoEncoder for X264Encoder {
    fn encode(&mut self, frame: &[u8], pts_100ns: u64) -> EncoderResult<Option<EncodedVideoPacket>> {
        let luma = (self.width * self.height) as usize;
        if frame.len() != luma * 3 / 2 {
            return Err(EncoderError::InvalidInput(format!(
                "{}x{} NV12 frame has {} bytes, got {}",
                self.width,
                self.height,
                luma * 3 / 2,
                frame.len()
            )));
        }
        let (y, uv) = frame.split_at(luma);
        // UV rows are interleaved, as wide as luma rows
        let stride = self.width as i32;
        let image = x264::Image::new(
            x264::Colorspace::NV12,
            self.width as i32,
            self.height as i32,
            &[
                x264::Plane { data: y, stride },
                x264::Plane { data: uv, stride },
            ],
        );

        let ticks = self.timebase.to_ticks(pts_100ns);
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EncoderError::Encoding("x264 already flushed".to_string()))?;
        let (data, picture) = encoder
            .encode(ticks, image)
            .map_err(|e| EncoderError::Encoding(format!("x264: {:?}", e)))?;
        self.frames_in += 1;

        if data.len() == 0 {
            trace!(frame = self.frames_in, "x264 buffered frame");
            return Ok(None);
        }
        Ok(Some(to_packet(
            self.timebase,
            &mut self.packets_out,
            data,
            &picture,
            Some(pts_100ns),
        )))
    }

    fn flush(&mut self) -> EncoderResult<Vec<EncodedVideoPacket>> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(Vec::new());
        };

        let mut packets = Vec::new();
        let mut delayed = encoder.flush();
        while let Some(result) = delayed.next() {
            match result {
                Ok((data, picture)) if data.len() > 0 => {
                    packets.push(to_packet(self.timebase, &mut self.packets_out, data, &picture, None));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("x264 flush stopped: {:?}", e);
                    break;
                }
            }
        }
        debug!(
            frames = self.frames_in,
            packets = self.packets_out,
            "x264 flushed"
        );
        Ok(packets)
    }

    fn headers(&self) -> Option<Bytes> {
        (!self.headers.is_empty()).then(|| self.headers.clone())
    }

    fn is_hardware_accelerated(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "x264"
    }
}

// SAFETY: x264::Encoder holds raw pointers but is not tied to a thread. It is
// owned by the encoder worker and never shared.
unsafe impl Send for X264Encoder {}
