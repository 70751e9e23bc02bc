//! Frames delivered by the capture source.

use std::time::Instant;

use bytes::Bytes;

/// When a frame was exposed.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic capture instant, shared clock with audio.
    pub capture_time: Instant,

    /// Time since the camera opened, 100ns units.
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Stamp a frame exposed now, relative to `opened`.
    pub fn now(opened: Instant) -> Self {
        let capture_time = Instant::now();
        Self {
            capture_time,
            pts_100ns: (capture_time.duration_since(opened).as_nanos() / 100) as u64,
        }
    }
}

/// An NV12 frame in the sensor's native orientation.
///
/// Rotation, aspect crop and scaling to the live rung happen in the encoder
/// pipeline.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub timestamp: CaptureTimestamp,

    /// Per-source sequence number, gaps mean dropped frames.
    pub sequence: u64,

    /// Generation of the control snapshot the frame was exposed with.
    pub controls_generation: u64,
}

impl CapturedFrame {
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        timestamp: CaptureTimestamp,
        sequence: u64,
        controls_generation: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            timestamp,
            sequence,
            controls_generation,
        }
    }

    /// Luma plane plus half-height interleaved chroma plane.
    pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        luma + luma / 2
    }

    /// True when the buffer holds exactly one NV12 image of the stated size.
    pub fn is_valid(&self) -> bool {
        self.width % 2 == 0
            && self.height % 2 == 0
            && self.data.len() == Self::nv12_buffer_size(self.width, self.height)
    }
}
