//! Camera device descriptions and the platform driver seam.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::trace;

use livecast_ipc::{CameraPosition, ExposureMode, FocusMode, WhiteBalanceGains};

use crate::controls::ControlCell;
use crate::frame::CapturedFrame;
use crate::{CaptureResult, FRAME_CHANNEL_CAPACITY};

/// Static description of a camera, as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDevice {
    /// Driver-specific identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Front or back.
    pub position: CameraPosition,

    /// True if several lenses are exposed as one zoomable camera.
    pub is_virtual: bool,

    /// Zoom factor of the standard wide-angle lens on a virtual camera
    /// (2.0 when an ultra-wide lens is present).
    pub wide_angle_zoom: f32,

    /// Whether this camera has an LED torch.
    pub has_torch: bool,

    /// Highest zoom factor, negative when zoom is unsupported.
    pub max_zoom: f32,

    /// Supported focus modes.
    pub focus_modes: Vec<FocusMode>,

    /// Supported exposure modes.
    pub exposure_modes: Vec<ExposureMode>,

    /// Exposure bias range in EV.
    pub min_exposure_bias: f32,
    pub max_exposure_bias: f32,

    /// Highest white balance gain per channel.
    pub max_white_balance_gain: f32,

    /// Native resolution in landscape orientation.
    pub resolution: (u32, u32),
}

impl CameraDevice {
    /// True if the camera supports zooming at all.
    pub fn supports_zoom(&self) -> bool {
        self.max_zoom >= 1.0
    }
}

/// Format requested when opening a camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub min_fps: f32,
    pub max_fps: f32,
}

/// Values the camera measures continuously.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReadings {
    /// Gains the automatic white balance currently applies.
    pub current_gains: WhiteBalanceGains,

    /// Gains that would render the scene center neutral gray.
    pub gray_world_gains: WhiteBalanceGains,

    /// Current lens position, 0.0 (near) to 1.0 (far).
    pub lens_position: f32,
}

/// Platform camera driver.
pub trait CameraDriver: Send + Sync {
    /// List available cameras.
    fn devices(&self) -> Vec<CameraDevice>;

    /// Open a camera. The driver reads `controls` at every frame boundary
    /// and delivers frames through `sink` from its own callback context.
    fn open(
        &self,
        device: &CameraDevice,
        format: CaptureFormat,
        controls: ControlCell,
        sink: FrameSink,
    ) -> CaptureResult<Box<dyn CameraHandle>>;
}

/// An open camera.
pub trait CameraHandle: Send {
    /// Latest measured values.
    fn readings(&self) -> DeviceReadings;

    /// Stop delivering frames. Returns once the in-flight frame is done.
    fn stop(&mut self) -> CaptureResult<()>;

    /// Check if the camera is delivering frames.
    fn is_active(&self) -> bool;
}

/// Bounded, non-blocking frame queue handed to drivers.
///
/// When the consumer falls behind, the oldest queued frame is discarded so
/// the driver callback never blocks.
#[derive(Clone)]
pub struct FrameSink {
    sender: Sender<CapturedFrame>,
    drain: Receiver<CapturedFrame>,
    dropped: Arc<AtomicU64>,
    snapshot: Arc<Mutex<Option<Sender<CapturedFrame>>>>,
}

impl FrameSink {
    /// Create a sink and the receiver that consumes it.
    pub fn new() -> (Self, Receiver<CapturedFrame>) {
        Self::with_capacity(FRAME_CHANNEL_CAPACITY)
    }

    /// Create a sink with an explicit queue depth.
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<CapturedFrame>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let sink = Self {
            sender,
            drain: receiver.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
            snapshot: Arc::new(Mutex::new(None)),
        };
        (sink, receiver)
    }

    /// Deliver a frame. Never blocks.
    pub fn push(&self, frame: CapturedFrame) -> CaptureResult<()> {
        if let Some(snapshot_tx) = self.snapshot.lock().take() {
            let _ = snapshot_tx.try_send(frame.clone());
        }

        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                if self.drain.try_recv().is_ok() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("Frame queue full, dropped oldest frame");
                }
                if self.sender.try_send(frame).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(crate::CaptureError::ChannelDisconnected),
        }
    }

    /// Arrange for the next frame to be copied to the returned receiver.
    pub fn request_snapshot(&self) -> Receiver<CapturedFrame> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        *self.snapshot.lock() = Some(tx);
        rx
    }

    /// Frames discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared counter behind [`dropped`](Self::dropped).
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// A new receiver on the same queue.
    pub fn receiver(&self) -> Receiver<CapturedFrame> {
        self.drain.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;

    use super::*;
    use crate::frame::CaptureTimestamp;

    fn frame(sequence: u64) -> CapturedFrame {
        CapturedFrame::new(
            Bytes::from_static(&[0u8; 6]),
            2,
            2,
            CaptureTimestamp::now(Instant::now()),
            sequence,
            0,
        )
    }

    #[test]
    fn test_sink_drops_oldest_when_full() {
        let (sink, rx) = FrameSink::with_capacity(2);
        for seq in 0..5 {
            sink.push(frame(seq)).unwrap();
        }

        assert_eq!(sink.dropped(), 3);
        let kept: Vec<u64> = rx.try_iter().map(|f| f.sequence).collect();
        assert_eq!(kept, vec![3, 4]);
    }

    #[test]
    fn test_snapshot_receives_next_frame_once() {
        let (sink, _rx) = FrameSink::with_capacity(4);
        let snapshot = sink.request_snapshot();
        sink.push(frame(7)).unwrap();
        sink.push(frame(8)).unwrap();

        assert_eq!(snapshot.try_recv().unwrap().sequence, 7);
        assert!(snapshot.try_recv().is_err());
    }
}
