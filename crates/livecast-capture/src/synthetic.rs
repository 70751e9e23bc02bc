//! Synthetic camera driver producing NV12 test patterns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use livecast_ipc::{CameraPosition, ExposureMode, FocusMode, WhiteBalanceGains};

use crate::controls::ControlCell;
use crate::device::{CameraDevice, CameraDriver, CameraHandle, CaptureFormat, DeviceReadings, FrameSink};
use crate::error::CaptureError;
use crate::frame::{CaptureTimestamp, CapturedFrame};
use crate::CaptureResult;

/// Camera driver that renders frames on a background thread.
///
/// Frame brightness follows the torch and exposure bias so tests can observe
/// that control changes reach the frame loop.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    devices: Vec<CameraDevice>,
    readings: DeviceReadings,
}

impl SyntheticCamera {
    /// Back and front camera.
    pub fn new() -> Self {
        Self::with_devices(vec![Self::back_camera(), Self::front_camera()])
    }

    /// Back virtual camera, back wide camera and front camera.
    pub fn with_virtual_camera() -> Self {
        Self::with_devices(vec![
            Self::virtual_back_camera(),
            Self::back_camera(),
            Self::front_camera(),
        ])
    }

    pub fn with_devices(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            readings: DeviceReadings {
                current_gains: WhiteBalanceGains::new(1.8, 1.0, 1.6),
                gray_world_gains: WhiteBalanceGains::new(1.9, 1.0, 1.5),
                lens_position: 0.6,
            },
        }
    }

    /// Back wide-angle camera with torch and full focus support.
    pub fn back_camera() -> CameraDevice {
        CameraDevice {
            id: "synthetic:back".into(),
            name: "Synthetic Back Camera".into(),
            position: CameraPosition::Back,
            is_virtual: false,
            wide_angle_zoom: 1.0,
            has_torch: true,
            max_zoom: 10.0,
            focus_modes: vec![
                FocusMode::Locked,
                FocusMode::AutoFocus,
                FocusMode::ContinuousAutoFocus,
            ],
            exposure_modes: vec![
                ExposureMode::Locked,
                ExposureMode::AutoExpose,
                ExposureMode::ContinuousAutoExposure,
            ],
            min_exposure_bias: -8.0,
            max_exposure_bias: 8.0,
            max_white_balance_gain: 4.0,
            resolution: (1280, 720),
        }
    }

    /// Fixed-focus front camera without torch.
    pub fn front_camera() -> CameraDevice {
        CameraDevice {
            id: "synthetic:front".into(),
            name: "Synthetic Front Camera".into(),
            position: CameraPosition::Front,
            has_torch: false,
            max_zoom: 4.0,
            focus_modes: vec![FocusMode::Locked],
            ..Self::back_camera()
        }
    }

    /// Back camera combining an ultra-wide and a wide lens.
    pub fn virtual_back_camera() -> CameraDevice {
        CameraDevice {
            id: "synthetic:back-virtual".into(),
            name: "Synthetic Dual Wide Camera".into(),
            is_virtual: true,
            wide_angle_zoom: 2.0,
            max_zoom: 15.0,
            ..Self::back_camera()
        }
    }

    /// Override the values reported by opened cameras.
    pub fn set_readings(&mut self, readings: DeviceReadings) {
        self.readings = readings;
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDriver for SyntheticCamera {
    fn devices(&self) -> Vec<CameraDevice> {
        self.devices.clone()
    }

    fn open(
        &self,
        device: &CameraDevice,
        format: CaptureFormat,
        controls: ControlCell,
        sink: FrameSink,
    ) -> CaptureResult<Box<dyn CameraHandle>> {
        if !self.devices.iter().any(|d| d.id == device.id) {
            return Err(CaptureError::SourceNotFound(device.id.clone()));
        }
        if format.width == 0 || format.height == 0 {
            return Err(CaptureError::InvalidArgument(format!(
                "capture format {}x{}",
                format.width, format.height
            )));
        }

        info!(
            device = %device.id,
            width = format.width,
            height = format.height,
            fps = format.max_fps,
            "Opening synthetic camera"
        );

        let should_stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));

        let thread = {
            let should_stop = Arc::clone(&should_stop);
            let active = Arc::clone(&active);
            std::thread::Builder::new()
                .name("synthetic-camera".into())
                .spawn(move || {
                    frame_loop(format, controls, sink, &should_stop);
                    active.store(false, Ordering::SeqCst);
                })
                .map_err(|e| CaptureError::Driver(e.to_string()))?
        };

        Ok(Box::new(SyntheticHandle {
            readings: self.readings,
            should_stop,
            active,
            thread: Some(thread),
        }))
    }
}

fn frame_loop(format: CaptureFormat, controls: ControlCell, sink: FrameSink, should_stop: &AtomicBool) {
    let interval = Duration::from_secs_f32(1.0 / format.max_fps.max(1.0));
    let start = Instant::now();
    let y_size = (format.width * format.height) as usize;
    let mut sequence = 0u64;

    while !should_stop.load(Ordering::SeqCst) {
        let tick = Instant::now();

        // One snapshot per frame
        let current = controls.snapshot();
        let mut luma = 96.0 + current.exposure_target_bias * 12.0 + (sequence % 32) as f32;
        if current.torch {
            luma += 64.0;
        }
        let luma = luma.clamp(16.0, 235.0) as u8;

        let mut data = vec![luma; y_size];
        data.resize(y_size + y_size / 2, 128);

        let frame = CapturedFrame::new(
            Bytes::from(data),
            format.width,
            format.height,
            CaptureTimestamp::now(start),
            sequence,
            current.generation,
        );

        if let Err(e) = sink.push(frame) {
            warn!("Synthetic camera stopping: {}", e);
            break;
        }
        sequence += 1;

        let elapsed = tick.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    debug!(frames = sequence, "Synthetic camera frame loop exited");
}

struct SyntheticHandle {
    readings: DeviceReadings,
    should_stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraHandle for SyntheticHandle {
    fn readings(&self) -> DeviceReadings {
        self.readings
    }

    fn stop(&mut self) -> CaptureResult<()> {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| CaptureError::Driver("synthetic camera thread panicked".into()))?;
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
