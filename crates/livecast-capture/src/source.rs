//! The active camera and its controls.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info, instrument, warn};

use livecast_ipc::{
    CameraPosition, CaptureConfig, ExposureMode, FocusMode, Orientation, Point, Rect,
    TemperatureTint, VideoPreset, WhiteBalanceGains,
};

use crate::controls::{CameraState, ControlCell, DeviceControls, WhiteBalance};
use crate::coords::PreviewGeometry;
use crate::device::{CameraDevice, CameraDriver, CameraHandle, CaptureFormat, DeviceReadings, FrameSink};
use crate::error::CaptureError;
use crate::frame::CapturedFrame;
use crate::white_balance::{
    applied_temperature_tint, clamp_gains, gains_to_temperature_tint, temperature_tint_to_gains,
};
use crate::{clamp_broadcast_dimension, clamp_framerate, CaptureResult};

/// Camera capture source.
///
/// Owns the selected device, the capture configuration and the camera
/// control state. Control changes are published to the driver as a single
/// snapshot, so the driver never sees a partially applied update.
pub struct CaptureSource {
    driver: Arc<dyn CameraDriver>,
    devices: Vec<CameraDevice>,
    device: CameraDevice,
    handle: Option<Box<dyn CameraHandle>>,
    state: CameraState,
    controls: ControlCell,
    config: CaptureConfig,
    sink: FrameSink,
    frames: Receiver<CapturedFrame>,
    started: bool,
}

impl CaptureSource {
    /// Create a capture source. The camera is not opened until [`start`].
    ///
    /// [`start`]: CaptureSource::start
    #[instrument(name = "capture_source_new", skip_all)]
    pub fn new(driver: Arc<dyn CameraDriver>, mut config: CaptureConfig) -> CaptureResult<Self> {
        if config.preset != VideoPreset::Auto {
            return Err(CaptureError::Unsupported(format!(
                "video preset {:?}",
                config.preset
            )));
        }
        validate_aspect(config.aspect)?;

        let devices = driver.devices();
        if devices.is_empty() {
            return Err(CaptureError::NoDevice);
        }

        let (max, min) = clamp_framerate(config.max_framerate, config.min_framerate);
        config.max_framerate = max;
        config.min_framerate = min;
        config.max_broadcast_dimension = clamp_broadcast_dimension(config.max_broadcast_dimension);

        let device = select_device(&devices, config.camera_position, config.virtual_camera_enabled)
            .unwrap_or_else(|| devices[0].clone());
        config.camera_position = device.position;

        let state = CameraState::defaults_for(
            &device,
            config.virtual_camera_enabled,
            config.preview_frame.center(),
        );
        let (sink, frames) = FrameSink::new();

        debug!(device = %device.id, devices = devices.len(), "Capture source created");

        let source = Self {
            driver,
            devices,
            device,
            handle: None,
            state,
            controls: ControlCell::default(),
            config,
            sink,
            frames,
            started: false,
        };
        source.publish();
        Ok(source)
    }

    /// Open the camera. Capture can be started once per source.
    #[instrument(name = "capture_source_start", skip(self), fields(device = %self.device.id))]
    pub fn start(&mut self) -> CaptureResult<Receiver<CapturedFrame>> {
        if self.started {
            return Err(CaptureError::AlreadyStarted);
        }
        self.open()?;
        self.started = true;
        info!("Capture started");
        Ok(self.frames.clone())
    }

    /// Close the camera.
    pub fn stop(&mut self) -> CaptureResult<()> {
        if let Some(mut handle) = self.handle.take() {
            handle.stop()?;
            info!(device = %self.device.id, "Capture stopped");
        }
        Ok(())
    }

    /// Check if the camera is delivering frames.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_active())
    }

    /// Whether [`start`](CaptureSource::start) has succeeded.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Receiver of captured frames. Stays valid across camera swaps.
    pub fn frames(&self) -> Receiver<CapturedFrame> {
        self.frames.clone()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn camera_state(&self) -> &CameraState {
        &self.state
    }

    /// Shared control snapshot read by the driver.
    pub fn controls(&self) -> &ControlCell {
        &self.controls
    }

    /// Native resolution of the active camera, landscape.
    pub fn sensor_dimensions(&self) -> (u32, u32) {
        self.device.resolution
    }

    /// Dimensions after rotation to the broadcast orientation and the aspect
    /// crop, rounded down to even values.
    pub fn output_dimensions(&self) -> (u32, u32) {
        let (sw, sh) = self.device.resolution;
        let (w, h) = if self.config.orientation.is_portrait() {
            (sh, sw)
        } else {
            (sw, sh)
        };
        let (w, h) = match self.config.aspect {
            Some((aw, ah)) if aw > 0 && ah > 0 => {
                // Largest rect of the requested aspect inside w x h
                let (aw, ah) = (aw as u64, ah as u64);
                if (w as u64) * ah > (h as u64) * aw {
                    (((h as u64) * aw / ah) as u32, h)
                } else {
                    (w, ((w as u64) * ah / aw) as u32)
                }
            }
            _ => (w, h),
        };
        (w & !1, h & !1)
    }

    // Device queries

    pub fn has_front_camera(&self) -> bool {
        self.devices.iter().any(|d| d.position == CameraPosition::Front)
    }

    /// True if any camera has a torch.
    pub fn has_torch(&self) -> bool {
        self.devices.iter().any(|d| d.has_torch)
    }

    pub fn has_current_camera_torch(&self) -> bool {
        self.device.has_torch
    }

    /// True if a virtual camera exists at the current position.
    pub fn has_virtual_camera(&self) -> bool {
        self.devices
            .iter()
            .any(|d| d.is_virtual && d.position == self.device.position)
    }

    pub fn is_virtual_camera(&self) -> bool {
        self.device.is_virtual
    }

    pub fn virtual_camera_enabled(&self) -> bool {
        self.config.virtual_camera_enabled
    }

    /// Enable or disable use of virtual cameras. Reselects the camera at the
    /// current position, which resets the camera state when it changes.
    pub fn set_virtual_camera_enabled(&mut self, enabled: bool) -> CaptureResult<()> {
        if self.config.virtual_camera_enabled == enabled {
            return Ok(());
        }
        self.config.virtual_camera_enabled = enabled;
        if let Some(device) = select_device(&self.devices, self.device.position, enabled) {
            if device.id != self.device.id {
                self.switch_to(device)?;
            }
        }
        Ok(())
    }

    // Camera position

    pub fn camera_position(&self) -> CameraPosition {
        self.device.position
    }

    /// Select the camera at `position`. `Unspecified` and the current
    /// position are no-ops.
    pub fn set_camera_position(&mut self, position: CameraPosition) -> CaptureResult<()> {
        if position == CameraPosition::Unspecified || position == self.device.position {
            return Ok(());
        }
        let device = select_device(&self.devices, position, self.config.virtual_camera_enabled)
            .ok_or_else(|| CaptureError::SourceNotFound(format!("{:?} camera", position)))?;
        self.switch_to(device)
    }

    /// Toggle between the front and back camera.
    pub fn swap_camera(&mut self) -> CaptureResult<()> {
        self.set_camera_position(self.device.position.opposite())
    }

    #[instrument(name = "capture_switch_camera", skip_all, fields(from = %self.device.id, to = %device.id))]
    fn switch_to(&mut self, device: CameraDevice) -> CaptureResult<()> {
        let was_open = self.handle.is_some();
        // Quiesce the old camera before touching shared state
        self.stop()?;

        self.state = CameraState::defaults_for(
            &device,
            self.config.virtual_camera_enabled,
            self.config.preview_frame.center(),
        );
        self.config.camera_position = device.position;
        self.device = device;
        self.publish();

        if was_open {
            self.open()?;
        }
        info!("Camera switched");
        Ok(())
    }

    // Torch and zoom

    pub fn torch(&self) -> bool {
        self.state.torch
    }

    pub fn set_torch(&mut self, on: bool) -> CaptureResult<()> {
        if on && !self.device.has_torch {
            return Err(CaptureError::Unsupported("torch".into()));
        }
        self.state.torch = on;
        self.publish();
        Ok(())
    }

    pub fn zoom(&self) -> f32 {
        self.state.zoom
    }

    /// Highest zoom factor, negative when the camera cannot zoom.
    pub fn max_zoom(&self) -> f32 {
        self.device.max_zoom
    }

    /// Set the zoom, clamped into `[1.0, max_zoom]`. Returns the applied value.
    pub fn set_zoom(&mut self, zoom: f32) -> CaptureResult<f32> {
        if !self.device.supports_zoom() {
            return Err(CaptureError::Unsupported("zoom".into()));
        }
        if !zoom.is_finite() {
            return Err(CaptureError::InvalidArgument(format!("zoom {zoom}")));
        }
        self.state.zoom = zoom.clamp(1.0, self.device.max_zoom);
        self.publish();
        Ok(self.state.zoom)
    }

    // Focus and exposure

    pub fn focus_mode(&self) -> FocusMode {
        self.state.focus_mode
    }

    pub fn focus_point(&self) -> Point {
        self.state.focus_point
    }

    pub fn exposure_mode(&self) -> ExposureMode {
        self.state.exposure_mode
    }

    pub fn exposure_point(&self) -> Point {
        self.state.exposure_point
    }

    pub fn is_focus_mode_supported(&self, mode: FocusMode) -> bool {
        self.device.focus_modes.contains(&mode)
    }

    /// Custom exposure is never supported.
    pub fn is_exposure_mode_supported(&self, mode: ExposureMode) -> bool {
        mode != ExposureMode::Custom && self.device.exposure_modes.contains(&mode)
    }

    pub fn set_focus(&mut self, point: Point, mode: FocusMode) -> CaptureResult<()> {
        self.check_focus_mode(mode)?;
        self.state.focus_mode = mode;
        self.state.focus_point = point;
        self.publish();
        Ok(())
    }

    pub fn set_exposure(&mut self, point: Point, mode: ExposureMode) -> CaptureResult<()> {
        self.check_exposure_mode(mode)?;
        self.state.exposure_mode = mode;
        self.state.exposure_point = point;
        self.publish();
        Ok(())
    }

    /// Set exposure and focus at one point in a single update.
    ///
    /// Both modes are validated first; on error neither setting changes.
    pub fn set_point_of_interest(
        &mut self,
        point: Point,
        exposure_mode: ExposureMode,
        focus_mode: FocusMode,
    ) -> CaptureResult<()> {
        self.check_exposure_mode(exposure_mode)?;
        self.check_focus_mode(focus_mode)?;

        self.state.exposure_mode = exposure_mode;
        self.state.exposure_point = point;
        self.state.focus_mode = focus_mode;
        self.state.focus_point = point;
        self.publish();
        Ok(())
    }

    fn check_focus_mode(&self, mode: FocusMode) -> CaptureResult<()> {
        if self.is_focus_mode_supported(mode) {
            Ok(())
        } else {
            Err(CaptureError::Unsupported(format!("focus mode {:?}", mode)))
        }
    }

    fn check_exposure_mode(&self, mode: ExposureMode) -> CaptureResult<()> {
        if self.is_exposure_mode_supported(mode) {
            Ok(())
        } else {
            Err(CaptureError::Unsupported(format!("exposure mode {:?}", mode)))
        }
    }

    pub fn exposure_target_bias(&self) -> f32 {
        self.state.exposure_target_bias
    }

    pub fn min_exposure_target_bias(&self) -> f32 {
        self.device.min_exposure_bias
    }

    pub fn max_exposure_target_bias(&self) -> f32 {
        self.device.max_exposure_bias
    }

    /// Set the exposure bias in EV, clamped to the camera's range.
    pub fn set_exposure_target_bias(&mut self, bias: f32) -> CaptureResult<f32> {
        if !bias.is_finite() {
            return Err(CaptureError::InvalidArgument(format!("exposure bias {bias}")));
        }
        self.state.exposure_target_bias =
            bias.clamp(self.device.min_exposure_bias, self.device.max_exposure_bias);
        self.publish();
        Ok(self.state.exposure_target_bias)
    }

    /// Fix the focus at the current lens position.
    pub fn lock_current_lens_position(&mut self) -> CaptureResult<f32> {
        self.check_focus_mode(FocusMode::Locked)?;
        let lens_position = self.readings()?.lens_position;
        self.state.focus_mode = FocusMode::Locked;
        self.publish_with_lens(Some(lens_position));
        Ok(lens_position)
    }

    // White balance

    /// Custom gains cannot be locked while a virtual camera is in use.
    pub fn is_locking_white_balance_with_custom_gains_supported(&self) -> bool {
        !(self.device.is_virtual && self.config.virtual_camera_enabled)
    }

    pub fn max_white_balance_gain(&self) -> f32 {
        self.device.max_white_balance_gain
    }

    pub fn is_white_balance_locked(&self) -> bool {
        self.state.white_balance.is_locked()
    }

    pub fn white_balance(&self) -> WhiteBalance {
        self.state.white_balance
    }

    /// Gains currently applied by the camera.
    pub fn device_white_balance_gains(&self) -> WhiteBalanceGains {
        if let Some(gains) = self.state.white_balance.locked_gains() {
            return gains;
        }
        self.handle
            .as_ref()
            .map(|h| h.readings().current_gains)
            .unwrap_or_else(WhiteBalanceGains::neutral)
    }

    /// Gains that would render the scene neutral gray.
    pub fn gray_world_gains(&self) -> WhiteBalanceGains {
        self.handle
            .as_ref()
            .map(|h| h.readings().gray_world_gains)
            .unwrap_or_else(WhiteBalanceGains::neutral)
    }

    /// Temperature and tint of the current gains.
    pub fn white_balance_temperature_and_tint(&self) -> TemperatureTint {
        match self.state.white_balance {
            WhiteBalance::LockedTemperatureTint { values, .. } => values,
            _ => gains_to_temperature_tint(self.device_white_balance_gains()),
        }
    }

    /// Lock to explicit gains, clamped to `[1.0, max_white_balance_gain]`.
    pub fn lock_white_balance_gains(&mut self, gains: WhiteBalanceGains) -> CaptureResult<WhiteBalanceGains> {
        self.check_custom_gains()?;
        let gains = clamp_gains(gains, self.device.max_white_balance_gain);
        self.state.white_balance = WhiteBalance::LockedGains(gains);
        self.publish();
        Ok(gains)
    }

    /// Lock to a temperature and tint.
    pub fn lock_white_balance_temperature_tint(
        &mut self,
        values: TemperatureTint,
    ) -> CaptureResult<WhiteBalanceGains> {
        self.check_custom_gains()?;
        if !values.temperature.is_finite() || !values.tint.is_finite() {
            return Err(CaptureError::InvalidArgument(format!("{:?}", values)));
        }
        let gains = temperature_tint_to_gains(values, self.device.max_white_balance_gain);
        let values = applied_temperature_tint(values, self.device.max_white_balance_gain);
        self.state.white_balance = WhiteBalance::LockedTemperatureTint { values, gains };
        self.publish();
        Ok(gains)
    }

    /// Lock to whatever gains the camera applies right now.
    pub fn lock_current_white_balance_gains(&mut self) -> CaptureResult<WhiteBalanceGains> {
        let gains = clamp_gains(self.readings()?.current_gains, self.device.max_white_balance_gain);
        self.state.white_balance = WhiteBalance::LockedGains(gains);
        self.publish();
        Ok(gains)
    }

    pub fn unlock_white_balance(&mut self) {
        self.state.white_balance = WhiteBalance::Auto;
        self.publish();
    }

    fn check_custom_gains(&self) -> CaptureResult<()> {
        if self.is_locking_white_balance_with_custom_gains_supported() {
            Ok(())
        } else {
            Err(CaptureError::Unsupported(
                "custom white balance on a virtual camera".into(),
            ))
        }
    }

    // Configuration

    /// Set the broadcast orientation, and optionally the preview orientation
    /// and aspect crop.
    ///
    /// After capture starts only a flip on the same axis is allowed and the
    /// aspect cannot change.
    pub fn set_orientation(
        &mut self,
        orientation: Orientation,
        preview_orientation: Option<Orientation>,
        aspect: Option<(u32, u32)>,
    ) -> CaptureResult<()> {
        validate_aspect(aspect)?;
        if self.started {
            if !orientation.same_axis(self.config.orientation) {
                return Err(CaptureError::Immutable("orientation axis"));
            }
            if aspect.is_some() && aspect != self.config.aspect {
                return Err(CaptureError::Immutable("aspect"));
            }
        }

        self.config.orientation = orientation;
        if let Some(preview) = preview_orientation {
            self.config.preview_orientation = preview;
        }
        if aspect.is_some() || !self.started {
            self.config.aspect = aspect;
        }
        debug!(?orientation, aspect = ?self.config.aspect, "Orientation updated");
        // Points of interest depend on the preview orientation
        self.publish();
        Ok(())
    }

    /// Set the framerate range, clamped into the supported range.
    pub fn set_framerate(&mut self, max: f32, min: Option<f32>) -> CaptureResult<(f32, f32)> {
        self.check_mutable("framerate")?;
        let (max, min) = clamp_framerate(max, min.unwrap_or(self.config.min_framerate));
        self.config.max_framerate = max;
        self.config.min_framerate = min;
        Ok((max, min))
    }

    /// Set the broadcast dimension bound. Zero means the camera maximum.
    pub fn set_max_broadcast_dimension(&mut self, dimension: u32) -> CaptureResult<u32> {
        self.check_mutable("max broadcast dimension")?;
        self.config.max_broadcast_dimension = clamp_broadcast_dimension(dimension);
        Ok(self.config.max_broadcast_dimension)
    }

    /// Only [`VideoPreset::Auto`] is accepted.
    pub fn set_video_preset(&mut self, preset: VideoPreset) -> CaptureResult<()> {
        self.check_mutable("video preset")?;
        if preset != VideoPreset::Auto {
            return Err(CaptureError::Unsupported(format!("video preset {:?}", preset)));
        }
        self.config.preset = preset;
        Ok(())
    }

    /// Update the preview rectangle used to map points of interest.
    pub fn set_preview_frame(&mut self, frame: Rect) {
        self.config.preview_frame = frame;
        self.publish();
    }

    fn check_mutable(&self, what: &'static str) -> CaptureResult<()> {
        if self.started {
            Err(CaptureError::Immutable(what))
        } else {
            Ok(())
        }
    }

    // Frames

    /// Receive a copy of the next captured frame.
    pub fn request_snapshot(&self) -> CaptureResult<Receiver<CapturedFrame>> {
        if !self.is_active() {
            return Err(CaptureError::NotStarted);
        }
        Ok(self.sink.request_snapshot())
    }

    /// Frames dropped because the consumer fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.sink.dropped()
    }

    /// Live view of [`dropped_frames`](Self::dropped_frames) for other threads.
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        self.sink.drop_counter()
    }

    fn readings(&self) -> CaptureResult<DeviceReadings> {
        self.handle
            .as_ref()
            .map(|h| h.readings())
            .ok_or(CaptureError::NotStarted)
    }

    fn open(&mut self) -> CaptureResult<()> {
        let format = CaptureFormat {
            width: self.device.resolution.0,
            height: self.device.resolution.1,
            min_fps: self.config.min_framerate,
            max_fps: self.config.max_framerate,
        };
        let handle = self
            .driver
            .open(&self.device, format, self.controls.clone(), self.sink.clone())?;
        self.handle = Some(handle);
        Ok(())
    }

    fn publish(&self) {
        let lens = self.controls.snapshot().lens_position;
        let lens = if self.state.focus_mode == FocusMode::Locked {
            lens
        } else {
            None
        };
        self.publish_with_lens(lens);
    }

    fn publish_with_lens(&self, lens_position: Option<f32>) {
        let geometry = PreviewGeometry {
            frame: self.config.preview_frame,
            orientation: self.config.preview_orientation,
            sensor: self.device.resolution,
            mirrored: self.device.position == CameraPosition::Front,
        };

        let generation = self.controls.publish(DeviceControls {
            focus_mode: self.state.focus_mode,
            focus_point: geometry.view_to_device(self.state.focus_point),
            exposure_mode: self.state.exposure_mode,
            exposure_point: geometry.view_to_device(self.state.exposure_point),
            exposure_target_bias: self.state.exposure_target_bias,
            white_balance_gains: self.state.white_balance.locked_gains(),
            lens_position,
            zoom: self.state.zoom,
            torch: self.state.torch,
            generation: 0,
        });
        debug!(generation, "Camera controls published");
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop camera on drop: {}", e);
        }
    }
}

fn validate_aspect(aspect: Option<(u32, u32)>) -> CaptureResult<()> {
    match aspect {
        Some((w, h)) if w == 0 || h == 0 => {
            Err(CaptureError::InvalidArgument(format!("aspect {w}:{h}")))
        }
        _ => Ok(()),
    }
}

/// Pick the camera at `position`, preferring a virtual camera when enabled.
fn select_device(
    devices: &[CameraDevice],
    position: CameraPosition,
    virtual_enabled: bool,
) -> Option<CameraDevice> {
    let candidates: Vec<&CameraDevice> = devices.iter().filter(|d| d.position == position).collect();
    candidates
        .iter()
        .find(|d| d.is_virtual == virtual_enabled)
        .or_else(|| candidates.first())
        .map(|d| (*d).clone())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::synthetic::SyntheticCamera;

    fn source() -> CaptureSource {
        CaptureSource::new(Arc::new(SyntheticCamera::new()), CaptureConfig::default()).unwrap()
    }

    fn virtual_source() -> CaptureSource {
        CaptureSource::new(
            Arc::new(SyntheticCamera::with_virtual_camera()),
            CaptureConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_non_auto_preset() {
        let config = CaptureConfig {
            preset: VideoPreset::High,
            ..Default::default()
        };
        let result = CaptureSource::new(Arc::new(SyntheticCamera::new()), config);
        assert!(matches!(result, Err(CaptureError::Unsupported(_))));
    }

    #[test]
    fn test_new_without_cameras_fails() {
        let result = CaptureSource::new(
            Arc::new(SyntheticCamera::with_devices(Vec::new())),
            CaptureConfig::default(),
        );
        assert!(matches!(result, Err(CaptureError::NoDevice)));
    }

    #[test]
    fn test_start_only_once() {
        let mut src = source();
        let frames = src.start().unwrap();
        assert!(frames.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(matches!(src.start(), Err(CaptureError::AlreadyStarted)));
        src.stop().unwrap();
        assert!(!src.is_active());
    }

    #[test]
    fn test_swap_camera_resets_state() {
        let mut src = source();
        src.start().unwrap();
        src.set_zoom(4.0).unwrap();
        src.set_torch(true).unwrap();
        src.set_exposure_target_bias(2.0).unwrap();
        src.lock_white_balance_gains(WhiteBalanceGains::new(2.0, 1.0, 2.0))
            .unwrap();
        src.set_focus(Point::new(10.0, 10.0), FocusMode::AutoFocus).unwrap();

        src.swap_camera().unwrap();

        assert_eq!(src.camera_position(), CameraPosition::Front);
        assert_eq!(src.zoom(), 1.0);
        assert!(!src.torch());
        assert_eq!(src.exposure_target_bias(), 0.0);
        assert!(!src.is_white_balance_locked());
        // Front camera only supports locked focus
        assert_eq!(src.focus_mode(), FocusMode::Locked);
        assert_eq!(src.focus_point(), src.config().preview_frame.center());
        assert!(src.is_active());

        let snapshot = src.controls().snapshot();
        assert!(!snapshot.torch);
        assert_eq!(snapshot.white_balance_gains, None);
    }

    #[test]
    fn test_unspecified_position_is_noop() {
        let mut src = source();
        let generation = src.controls().generation();
        src.set_camera_position(CameraPosition::Unspecified).unwrap();
        src.set_camera_position(CameraPosition::Back).unwrap();
        assert_eq!(src.camera_position(), CameraPosition::Back);
        assert_eq!(src.controls().generation(), generation);
    }

    #[test]
    fn test_torch_gated_by_current_camera() {
        let mut src = source();
        src.swap_camera().unwrap();
        assert!(src.has_torch());
        assert!(!src.has_current_camera_torch());
        assert!(matches!(src.set_torch(true), Err(CaptureError::Unsupported(_))));
        assert!(src.set_torch(false).is_ok());
    }

    #[test]
    fn test_zoom_is_clamped() {
        let mut src = source();
        assert_eq!(src.set_zoom(0.2).unwrap(), 1.0);
        assert_eq!(src.set_zoom(50.0).unwrap(), 10.0);
        assert_eq!(src.set_zoom(3.5).unwrap(), 3.5);
    }

    #[test]
    fn test_zoom_unsupported_without_range() {
        let mut fixed = SyntheticCamera::back_camera();
        fixed.max_zoom = -1.0;
        let mut src = CaptureSource::new(
            Arc::new(SyntheticCamera::with_devices(vec![fixed])),
            CaptureConfig::default(),
        )
        .unwrap();
        assert!(matches!(src.set_zoom(2.0), Err(CaptureError::Unsupported(_))));
    }

    #[test]
    fn test_exposure_bias_is_clamped() {
        let mut src = source();
        assert_eq!(src.set_exposure_target_bias(20.0).unwrap(), 8.0);
        assert_eq!(src.set_exposure_target_bias(-20.0).unwrap(), -8.0);
    }

    #[test]
    fn test_custom_exposure_unsupported() {
        let mut src = source();
        assert!(!src.is_exposure_mode_supported(ExposureMode::Custom));
        assert!(src
            .set_exposure(Point::default(), ExposureMode::Custom)
            .is_err());
    }

    #[test]
    fn test_point_of_interest_is_atomic() {
        let mut src = source();
        src.swap_camera().unwrap();
        let before = src.camera_state().clone();
        let generation = src.controls().generation();

        // Front camera has no autofocus, so nothing changes.
        let result = src.set_point_of_interest(
            Point::new(5.0, 5.0),
            ExposureMode::AutoExpose,
            FocusMode::AutoFocus,
        );
        assert!(result.is_err());
        assert_eq!(src.camera_state(), &before);
        assert_eq!(src.controls().generation(), generation);

        src.swap_camera().unwrap();
        let generation = src.controls().generation();
        src.set_point_of_interest(
            Point::new(640.0, 360.0),
            ExposureMode::AutoExpose,
            FocusMode::AutoFocus,
        )
        .unwrap();
        assert_eq!(src.controls().generation(), generation + 1);
        let snapshot = src.controls().snapshot();
        assert_eq!(snapshot.focus_point, snapshot.exposure_point);
        assert_eq!(snapshot.focus_mode, FocusMode::AutoFocus);
        assert_eq!(snapshot.exposure_mode, ExposureMode::AutoExpose);
    }

    #[test]
    fn test_white_balance_gains_are_clamped() {
        let mut src = source();
        let gains = src
            .lock_white_balance_gains(WhiteBalanceGains::new(0.5, 2.0, 9.0))
            .unwrap();
        assert_eq!(gains, WhiteBalanceGains::new(1.0, 2.0, 4.0));
        assert_eq!(src.device_white_balance_gains(), gains);
        assert!(src.is_white_balance_locked());

        src.unlock_white_balance();
        assert!(!src.is_white_balance_locked());
    }

    #[test]
    fn test_temperature_tint_lock_reports_clamped_tint() {
        let mut src = source();
        src.lock_white_balance_temperature_tint(TemperatureTint::new(4000.0, 400.0))
            .unwrap();
        assert_eq!(src.white_balance_temperature_and_tint().tint, 150.0);
    }

    #[test]
    fn test_temperature_tint_lock_reads_back_applied_temperature() {
        let mut src = source();
        let gains = src
            .lock_white_balance_temperature_tint(TemperatureTint::new(1_000_000.0, 0.0))
            .unwrap();
        let values = src.white_balance_temperature_and_tint();
        assert!(values.temperature <= 40_000.0, "{values:?}");
        for g in [gains.red, gains.green, gains.blue] {
            assert!((1.0..=4.0).contains(&g));
        }

        src.lock_white_balance_temperature_tint(TemperatureTint::new(5000.0, 0.0))
            .unwrap();
        assert_eq!(src.white_balance_temperature_and_tint().temperature, 5000.0);
    }

    #[test]
    fn test_virtual_camera_rejects_custom_gains() {
        let mut src = virtual_source();
        assert!(src.is_virtual_camera());
        assert!(src.has_virtual_camera());
        assert_eq!(src.zoom(), 2.0);
        assert!(!src.is_locking_white_balance_with_custom_gains_supported());
        assert!(src
            .lock_white_balance_gains(WhiteBalanceGains::neutral())
            .is_err());

        src.set_virtual_camera_enabled(false).unwrap();
        assert!(!src.is_virtual_camera());
        assert_eq!(src.zoom(), 1.0);
        assert!(src.is_locking_white_balance_with_custom_gains_supported());
    }

    #[test]
    fn test_lock_current_requires_open_camera() {
        let mut src = source();
        assert!(matches!(
            src.lock_current_white_balance_gains(),
            Err(CaptureError::NotStarted)
        ));

        src.start().unwrap();
        assert_eq!(
            src.lock_current_white_balance_gains().unwrap(),
            WhiteBalanceGains::new(1.8, 1.0, 1.6)
        );
        assert_eq!(src.lock_current_lens_position().unwrap(), 0.6);
        assert_eq!(src.focus_mode(), FocusMode::Locked);
        assert_eq!(src.controls().snapshot().lens_position, Some(0.6));
    }

    #[test]
    fn test_orientation_after_start_same_axis_only() {
        let mut src = source();
        src.set_orientation(Orientation::Portrait, None, Some((1, 1)))
            .unwrap();
        src.start().unwrap();

        assert!(src
            .set_orientation(Orientation::PortraitUpsideDown, None, None)
            .is_ok());
        assert!(matches!(
            src.set_orientation(Orientation::LandscapeLeft, None, None),
            Err(CaptureError::Immutable(_))
        ));
        assert!(matches!(
            src.set_orientation(Orientation::Portrait, None, Some((16, 9))),
            Err(CaptureError::Immutable(_))
        ));
        assert_eq!(src.config().aspect, Some((1, 1)));
    }

    #[test]
    fn test_output_dimensions_apply_orientation_and_aspect() {
        let mut src = source();
        assert_eq!(src.output_dimensions(), (1280, 720));
        src.set_orientation(Orientation::Portrait, None, None).unwrap();
        assert_eq!(src.output_dimensions(), (720, 1280));
        src.set_orientation(Orientation::Portrait, None, Some((1, 1)))
            .unwrap();
        assert_eq!(src.output_dimensions(), (720, 720));
    }

    #[test]
    fn test_framerate_clamped_and_immutable() {
        let mut src = source();
        assert_eq!(src.set_framerate(60.0, Some(5.0)).unwrap(), (30.0, 24.0));
        src.start().unwrap();
        assert!(matches!(
            src.set_framerate(25.0, None),
            Err(CaptureError::Immutable(_))
        ));
    }

    #[test]
    fn test_snapshot_requires_active_camera() {
        let mut src = source();
        assert!(src.request_snapshot().is_err());
        src.start().unwrap();
        let rx = src.request_snapshot().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
