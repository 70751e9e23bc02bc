//! Per-camera exposure, focus, white balance and zoom state.

use std::sync::Arc;

use parking_lot::RwLock;

use livecast_ipc::{ExposureMode, FocusMode, Point, TemperatureTint, WhiteBalanceGains};

use crate::device::CameraDevice;

/// White balance setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhiteBalance {
    /// Continuously adjusted by the camera.
    Auto,

    /// Locked to explicit gains.
    LockedGains(WhiteBalanceGains),

    /// Locked to a temperature and tint, with the gains they map to.
    LockedTemperatureTint {
        values: TemperatureTint,
        gains: WhiteBalanceGains,
    },
}

impl WhiteBalance {
    /// Returns true unless white balance is automatic.
    pub fn is_locked(&self) -> bool {
        !matches!(self, Self::Auto)
    }

    /// The locked gains, if any.
    pub fn locked_gains(&self) -> Option<WhiteBalanceGains> {
        match self {
            Self::Auto => None,
            Self::LockedGains(gains) => Some(*gains),
            Self::LockedTemperatureTint { gains, .. } => Some(*gains),
        }
    }
}

/// Camera settings owned by the active capture source.
///
/// Points are stored in view coordinates, as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    pub focus_mode: FocusMode,
    pub focus_point: Point,
    pub exposure_mode: ExposureMode,
    pub exposure_point: Point,
    pub exposure_target_bias: f32,
    pub white_balance: WhiteBalance,
    pub zoom: f32,
    pub torch: bool,
}

impl CameraState {
    /// Default state for a freshly selected camera.
    ///
    /// Focus is continuous autofocus when supported and locked otherwise,
    /// exposure is continuous auto exposure when supported, both points sit
    /// at the preview center, white balance is automatic and the zoom starts
    /// at the wide-angle lens of a virtual camera.
    pub fn defaults_for(device: &CameraDevice, virtual_enabled: bool, center: Point) -> Self {
        let focus_mode = if device.focus_modes.contains(&FocusMode::ContinuousAutoFocus) {
            FocusMode::ContinuousAutoFocus
        } else {
            FocusMode::Locked
        };

        let exposure_mode = if device
            .exposure_modes
            .contains(&ExposureMode::ContinuousAutoExposure)
        {
            ExposureMode::ContinuousAutoExposure
        } else {
            ExposureMode::Locked
        };

        let zoom = if device.is_virtual && virtual_enabled {
            device.wide_angle_zoom.max(1.0)
        } else {
            1.0
        };

        Self {
            focus_mode,
            focus_point: center,
            exposure_mode,
            exposure_point: center,
            exposure_target_bias: 0.0,
            white_balance: WhiteBalance::Auto,
            zoom,
            torch: false,
        }
    }
}

/// Settings in device terms, as the driver applies them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceControls {
    pub focus_mode: FocusMode,
    /// Normalized device coordinates.
    pub focus_point: Point,
    pub exposure_mode: ExposureMode,
    /// Normalized device coordinates.
    pub exposure_point: Point,
    pub exposure_target_bias: f32,
    pub white_balance_gains: Option<WhiteBalanceGains>,
    pub lens_position: Option<f32>,
    pub zoom: f32,
    pub torch: bool,
    /// Incremented on every published change.
    pub generation: u64,
}

impl Default for DeviceControls {
    fn default() -> Self {
        Self {
            focus_mode: FocusMode::ContinuousAutoFocus,
            focus_point: Point::new(0.5, 0.5),
            exposure_mode: ExposureMode::ContinuousAutoExposure,
            exposure_point: Point::new(0.5, 0.5),
            exposure_target_bias: 0.0,
            white_balance_gains: None,
            lens_position: None,
            zoom: 1.0,
            torch: false,
            generation: 0,
        }
    }
}

/// Shared, generation-stamped control snapshot.
///
/// The capture source writes whole snapshots; drivers read one at each
/// frame boundary, so a frame never sees a half-applied change.
#[derive(Clone, Default)]
pub struct ControlCell {
    inner: Arc<RwLock<DeviceControls>>,
}

impl ControlCell {
    pub fn new(controls: DeviceControls) -> Self {
        Self {
            inner: Arc::new(RwLock::new(controls)),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> DeviceControls {
        self.inner.read().clone()
    }

    /// Replace the snapshot, bumping the generation.
    pub fn publish(&self, mut controls: DeviceControls) -> u64 {
        let mut guard = self.inner.write();
        controls.generation = guard.generation + 1;
        *guard = controls;
        guard.generation
    }

    /// Generation of the current snapshot.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_ipc::CameraPosition;

    fn device(focus_modes: Vec<FocusMode>, is_virtual: bool) -> CameraDevice {
        CameraDevice {
            id: "cam".into(),
            name: "Camera".into(),
            position: CameraPosition::Back,
            is_virtual,
            wide_angle_zoom: 2.0,
            has_torch: true,
            max_zoom: 8.0,
            focus_modes,
            exposure_modes: vec![ExposureMode::Locked, ExposureMode::ContinuousAutoExposure],
            min_exposure_bias: -8.0,
            max_exposure_bias: 8.0,
            max_white_balance_gain: 4.0,
            resolution: (1920, 1080),
        }
    }

    #[test]
    fn test_defaults_prefer_continuous_autofocus() {
        let dev = device(vec![FocusMode::Locked, FocusMode::ContinuousAutoFocus], false);
        let state = CameraState::defaults_for(&dev, true, Point::new(10.0, 20.0));
        assert_eq!(state.focus_mode, FocusMode::ContinuousAutoFocus);
        assert_eq!(state.focus_point, Point::new(10.0, 20.0));
        assert_eq!(state.zoom, 1.0);
        assert_eq!(state.white_balance, WhiteBalance::Auto);
    }

    #[test]
    fn test_defaults_fall_back_to_locked_focus() {
        let dev = device(vec![FocusMode::Locked], false);
        let state = CameraState::defaults_for(&dev, true, Point::default());
        assert_eq!(state.focus_mode, FocusMode::Locked);
    }

    #[test]
    fn test_virtual_camera_starts_at_wide_angle() {
        let dev = device(vec![FocusMode::Locked], true);
        assert_eq!(CameraState::defaults_for(&dev, true, Point::default()).zoom, 2.0);
        assert_eq!(CameraState::defaults_for(&dev, false, Point::default()).zoom, 1.0);
    }

    #[test]
    fn test_control_cell_generation() {
        let cell = ControlCell::default();
        assert_eq!(cell.generation(), 0);
        let generation = cell.publish(DeviceControls {
            zoom: 3.0,
            ..Default::default()
        });
        assert_eq!(generation, 1);
        assert_eq!(cell.snapshot().zoom, 3.0);
    }
}
