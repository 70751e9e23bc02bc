//! Camera capture for live broadcasting.
//!
//! This crate owns the active camera: device selection, the capture
//! configuration and the per-camera control state (focus, exposure, white
//! balance, zoom and torch). Platform cameras plug in through the
//! [`CameraDriver`] trait; [`SyntheticCamera`] generates test frames.

mod controls;
mod coords;
mod device;
mod error;
mod frame;
mod source;
mod synthetic;
pub mod white_balance;

pub use controls::{CameraState, ControlCell, DeviceControls, WhiteBalance};
pub use coords::PreviewGeometry;
pub use device::{
    CameraDevice, CameraDriver, CameraHandle, CaptureFormat, DeviceReadings, FrameSink,
};
pub use error::CaptureError;
pub use frame::{CaptureTimestamp, CapturedFrame};
pub use source::CaptureSource;
pub use synthetic::SyntheticCamera;

use livecast_ipc::{MAX_BROADCAST_DIMENSION, MAX_FRAMERATE, MIN_BROADCAST_DIMENSION, MIN_FRAMERATE};

/// Channel capacity for captured frames.
pub const FRAME_CHANNEL_CAPACITY: usize = 3;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Clamp a framerate range into the supported range, keeping `min <= max`.
pub fn clamp_framerate(max: f32, min: f32) -> (f32, f32) {
    let max = if max.is_finite() {
        max.clamp(MIN_FRAMERATE, MAX_FRAMERATE)
    } else {
        MAX_FRAMERATE
    };
    let min = if min.is_finite() {
        min.clamp(MIN_FRAMERATE, max)
    } else {
        MIN_FRAMERATE
    };
    (max, min)
}

/// Clamp a maximum broadcast dimension. Zero means the camera maximum.
pub fn clamp_broadcast_dimension(dimension: u32) -> u32 {
    if dimension == 0 {
        0
    } else {
        dimension.clamp(MIN_BROADCAST_DIMENSION, MAX_BROADCAST_DIMENSION)
    }
}
