//! Conversion from preview coordinates to normalized device coordinates.
//!
//! Device coordinates are in the sensor's native landscape orientation with
//! (0,0) at the top-left and (1,1) at the bottom-right. The preview shows the
//! image rotated to the preview orientation and scaled to fill the preview
//! frame, cropping whatever overflows.

use livecast_ipc::{Orientation, Point, Rect};

/// How the camera image is laid out in the preview.
#[derive(Debug, Clone, Copy)]
pub struct PreviewGeometry {
    /// Preview rectangle in view coordinates.
    pub frame: Rect,

    /// Orientation of the UI showing the preview.
    pub orientation: Orientation,

    /// Sensor resolution in landscape orientation.
    pub sensor: (u32, u32),

    /// Front cameras are shown mirrored.
    pub mirrored: bool,
}

impl PreviewGeometry {
    /// Convert a view point to normalized device coordinates.
    pub fn view_to_device(&self, point: Point) -> Point {
        let fw = self.frame.width.max(1.0);
        let fh = self.frame.height.max(1.0);
        let lx = ((point.x - self.frame.x) / fw).clamp(0.0, 1.0);
        let ly = ((point.y - self.frame.y) / fh).clamp(0.0, 1.0);

        let (sw, sh) = (self.sensor.0.max(1) as f32, self.sensor.1.max(1) as f32);
        let (iw, ih) = if self.orientation.is_portrait() {
            (sh, sw)
        } else {
            (sw, sh)
        };

        // Aspect fill
        let scale = (fw / iw).max(fh / ih);
        let (dw, dh) = (iw * scale, ih * scale);
        let mut u = (lx * fw + (dw - fw) / 2.0) / dw;
        let v = (ly * fh + (dh - fh) / 2.0) / dh;

        if self.mirrored {
            u = 1.0 - u;
        }

        let (x, y) = match self.orientation {
            Orientation::LandscapeRight => (u, v),
            Orientation::Portrait => (v, 1.0 - u),
            Orientation::LandscapeLeft => (1.0 - u, 1.0 - v),
            Orientation::PortraitUpsideDown => (1.0 - v, u),
        };

        Point::new(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
    }
}
