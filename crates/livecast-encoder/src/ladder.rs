//! Quality ladder for adaptive streaming.

use serde::{Deserialize, Serialize};

/// Long-edge sizes offered below the broadcast bound.
const LONG_EDGE_STEPS: [u32; 6] = [1280, 960, 640, 480, 320, 240];

/// Bits per pixel per frame used to size rung bitrates.
const BITS_PER_PIXEL: f32 = 0.09;

/// Lowest bitrate any rung gets.
const MIN_RUNG_BITRATE_KBPS: u32 = 150;

/// One resolution and bitrate step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityRung {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl QualityRung {
    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Rungs ordered from lowest (index 0) to highest quality.
///
/// Every rung fits within the broadcast bound and the camera output, and
/// keeps the output aspect ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityLadder {
    rungs: Vec<QualityRung>,
}

impl QualityLadder {
    /// Build a ladder for a camera output of `output` (already rotated and
    /// cropped) bounded by `max_dimension` on the long edge (0 = no bound).
    pub fn new(output: (u32, u32), max_dimension: u32, fps: f32) -> Self {
        let (ow, oh) = (output.0.max(2), output.1.max(2));
        let long = ow.max(oh);
        let bound = if max_dimension == 0 {
            long
        } else {
            max_dimension.min(long)
        };

        let mut edges: Vec<u32> = LONG_EDGE_STEPS
            .iter()
            .copied()
            .filter(|&edge| edge < bound)
            .collect();
        edges.push(bound);
        edges.sort_unstable();
        edges.dedup();

        let rungs = edges
            .into_iter()
            .map(|edge| {
                let width = scale_even(ow, edge, long);
                let height = scale_even(oh, edge, long);
                let pixels = (width * height) as f32;
                let bitrate_kbps = ((pixels * fps.max(1.0) * BITS_PER_PIXEL) / 1000.0) as u32;
                QualityRung {
                    width,
                    height,
                    bitrate_kbps: bitrate_kbps.max(MIN_RUNG_BITRATE_KBPS),
                }
            })
            .collect();

        Self { rungs }
    }

    pub fn rungs(&self) -> &[QualityRung] {
        &self.rungs
    }

    pub fn len(&self) -> usize {
        self.rungs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    /// Rung at `index`, saturating at the top.
    pub fn rung(&self, index: usize) -> QualityRung {
        self.rungs[index.min(self.rungs.len() - 1)]
    }

    pub fn highest(&self) -> usize {
        self.rungs.len() - 1
    }

    pub fn lowest(&self) -> QualityRung {
        self.rungs[0]
    }

    /// Starting rung: the highest rung whose bitrate fits 80% of a measured
    /// link speed, or the middle rung when the speed is unknown.
    pub fn initial_rung(&self, link_speed_bytes_per_sec: Option<f32>) -> usize {
        match link_speed_bytes_per_sec {
            Some(speed) if speed > 0.0 => {
                let budget_kbps = speed * 8.0 * 0.8 / 1000.0;
                self.rungs
                    .iter()
                    .rposition(|r| r.bitrate_kbps as f32 <= budget_kbps)
                    .unwrap_or(0)
            }
            _ => self.rungs.len() / 2,
        }
    }
}

/// Scale `value` by `num / den`, rounded down to an even number of at least 2.
fn scale_even(value: u32, num: u32, den: u32) -> u32 {
    let scaled = (value as u64 * num as u64 / den.max(1) as u64) as u32;
    (scaled & !1).max(2)
}
