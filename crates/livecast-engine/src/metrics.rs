//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use livecast_encoder::PipelineStats;
use livecast_ipc::{StreamMetrics, WarningType};
use livecast_transport::UplinkSample;

/// Health below which a congestion warning is raised.
const CONGESTION_HEALTH: u8 = 50;

/// Collects stream metrics for one broadcast.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    target_fps: f32,
    pipeline: Arc<PipelineStats>,
    capture_drops: Arc<AtomicU64>,
    capture_drops_base: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_frame_count: AtomicU64,
    warned_capture_drops: AtomicU64,
    warned_encode_drops: AtomicU64,
}

impl MetricsCollector {
    /// `capture_drops` is the capture source's lifetime drop counter; only
    /// drops after [`start`](Self::start) are reported.
    pub fn new(target_fps: f32, pipeline: Arc<PipelineStats>, capture_drops: Arc<AtomicU64>) -> Self {
        Self {
            start_time: RwLock::new(None),
            target_fps,
            pipeline,
            capture_drops,
            capture_drops_base: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_frame_count: AtomicU64::new(0),
            warned_capture_drops: AtomicU64::new(0),
            warned_encode_drops: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
        self.capture_drops_base
            .store(self.capture_drops.load(Ordering::Relaxed), Ordering::Relaxed);
        self.last_frame_count
            .store(self.pipeline.frames_encoded(), Ordering::Relaxed);
    }

    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    fn capture_drops(&self) -> u64 {
        self.capture_drops
            .load(Ordering::Relaxed)
            .saturating_sub(self.capture_drops_base.load(Ordering::Relaxed))
    }

    /// Current metrics given the latest uplink window.
    pub fn snapshot(&self, uplink: &UplinkSample) -> StreamMetrics {
        let now = Instant::now();

        let elapsed = now.duration_since(*self.last_report_time.read()).as_secs_f32();
        let frames = self.pipeline.frames_encoded();
        let last_frames = self.last_frame_count.load(Ordering::Relaxed);
        let fps = if elapsed > 0.0 {
            frames.saturating_sub(last_frames) as f32 / elapsed
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        let rung = self.pipeline.rung();
        let capture_drops = self.capture_drops();
        let encode_drops = self.pipeline.encode_drops();
        let network_drops = uplink.network_drops;

        StreamMetrics {
            fps,
            target_fps: self.target_fps,
            bitrate_kbps: (uplink.speed_bytes_per_sec * 8.0 / 1000.0) as u32,
            target_bitrate_kbps: rung.bitrate_kbps,
            width: rung.width,
            height: rung.height,
            dropped_frames: capture_drops + encode_drops + network_drops,
            capture_drops,
            encode_drops,
            network_drops,
            health: uplink.health,
            backlog_bytes: uplink.backlog_bytes,
            uptime_seconds,
        }
    }

    /// Warnings for `metrics`. Drop warnings fire once per increase.
    pub fn check_warnings(&self, metrics: &StreamMetrics) -> Vec<WarningType> {
        let mut warnings = Vec::new();

        if metrics.health < CONGESTION_HEALTH {
            warnings.push(WarningType::NetworkCongestion {
                health: metrics.health,
            });
        }

        let seen = self
            .warned_capture_drops
            .swap(metrics.capture_drops, Ordering::Relaxed);
        if metrics.capture_drops > seen {
            warnings.push(WarningType::CaptureDrops {
                count: metrics.capture_drops - seen,
            });
        }

        let seen = self
            .warned_encode_drops
            .swap(metrics.encode_drops, Ordering::Relaxed);
        if metrics.encode_drops > seen {
            warnings.push(WarningType::EncodeDrops {
                count: metrics.encode_drops - seen,
            });
        }

        if !warnings.is_empty() {
            debug!(count = warnings.len(), "Performance warnings");
        }
        warnings
    }

    /// Update last report time for FPS calculation.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_frame_count
            .store(self.pipeline.frames_encoded(), Ordering::Relaxed);
    }
}
