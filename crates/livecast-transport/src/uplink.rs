//! Periodic uplink measurement.

use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::health::HealthEstimator;
use crate::send_buffer::SendBuffer;

/// One measurement window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UplinkSample {
    /// Bytes waiting in the send buffer at the end of the window.
    pub backlog_bytes: u64,

    /// Backlog change over the window.
    pub backlog_growth: i64,

    /// Bytes written during the window.
    pub sent_bytes: u64,

    /// Throughput over the window.
    pub speed_bytes_per_sec: f32,

    /// Health after this window, 0 when disconnected.
    pub health: u8,

    /// Frames dropped from the send buffer so far.
    pub network_drops: u64,

    /// Frames dropped from the send buffer during the window.
    pub window_drops: u64,
}

/// Turns send buffer counters into [`UplinkSample`]s.
pub struct UplinkMonitor {
    buffer: Arc<SendBuffer>,
    health: HealthEstimator,
    last_enqueued: u64,
    last_sent: u64,
    last_backlog: u64,
    last_dropped: u64,
    last_at: Instant,
}

impl UplinkMonitor {
    pub fn new(buffer: Arc<SendBuffer>, windows: usize) -> Self {
        let last_enqueued = buffer.enqueued_bytes();
        let last_sent = buffer.sent_bytes();
        let last_backlog = buffer.backlog_bytes();
        let last_dropped = buffer.dropped_frames();
        Self {
            buffer,
            health: HealthEstimator::new(windows),
            last_enqueued,
            last_sent,
            last_backlog,
            last_dropped,
            last_at: Instant::now(),
        }
    }

    /// Close the current window.
    pub fn measure(&mut self, connected: bool) -> UplinkSample {
        self.measure_at(Instant::now(), connected)
    }

    pub fn measure_at(&mut self, now: Instant, connected: bool) -> UplinkSample {
        let enqueued = self.buffer.enqueued_bytes();
        let sent = self.buffer.sent_bytes();
        let backlog = self.buffer.backlog_bytes();
        let dropped = self.buffer.dropped_frames();
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f32();

        let enqueued_delta = enqueued.saturating_sub(self.last_enqueued);
        let sent_delta = sent.saturating_sub(self.last_sent);
        let growth = backlog as i64 - self.last_backlog as i64;
        let window_drops = dropped.saturating_sub(self.last_dropped);

        self.last_enqueued = enqueued;
        self.last_sent = sent;
        self.last_backlog = backlog;
        self.last_dropped = dropped;
        self.last_at = now;

        if !connected {
            self.health.reset();
            return UplinkSample {
                backlog_bytes: backlog,
                backlog_growth: growth,
                network_drops: dropped,
                window_drops,
                ..Default::default()
            };
        }

        let health = self.health.record(enqueued_delta, sent_delta, backlog);
        let speed = if elapsed > 0.0 {
            sent_delta as f32 / elapsed
        } else {
            0.0
        };
        trace!(backlog, growth, sent_delta, window_drops, health, "Uplink window");

        UplinkSample {
            backlog_bytes: backlog,
            backlog_growth: growth,
            sent_bytes: sent_delta,
            speed_bytes_per_sec: speed,
            health,
            network_drops: dropped,
            window_drops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameKind};
    use crate::send_buffer::SendBufferConfig;
    use bytes::Bytes;
    use std::time::Duration;

    fn video(len: usize) -> Frame {
        Frame::new(FrameKind::Video, 0, Bytes::from(vec![0u8; len]))
    }

    #[test]
    fn test_congested_window() {
        let buffer = Arc::new(SendBuffer::new(SendBufferConfig::default()));
        let start = Instant::now();
        let mut monitor = UplinkMonitor::new(Arc::clone(&buffer), 5);

        buffer.push(video(990)).unwrap();
        buffer.push(video(990)).unwrap();
        let first = buffer.pop().unwrap();
        buffer.mark_sent(first.encoded_len());

        let sample = monitor.measure_at(start + Duration::from_secs(1), true);
        assert_eq!(sample.backlog_bytes, 1000);
        assert_eq!(sample.backlog_growth, 1000);
        assert_eq!(sample.sent_bytes, 1000);
        assert_eq!(sample.health, 50);
        assert!(sample.speed_bytes_per_sec > 0.0);
    }

    #[test]
    fn test_full_buffer_reports_window_drops() {
        let buffer = Arc::new(SendBuffer::new(SendBufferConfig {
            media_bytes: 3000,
            ..Default::default()
        }));
        let start = Instant::now();
        let mut monitor = UplinkMonitor::new(Arc::clone(&buffer), 5);

        for _ in 0..5 {
            buffer.push(video(990)).unwrap();
        }
        let sample = monitor.measure_at(start + Duration::from_secs(1), true);
        assert_eq!(sample.backlog_bytes, 3000);
        assert_eq!(sample.window_drops, 2);

        // Still full, growth is flat but frames keep dropping
        buffer.push(video(990)).unwrap();
        let sample = monitor.measure_at(start + Duration::from_secs(2), true);
        assert_eq!(sample.backlog_growth, 0);
        assert_eq!(sample.window_drops, 1);
        assert_eq!(sample.network_drops, 3);

        let sample = monitor.measure_at(start + Duration::from_secs(3), true);
        assert_eq!(sample.window_drops, 0);
    }

    #[test]
    fn test_health_zero_when_disconnected() {
        let buffer = Arc::new(SendBuffer::new(SendBufferConfig::default()));
        let mut monitor = UplinkMonitor::new(Arc::clone(&buffer), 5);
        buffer.push(video(10)).unwrap();
        buffer.mark_sent(20);

        let sample = monitor.measure(false);
        assert_eq!(sample.health, 0);
        assert_eq!(sample.speed_bytes_per_sec, 0.0);
    }
}
