//! Uplink health score.

use std::collections::VecDeque;

/// Sliding-window health score from send buffer counters.
///
/// Each window scores `100 * min(1, sent / enqueued)`. A window where nothing
/// was enqueued scores 100 if the backlog is empty or still draining and 0 if
/// the backlog is stuck.
#[derive(Debug, Clone)]
pub struct HealthEstimator {
    capacity: usize,
    scores: VecDeque<f32>,
}

impl HealthEstimator {
    pub fn new(windows: usize) -> Self {
        let capacity = windows.max(1);
        Self {
            capacity,
            scores: VecDeque::with_capacity(capacity),
        }
    }

    /// Score of a single window.
    pub fn window_score(enqueued: u64, sent: u64, backlog: u64) -> f32 {
        if enqueued == 0 {
            return if backlog == 0 || sent > 0 { 100.0 } else { 0.0 };
        }
        100.0 * (sent as f32 / enqueued as f32).min(1.0)
    }

    /// Add one window and return the updated health.
    pub fn record(&mut self, enqueued: u64, sent: u64, backlog: u64) -> u8 {
        if self.scores.len() == self.capacity {
            self.scores.pop_front();
        }
        self.scores
            .push_back(Self::window_score(enqueued, sent, backlog));
        self.health()
    }

    /// Average over the recorded windows, 100 before the first window.
    pub fn health(&self) -> u8 {
        if self.scores.is_empty() {
            return 100;
        }
        let avg = self.scores.iter().sum::<f32>() / self.scores.len() as f32;
        avg.round().clamp(0.0, 100.0) as u8
    }

    pub fn reset(&mut self) {
        self.scores.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_score() {
        assert_eq!(HealthEstimator::window_score(1000, 1000, 0), 100.0);
        assert_eq!(HealthEstimator::window_score(1000, 2000, 0), 100.0);
        assert_eq!(HealthEstimator::window_score(1000, 250, 750), 25.0);
        assert_eq!(HealthEstimator::window_score(0, 0, 0), 100.0);
        assert_eq!(HealthEstimator::window_score(0, 0, 5000), 0.0);
        assert_eq!(HealthEstimator::window_score(0, 100, 5000), 100.0);
    }

    #[test]
    fn test_sliding_average() {
        let mut health = HealthEstimator::new(2);
        assert_eq!(health.health(), 100);
        assert_eq!(health.record(100, 50, 50), 50);
        assert_eq!(health.record(100, 100, 50), 75);
        // First window falls out
        assert_eq!(health.record(100, 0, 150), 50);
        health.reset();
        assert_eq!(health.health(), 100);
    }
}
