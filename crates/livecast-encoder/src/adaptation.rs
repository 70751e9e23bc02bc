//! Rung selection from uplink feedback.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Uplink state over one measurement window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkWindow {
    /// Bytes waiting in the send buffer at the end of the window.
    pub backlog_bytes: u64,

    /// Backlog change over the window.
    pub backlog_growth: i64,

    /// Frames the send buffer dropped during the window.
    pub dropped_frames: u64,
}

impl UplinkWindow {
    /// Growing backlog, or a full buffer dropping frames.
    fn is_congested(&self) -> bool {
        (self.backlog_growth > 0 && self.backlog_bytes > 0) || self.dropped_frames > 0
    }

    fn is_clear(&self) -> bool {
        self.backlog_bytes == 0
    }
}

/// Tuning for [`AdaptationController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationParams {
    /// Consecutive congested windows before stepping down.
    pub congested_windows: u32,

    /// Consecutive clear windows before stepping up.
    pub hold_windows: u32,
}

impl Default for AdaptationParams {
    fn default() -> Self {
        Self {
            congested_windows: 3,
            hold_windows: 10,
        }
    }
}

/// Rung change decided by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationDecision {
    StepDown { from: usize, to: usize },
    StepUp { from: usize, to: usize },
}

impl AdaptationDecision {
    pub fn rung(&self) -> usize {
        match self {
            Self::StepDown { to, .. } | Self::StepUp { to, .. } => *to,
        }
    }
}

/// Moves one rung at a time through a quality ladder.
///
/// Sustained backlog growth or dropping steps down exactly one rung and restarts the
/// count, so a longer congestion needs another full run of windows to step
/// down again. A sustained empty backlog steps up after the hold period.
#[derive(Debug, Clone)]
pub struct AdaptationController {
    params: AdaptationParams,
    highest: usize,
    current: usize,
    congested: u32,
    clear: u32,
}

impl AdaptationController {
    pub fn new(params: AdaptationParams, rung_count: usize, initial: usize) -> Self {
        let highest = rung_count.saturating_sub(1);
        Self {
            params,
            highest,
            current: initial.min(highest),
            congested: 0,
            clear: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Feed one measurement window.
    pub fn on_window(&mut self, window: UplinkWindow) -> Option<AdaptationDecision> {
        if window.is_congested() {
            self.clear = 0;
            self.congested += 1;
            if self.congested >= self.params.congested_windows.max(1) {
                self.congested = 0;
                if self.current > 0 {
                    let from = self.current;
                    self.current -= 1;
                    info!(
                        from,
                        to = self.current,
                        backlog = window.backlog_bytes,
                        dropped = window.dropped_frames,
                        "Stepping down"
                    );
                    return Some(AdaptationDecision::StepDown {
                        from,
                        to: self.current,
                    });
                }
                debug!("Congested at lowest rung");
            }
        } else if window.is_clear() {
            self.congested = 0;
            self.clear += 1;
            if self.clear >= self.params.hold_windows.max(1) {
                self.clear = 0;
                if self.current < self.highest {
                    let from = self.current;
                    self.current += 1;
                    info!(from, to = self.current, "Stepping up");
                    return Some(AdaptationDecision::StepUp {
                        from,
                        to: self.current,
                    });
                }
            }
        } else {
            self.congested = 0;
            self.clear = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONGESTED: UplinkWindow = UplinkWindow {
        backlog_bytes: 50_000,
        backlog_growth: 10_000,
        dropped_frames: 0,
    };
    const SATURATED: UplinkWindow = UplinkWindow {
        backlog_bytes: 100_000,
        backlog_growth: 0,
        dropped_frames: 3,
    };
    const CLEAR: UplinkWindow = UplinkWindow {
        backlog_bytes: 0,
        backlog_growth: 0,
        dropped_frames: 0,
    };
    const DRAINING: UplinkWindow = UplinkWindow {
        backlog_bytes: 20_000,
        backlog_growth: -5_000,
        dropped_frames: 0,
    };

    fn controller() -> AdaptationController {
        AdaptationController::new(AdaptationParams::default(), 6, 4)
    }

    #[test]
    fn test_steps_down_exactly_one_rung() {
        let mut ctl = controller();
        assert_eq!(ctl.on_window(CONGESTED), None);
        assert_eq!(ctl.on_window(CONGESTED), None);
        assert_eq!(
            ctl.on_window(CONGESTED),
            Some(AdaptationDecision::StepDown { from: 4, to: 3 })
        );
        // Counter restarted; the next two congested windows do nothing.
        assert_eq!(ctl.on_window(CONGESTED), None);
        assert_eq!(ctl.on_window(CONGESTED), None);
        assert_eq!(ctl.current(), 3);
    }

    #[test]
    fn test_interrupted_congestion_does_not_step() {
        let mut ctl = controller();
        ctl.on_window(CONGESTED);
        ctl.on_window(CONGESTED);
        ctl.on_window(DRAINING);
        ctl.on_window(CONGESTED);
        ctl.on_window(CONGESTED);
        assert_eq!(ctl.current(), 4);
    }

    #[test]
    fn test_steps_up_after_hold() {
        let mut ctl = controller();
        for _ in 0..9 {
            assert_eq!(ctl.on_window(CLEAR), None);
        }
        assert_eq!(
            ctl.on_window(CLEAR),
            Some(AdaptationDecision::StepUp { from: 4, to: 5 })
        );
        for _ in 0..20 {
            assert_eq!(ctl.on_window(CLEAR), None);
        }
        assert_eq!(ctl.current(), 5);
    }

    #[test]
    fn test_full_buffer_keeps_stepping_down() {
        let mut ctl = AdaptationController::new(AdaptationParams::default(), 6, 5);
        let mut steps = 0;
        for _ in 0..15 {
            if let Some(decision) = ctl.on_window(SATURATED) {
                assert!(matches!(decision, AdaptationDecision::StepDown { .. }));
                steps += 1;
            }
        }
        assert_eq!(steps, 5);
        assert_eq!(ctl.current(), 0);
    }

    #[test]
    fn test_floor_at_lowest_rung() {
        let mut ctl = AdaptationController::new(AdaptationParams::default(), 3, 0);
        for _ in 0..9 {
            assert_eq!(ctl.on_window(CONGESTED), None);
        }
        assert_eq!(ctl.current(), 0);
    }
}
