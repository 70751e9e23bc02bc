//! Audio level metering.

use std::sync::atomic::{AtomicU32, Ordering};

/// Level reported for silence or when no audio is captured.
pub const SILENCE_DB: f32 = -160.0;

/// Peak hold decay per metered chunk (20 dB/s at 10ms chunks).
const PEAK_DECAY_DB: f32 = 0.2;

/// Weight of the newest chunk in the average power.
const AVERAGE_WEIGHT: f32 = 0.2;

/// Lock-free level meter, updated from the mixer thread.
///
/// Levels are in dBFS, from -160 (silence) to 0 (full scale).
#[derive(Debug)]
pub struct LevelMeter {
    average_power: AtomicU32,
    peak_hold_db: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            average_power: AtomicU32::new(0f32.to_bits()),
            peak_hold_db: AtomicU32::new(SILENCE_DB.to_bits()),
        }
    }

    /// Meter one chunk of samples.
    pub fn update(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let power = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let previous = f32::from_bits(self.average_power.load(Ordering::Relaxed));
        let average = previous + AVERAGE_WEIGHT * (power - previous);
        self.average_power.store(average.to_bits(), Ordering::Relaxed);

        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let peak_db = amplitude_to_db(peak);
        let held = f32::from_bits(self.peak_hold_db.load(Ordering::Relaxed)) - PEAK_DECAY_DB;
        self.peak_hold_db
            .store(peak_db.max(held).max(SILENCE_DB).to_bits(), Ordering::Relaxed);
    }

    /// Smoothed average power in dB.
    pub fn average_power_db(&self) -> f32 {
        let power = f32::from_bits(self.average_power.load(Ordering::Relaxed));
        power_to_db(power)
    }

    /// Decaying peak hold in dB.
    pub fn peak_hold_db(&self) -> f32 {
        f32::from_bits(self.peak_hold_db.load(Ordering::Relaxed)).clamp(SILENCE_DB, 0.0)
    }

    pub fn reset(&self) {
        self.average_power.store(0f32.to_bits(), Ordering::Relaxed);
        self.peak_hold_db.store(SILENCE_DB.to_bits(), Ordering::Relaxed);
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * amplitude.log10()).clamp(SILENCE_DB, 0.0)
    }
}

fn power_to_db(power: f32) -> f32 {
    if power <= 0.0 {
        SILENCE_DB
    } else {
        (10.0 * power.log10()).clamp(SILENCE_DB, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence() {
        let meter = LevelMeter::new();
        meter.update(&[0.0; 960]);
        assert_eq!(meter.average_power_db(), SILENCE_DB);
        assert_eq!(meter.peak_hold_db(), SILENCE_DB);
    }

    #[test]
    fn test_full_scale_peak() {
        let meter = LevelMeter::new();
        meter.update(&[1.0, -1.0, 0.5, 0.0]);
        assert!(meter.peak_hold_db().abs() < 1e-4);
        assert!(meter.average_power_db() < 0.0);
    }

    #[test]
    fn test_average_converges() {
        let meter = LevelMeter::new();
        for _ in 0..200 {
            meter.update(&[0.5; 960]);
        }
        // 0.5 amplitude is about -6 dB
        assert!((meter.average_power_db() + 6.02).abs() < 0.1);
    }

    #[test]
    fn test_peak_hold_decays() {
        let meter = LevelMeter::new();
        meter.update(&[1.0; 4]);
        for _ in 0..10 {
            meter.update(&[0.0; 4]);
        }
        let held = meter.peak_hold_db();
        assert!((held + 2.0).abs() < 1e-3, "{held}");

        meter.reset();
        assert_eq!(meter.peak_hold_db(), SILENCE_DB);
    }
}
