//! White balance gain math.
//!
//! Temperatures map to the RGB of a black-body illuminant; the gains that
//! neutralize that illuminant are its reciprocal, normalized so the smallest
//! gain is 1.0. Tint scales the green gain.

use livecast_ipc::{TemperatureTint, WhiteBalanceGains};

/// Supported tint range.
pub const MIN_TINT: f32 = -150.0;
pub const MAX_TINT: f32 = 150.0;

/// Tint at which the green gain is scaled by zero; tint/TINT_SCALE is the
/// relative change of the green gain.
const TINT_SCALE: f32 = 600.0;

const MIN_TEMPERATURE: f32 = 1000.0;
const MAX_TEMPERATURE: f32 = 40_000.0;

/// Clamp each channel into `[1.0, max_gain]`.
pub fn clamp_gains(gains: WhiteBalanceGains, max_gain: f32) -> WhiteBalanceGains {
    let max_gain = max_gain.max(1.0);
    let clamp = |g: f32| {
        if g.is_finite() {
            g.clamp(1.0, max_gain)
        } else {
            1.0
        }
    };
    WhiteBalanceGains::new(clamp(gains.red), clamp(gains.green), clamp(gains.blue))
}

/// Black-body color at `kelvin`, each channel in `[1, 255]`.
fn blackbody_rgb(kelvin: f32) -> (f32, f32, f32) {
    let t = kelvin.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE) / 100.0;

    let red = if t <= 66.0 {
        255.0
    } else {
        329.698_73 * (t - 60.0).powf(-0.133_204_76)
    };

    let green = if t <= 66.0 {
        99.470_8 * t.ln() - 161.119_57
    } else {
        288.122_17 * (t - 60.0).powf(-0.075_514_85)
    };

    let blue = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        138.517_73 * (t - 10.0).ln() - 305.044_8
    };

    (
        red.clamp(1.0, 255.0),
        green.clamp(1.0, 255.0),
        blue.clamp(1.0, 255.0),
    )
}

/// Unnormalized reciprocal gains for an illuminant.
fn base_gains(kelvin: f32) -> (f32, f32, f32) {
    let (r, g, b) = blackbody_rgb(kelvin);
    (1.0 / r, 1.0 / g, 1.0 / b)
}

/// Convert temperature and tint to gains clamped into `[1.0, max_gain]`.
///
/// Tint is clamped into `[-150, 150]` first.
pub fn temperature_tint_to_gains(values: TemperatureTint, max_gain: f32) -> WhiteBalanceGains {
    let tint = values.tint.clamp(MIN_TINT, MAX_TINT);
    let (r, g, b) = base_gains(values.temperature);
    let g = g * (1.0 - tint / TINT_SCALE);

    let min = r.min(g).min(b);
    clamp_gains(WhiteBalanceGains::new(r / min, g / min, b / min), max_gain)
}

/// The temperature and tint that `temperature_tint_to_gains` actually applies
/// for `values` under `max_gain`.
///
/// Temperatures are held to the range the illuminant model covers. When the
/// gains had to be capped, the temperature is read back from the capped gains.
pub fn applied_temperature_tint(values: TemperatureTint, max_gain: f32) -> TemperatureTint {
    let tint = values.tint.clamp(MIN_TINT, MAX_TINT);
    let capped = temperature_tint_to_gains(values, max_gain);
    let uncapped = temperature_tint_to_gains(values, f32::INFINITY);
    let temperature = if capped == uncapped {
        values.temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
    } else {
        gains_to_temperature_tint(capped).temperature
    };
    TemperatureTint::new(temperature, tint)
}

/// Estimate the temperature and tint that produce `gains`.
pub fn gains_to_temperature_tint(gains: WhiteBalanceGains) -> TemperatureTint {
    // red/blue gain ratio grows monotonically with temperature
    let target = gains.red / gains.blue.max(f32::EPSILON);
    let ratio = |k: f32| {
        let (r, _, b) = base_gains(k);
        r / b
    };

    let (mut lo, mut hi) = (MIN_TEMPERATURE, MAX_TEMPERATURE);
    for _ in 0..48 {
        let mid = (lo + hi) / 2.0;
        if ratio(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let temperature = (lo + hi) / 2.0;

    let (r, g, _) = base_gains(temperature);
    let scale = gains.red / r;
    let tint = TINT_SCALE * (1.0 - gains.green / (scale * g));

    TemperatureTint::new(temperature, tint.clamp(MIN_TINT, MAX_TINT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_gains() {
        let gains = clamp_gains(WhiteBalanceGains::new(0.2, 2.5, 9.0), 4.0);
        assert_eq!(gains, WhiteBalanceGains::new(1.0, 2.5, 4.0));
    }

    #[test]
    fn test_clamp_gains_rejects_nan() {
        let gains = clamp_gains(WhiteBalanceGains::new(f32::NAN, 1.5, 1.5), 4.0);
        assert_eq!(gains.red, 1.0);
    }

    #[test]
    fn test_daylight_gains_are_in_range() {
        let gains = temperature_tint_to_gains(TemperatureTint::new(5000.0, 0.0), 4.0);
        for g in [gains.red, gains.green, gains.blue] {
            assert!((1.0..=4.0).contains(&g));
        }
        // Warm light needs more blue than red.
        assert!(gains.blue > gains.red);
    }

    #[test]
    fn test_extreme_temperature_is_capped() {
        let gains = temperature_tint_to_gains(TemperatureTint::new(500.0, 0.0), 3.0);
        assert_eq!(gains.blue, 3.0);
        assert!(gains.red >= 1.0);
    }

    #[test]
    fn test_tint_is_clamped() {
        let a = temperature_tint_to_gains(TemperatureTint::new(5000.0, 150.0), 8.0);
        let b = temperature_tint_to_gains(TemperatureTint::new(5000.0, 900.0), 8.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_applied_temperature_follows_capped_gains() {
        let applied = applied_temperature_tint(TemperatureTint::new(1_000_000.0, 0.0), 4.0);
        assert!(applied.temperature <= MAX_TEMPERATURE);

        // Very warm light needs more blue than a 2.0 cap allows
        let applied = applied_temperature_tint(TemperatureTint::new(1500.0, 0.0), 2.0);
        let reached = gains_to_temperature_tint(temperature_tint_to_gains(
            TemperatureTint::new(1500.0, 0.0),
            2.0,
        ));
        assert!(applied.temperature > 1500.0);
        assert_eq!(applied.temperature, reached.temperature);

        let applied = applied_temperature_tint(TemperatureTint::new(5000.0, 900.0), 8.0);
        assert_eq!(applied, TemperatureTint::new(5000.0, MAX_TINT));
    }

    #[test]
    fn test_round_trip_temperature_and_tint() {
        let original = TemperatureTint::new(5000.0, 20.0);
        let gains = temperature_tint_to_gains(original, 4.0);
        let back = gains_to_temperature_tint(gains);
        assert!((back.temperature - 5000.0).abs() < 50.0, "{back:?}");
        assert!((back.tint - 20.0).abs() < 1.0, "{back:?}");
    }
}
