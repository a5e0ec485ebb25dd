//! Deterministic per-sensor risk scoring.
//!
//! Each component maps one measurement into [0,1] through a piecewise-linear
//! monotonic curve; the weighted sum is amplified by 24-hour rainfall and
//! clipped back into [0,1]. Pure function of (reading, zone threshold) - no
//! I/O, no clock.

use crate::models::Reading;

pub const WEIGHT_MOISTURE: f64 = 0.35;
pub const WEIGHT_TILT_VELOCITY: f64 = 0.25;
pub const WEIGHT_VIBRATION: f64 = 0.15;
pub const WEIGHT_PORE_PRESSURE: f64 = 0.15;
pub const WEIGHT_SAFETY_FACTOR: f64 = 0.10;

/// Fallback moisture threshold when no zone context is available (percent).
pub const DEFAULT_CRITICAL_MOISTURE: f64 = 40.0;

/// Linear ramp from (x0, 0.0) to (x1, 1.0), clamped.
fn ramp(x: f64, x0: f64, x1: f64) -> f64 {
    if x <= x0 {
        0.0
    } else if x >= x1 {
        1.0
    } else {
        (x - x0) / (x1 - x0)
    }
}

/// Two-segment ramp: 0 at `a`, 0.5 at `b`, 1.0 at `c`, clamped.
fn ramp2(x: f64, a: f64, b: f64, c: f64) -> f64 {
    if x <= a {
        0.0
    } else if x <= b {
        0.5 * (x - a) / (b - a)
    } else if x < c {
        0.5 + 0.5 * (x - b) / (c - b)
    } else {
        1.0
    }
}

/// Moisture score relative to the site-specific critical threshold.
/// Below 60% of critical the matric suction keeps the slope stable.
pub fn score_moisture(moisture_percent: f64, critical: f64) -> f64 {
    ramp(moisture_percent, 0.6 * critical, critical)
}

/// Tilt rate score. 5 mm/hr creep is the observed pre-failure signature.
pub fn score_tilt_velocity(rate_mm_hr: f64) -> f64 {
    ramp2(rate_mm_hr, 1.0, 5.0, 10.0)
}

/// Vibration score against the sensor's baseline event rate.
pub fn score_vibration(count: f64, baseline: f64) -> f64 {
    let ratio = count / baseline.max(1.0);
    ramp2(ratio, 2.0, 5.0, 10.0)
}

/// Pore pressure score. Negative pressure is suction (stabilising).
pub fn score_pore_pressure(kpa: f64) -> f64 {
    ramp2(kpa, 0.0, 5.0, 10.0)
}

/// Factor-of-safety score. FoS < 1.0 means driving forces exceed resisting
/// forces. A reported 0 is treated as "not computed" unless the operator
/// flips `zero_is_failure`.
pub fn score_safety_factor(sf: f64, zero_is_failure: bool) -> f64 {
    if sf == 0.0 {
        return if zero_is_failure { 1.0 } else { 0.0 };
    }
    if sf >= 1.5 {
        0.0
    } else if sf >= 1.2 {
        // 0.5 at 1.2, down to 0 at 1.5
        0.5 * (1.5 - sf) / 0.3
    } else if sf > 1.0 {
        // 1.0 at 1.0, down to 0.5 at 1.2
        0.5 + 0.5 * (1.2 - sf) / 0.2
    } else {
        1.0
    }
}

/// Rainfall amplification multiplier over the weighted component sum.
pub fn rainfall_amplifier(rainfall_24h_mm: f64) -> f64 {
    if rainfall_24h_mm < 75.0 {
        1.0
    } else if rainfall_24h_mm < 100.0 {
        1.1
    } else if rainfall_24h_mm < 150.0 {
        1.2
    } else if rainfall_24h_mm < 200.0 {
        1.3
    } else {
        1.5
    }
}

/// Composite base risk in [0,1] for a single reading.
///
/// Missing optional measurements contribute 0 to their component without
/// reweighting the others.
pub fn base_risk(reading: &Reading, critical_moisture: f64, zero_sf_is_failure: bool) -> f64 {
    let moisture = score_moisture(reading.moisture_percent, critical_moisture);
    let tilt = reading.tilt_rate_mm_hr.map_or(0.0, score_tilt_velocity);
    let vibration = reading
        .vibration_count
        .map_or(0.0, |count| score_vibration(count, reading.vibration_baseline.unwrap_or(0.0)));
    let pore = reading.pore_pressure_kpa.map_or(0.0, score_pore_pressure);
    let safety = reading
        .safety_factor
        .map_or(0.0, |sf| score_safety_factor(sf, zero_sf_is_failure));

    let weighted = moisture * WEIGHT_MOISTURE
        + tilt * WEIGHT_TILT_VELOCITY
        + vibration * WEIGHT_VIBRATION
        + pore * WEIGHT_PORE_PRESSURE
        + safety * WEIGHT_SAFETY_FACTOR;

    let amplifier = reading.rainfall_24h_mm.map_or(1.0, rainfall_amplifier);

    (weighted * amplifier).clamp(0.0, 1.0)
}
