//! The raw↔watt power curve and telemetry smoothing filters.
//!
//! The brake reports power and accepts load as dimensionless 16-bit "raw"
//! numbers. The mapping to mechanical watts is linear in raw power with a
//! slope that depends on roller speed:
//!
//! ```text
//! slope = 6.7e-6 · raw_speed + 2e-3
//! watts = slope · raw_power
//! ```
//!
//! The offset term is zero today; it is kept in the model so a future
//! calibration pass can populate it without reshaping the API.

/// Per-raw-speed component of the power-curve slope.
pub const CURVE_SLOPE_PER_RAW_SPEED: f64 = 6.7e-6;
/// Constant component of the power-curve slope.
pub const CURVE_SLOPE_OFFSET: f64 = 2.0e-3;
/// Constant offset of the power curve. Zero until a calibration procedure
/// measures otherwise.
pub const CURVE_OFFSET_WATTS: f64 = 0.0;

/// Raw-speed floor substituted when the roller is stationary (~5 mph).
/// Without it the inverse mapping would ask for raw loads far beyond what
/// the brake accepts.
pub const RAW_SPEED_FLOOR: f64 = 2200.0;

/// Speed-dependent slope of the raw→watt line. Applies [`RAW_SPEED_FLOOR`]
/// at rest so the mapping stays invertible in both directions.
pub fn power_curve_slope(raw_speed: f64) -> f64 {
    let raw_speed = if raw_speed == 0.0 {
        RAW_SPEED_FLOOR
    } else {
        raw_speed
    };
    CURVE_SLOPE_PER_RAW_SPEED * raw_speed + CURVE_SLOPE_OFFSET
}

/// Convert a raw power reading into watts at the given raw roller speed.
pub fn watts_from_raw(raw_power: f64, raw_speed: f64) -> f64 {
    power_curve_slope(raw_speed) * raw_power + CURVE_OFFSET_WATTS
}

/// Convert a desired wattage into the raw brake load at the given raw
/// roller speed.
pub fn raw_load_from_watts(watts: f64, raw_speed: f64) -> f64 {
    (watts - CURVE_OFFSET_WATTS) / power_curve_slope(raw_speed)
}

/// Raw ergo-mode brake value for a desired wattage, rounded and clamped to
/// the encodable range.
pub fn brake_raw_for_watts(watts: f64, raw_speed: f64) -> u16 {
    raw_load_from_watts(watts, raw_speed)
        .round()
        .clamp(0.0, u16::MAX as f64) as u16
}

/// Exponential moving average applied to decoded watts before publication.
///
/// Negative instantaneous readings (the brake back-drives while coasting)
/// are floored at zero before blending.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerFilter {
    value: f64,
}

/// Fraction of the previous estimate retained per sample.
pub const POWER_FILTER_KEEP: f64 = 0.75;
/// Fraction of the new sample blended in.
pub const POWER_FILTER_BLEND: f64 = 0.25;

impl PowerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend one instantaneous wattage into the estimate and return the new
    /// filtered value.
    pub fn update(&mut self, watts: f64) -> f64 {
        self.value = POWER_FILTER_KEEP * self.value + POWER_FILTER_BLEND * watts.max(0.0);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Single-pole IIR used to settle the raw brake load observed during a
/// calibration spin-down: `calib ← 0.1·calib + 0.9·(0.9·raw_power)`.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationFilter {
    value: f64,
}

const CALIBRATION_KEEP: f64 = 0.1;
const CALIBRATION_BLEND: f64 = 0.9;
const CALIBRATION_SCALE: f64 = 0.9;

impl CalibrationFilter {
    pub fn new(initial_raw: f64) -> Self {
        Self { value: initial_raw }
    }

    /// Fold one raw power observation into the calibration estimate.
    pub fn update(&mut self, raw_power: f64) -> f64 {
        self.value =
            CALIBRATION_KEEP * self.value + CALIBRATION_BLEND * (CALIBRATION_SCALE * raw_power);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}
