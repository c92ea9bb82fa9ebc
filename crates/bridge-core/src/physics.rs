//! Road-load model: the wattage a rider must produce to hold a speed on a
//! simulated road.
//!
//! Used when the FE-C controller runs a simulation (slope) session: the
//! gradient, rolling resistance, and wind parameters arrive over the air,
//! and the bridge converts them into an ergo watt target the brake can
//! execute deterministically.

/// Standard gravity, m/s².
pub const GRAVITY_M_S2: f64 = 9.80665;

/// Rider, bike, and environment parameters feeding the road model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RideParameters {
    pub user_weight_kg: f64,
    pub bike_weight_kg: f64,
    /// Road gradient in percent.
    pub slope_pct: f64,
    /// Coefficient of rolling resistance.
    pub crr: f64,
    /// Frontal-drag coefficient in kg/m.
    pub wind_resistance_coefficient: f64,
    /// Headwind (positive) or tailwind (negative) in km/h.
    pub wind_speed_kph: f64,
    /// 0.0 (fully shielded) to 1.0 (no drafting benefit).
    pub drafting_factor: f64,
}

impl Default for RideParameters {
    fn default() -> Self {
        Self {
            user_weight_kg: 75.0,
            bike_weight_kg: 10.0,
            slope_pct: 0.0,
            crr: 0.004,
            wind_resistance_coefficient: 0.51,
            wind_speed_kph: 0.0,
            drafting_factor: 1.0,
        }
    }
}

/// Wattage required to ride at `speed_kph` under the given conditions.
///
/// Gravity and rolling terms resolve the gradient through `atan` so steep
/// slopes stay physical; drag grows with the square of air speed (ground
/// speed plus wind). The result is unclamped — the trainer controller clamps
/// to the brake's [50, 1000] W window on commit.
pub fn power_required_watts(speed_kph: f64, params: &RideParameters) -> f64 {
    let mass_kg = params.user_weight_kg + params.bike_weight_kg;
    let slope = params.slope_pct / 100.0;
    let air_speed_m_s = (speed_kph + params.wind_speed_kph) * 1000.0 / 3600.0;

    let f_gravity = GRAVITY_M_S2 * slope.atan().sin() * mass_kg;
    let f_rolling = GRAVITY_M_S2 * slope.atan().cos() * mass_kg * params.crr;
    let f_drag = 0.5
        * params.wind_resistance_coefficient
        * air_speed_m_s
        * air_speed_m_s
        * params.drafting_factor;

    (f_gravity + f_rolling + f_drag) * air_speed_m_s
}
