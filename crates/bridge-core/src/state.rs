//! The guarded state record shared by the trainer controller and the FE-C
//! scheduler.
//!
//! One mutex guards the whole record. Every accessor takes the lock for the
//! duration of one read- or write-snapshot and never across I/O, so
//! contention stays negligible at the loops' 3–4 Hz cadence. Readers observe
//! a consistent snapshot of whatever field group an accessor touches;
//! writers publish complete updates before releasing.

use crate::physics::RideParameters;
use fec_protocol::CommandStatusCode;
use fortius_protocol::{
    MAX_GRADIENT_PCT, MAX_LOAD_WATTS, MAX_WEIGHT_KG, MIN_GRADIENT_PCT, MIN_LOAD_WATTS,
    MIN_WEIGHT_KG,
};
use std::sync::Mutex;
use std::time::Instant;

/// Device status bit: the controller thread is running.
pub const STATUS_RUNNING: u8 = 0x01;
/// Device status bit: telemetry collection is paused.
pub const STATUS_PAUSED: u8 = 0x02;
/// Device status bit: the controller died on an unrecoverable error.
pub const STATUS_ERROR: u8 = 0x04;

/// Snapshot of the controller's lifecycle flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus(u8);

impl DeviceStatus {
    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_running(self) -> bool {
        self.0 & STATUS_RUNNING != 0
    }

    pub fn is_paused(self) -> bool {
        self.0 & STATUS_PAUSED != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & STATUS_ERROR != 0
    }
}

/// Operating mode commanded to the brake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerMode {
    Idle,
    Ergo,
    Slope,
    Calibrate,
}

/// Mode requested over the air. Track-resistance pages request Slope,
/// target-power and basic-resistance pages request Ergo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Ergo,
    Slope,
}

/// Progress of the user-configuration handshake. Monotonic: never retreats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserConfigState {
    /// No configuration received and none requested yet.
    Empty,
    /// The trainer-status nibble is advertising that configuration is
    /// required.
    Waiting,
    /// A valid User Configuration page has been applied.
    Received,
}

/// Telemetry snapshot handed to readers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub power_w: f64,
    pub heart_rate_bpm: f64,
    pub cadence_rpm: f64,
    pub speed_kph: f64,
    pub distance_m: f64,
    /// OR-accumulated button bits; cleared by [`SharedState::take_telemetry`].
    pub buttons: u32,
    pub steering: i32,
    pub status: DeviceStatus,
}

/// One full brake telemetry update published by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrakeTelemetry {
    pub power_w: f64,
    pub heart_rate_bpm: f64,
    pub cadence_rpm: f64,
    pub speed_kph: f64,
    pub distance_m: f64,
    pub raw_power: f64,
    pub raw_speed: f64,
}

/// Startup configuration for the state record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateConfig {
    pub user_weight_kg: f64,
    pub bike_weight_kg: f64,
    pub wheel_circumference_mm: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        // FE-C profile defaults; 2105 mm is a 700×25c tire.
        Self {
            user_weight_kg: 75.0,
            bike_weight_kg: 10.0,
            wheel_circumference_mm: 2105.0,
        }
    }
}

struct Inner {
    // Telemetry, written by the controller.
    power_w: f64,
    heart_rate_bpm: f64,
    cadence_rpm: f64,
    speed_kph: f64,
    distance_m: f64,
    buttons: u32,
    steering: i32,
    raw_power: f64,
    raw_speed: f64,
    status: u8,

    // Set-points, read by the controller.
    mode: TrainerMode,
    load_w: f64,
    gradient_pct: f64,
    weight_kg: f64,
    brake_calibration_factor: f64,
    brake_calibration_load_raw: f64,
    power_scale_factor: f64,

    // Environment and rider, written by the scheduler from control pages.
    target_power_w: f64,
    requested_mode: RequestedMode,
    wind_resistance_coefficient: f64,
    wind_speed_kph: f64,
    drafting_factor: f64,
    slope_pct: f64,
    crr: f64,
    user_weight_kg: f64,
    bike_weight_kg: f64,
    wheel_circumference_mm: f64,
    user_config_state: UserConfigState,

    // FE-C protocol bookkeeping.
    last_rx_command_id: u8,
    sequence_number: u8,
    command_status: u8,
    pending_request: Option<u8>,
}

/// The single shared record. Created once at daemon start; both workers hold
/// an `Arc` to it, neither owns the other.
pub struct SharedState {
    inner: Mutex<Inner>,
    started: Instant,
}

impl SharedState {
    pub fn new(config: StateConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                power_w: 0.0,
                heart_rate_bpm: 0.0,
                cadence_rpm: 0.0,
                speed_kph: 0.0,
                distance_m: 0.0,
                buttons: 0,
                steering: 0,
                raw_power: 0.0,
                raw_speed: 0.0,
                status: 0,

                mode: TrainerMode::Idle,
                load_w: 100.0,
                gradient_pct: 2.0,
                weight_kg: 77.0,
                brake_calibration_factor: 0.0,
                brake_calibration_load_raw: 650.0,
                power_scale_factor: 1.0,

                target_power_w: 100.0,
                requested_mode: RequestedMode::Ergo,
                wind_resistance_coefficient: 0.51,
                wind_speed_kph: 0.0,
                drafting_factor: 1.0,
                slope_pct: 0.0,
                crr: 0.004,
                user_weight_kg: config.user_weight_kg,
                bike_weight_kg: config.bike_weight_kg,
                wheel_circumference_mm: config.wheel_circumference_mm,
                user_config_state: UserConfigState::Empty,

                last_rx_command_id: fec_protocol::COMMAND_ID_NONE,
                sequence_number: 0xFF,
                command_status: fec_protocol::COMMAND_STATUS_UNINITIALIZED,
                pending_request: None,
            }),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a worker panicked mid-update; the record
        // only holds plain numbers, so the data is still usable for the
        // shutdown path.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -- Set-points -------------------------------------------------------

    pub fn set_mode(&self, mode: TrainerMode) {
        self.lock().mode = mode;
    }

    pub fn mode(&self) -> TrainerMode {
        self.lock().mode
    }

    /// Commit an ergo watt target, clamped to the brake's window.
    pub fn set_load(&self, load_w: f64) {
        self.lock().load_w = load_w.clamp(MIN_LOAD_WATTS, MAX_LOAD_WATTS);
    }

    pub fn load(&self) -> f64 {
        self.lock().load_w
    }

    /// Commit a slope-mode gradient, clamped to the brake's window.
    pub fn set_gradient(&self, gradient_pct: f64) {
        self.lock().gradient_pct = gradient_pct.clamp(MIN_GRADIENT_PCT, MAX_GRADIENT_PCT);
    }

    pub fn gradient(&self) -> f64 {
        self.lock().gradient_pct
    }

    /// Commit the rider+bike weight used by the brake's native slope mode,
    /// clamped to the encodable band.
    pub fn set_weight(&self, weight_kg: f64) {
        self.lock().weight_kg = weight_kg.clamp(MIN_WEIGHT_KG, MAX_WEIGHT_KG);
    }

    pub fn weight(&self) -> f64 {
        self.lock().weight_kg
    }

    pub fn set_brake_calibration_factor(&self, factor: f64) {
        self.lock().brake_calibration_factor = factor;
    }

    pub fn brake_calibration_factor(&self) -> f64 {
        self.lock().brake_calibration_factor
    }

    pub fn set_brake_calibration_load_raw(&self, raw: f64) {
        self.lock().brake_calibration_load_raw = raw;
    }

    pub fn brake_calibration_load_raw(&self) -> f64 {
        self.lock().brake_calibration_load_raw
    }

    pub fn set_power_scale_factor(&self, factor: f64) {
        self.lock().power_scale_factor = factor;
    }

    pub fn power_scale_factor(&self) -> f64 {
        self.lock().power_scale_factor
    }

    // -- Telemetry --------------------------------------------------------

    /// Publish head-unit fields. Buttons OR into the sticky accumulator so a
    /// press can't fall between two reader observations.
    pub fn publish_buttons_steering(&self, buttons: u8, steering: i16) {
        let mut inner = self.lock();
        inner.buttons |= u32::from(buttons);
        inner.steering = i32::from(steering);
    }

    /// Publish one full brake telemetry update.
    pub fn publish_brake_telemetry(&self, telemetry: &BrakeTelemetry) {
        let mut inner = self.lock();
        inner.power_w = telemetry.power_w;
        inner.heart_rate_bpm = telemetry.heart_rate_bpm;
        inner.cadence_rpm = telemetry.cadence_rpm;
        inner.speed_kph = telemetry.speed_kph;
        inner.distance_m = telemetry.distance_m;
        inner.raw_power = telemetry.raw_power;
        inner.raw_speed = telemetry.raw_speed;
    }

    /// Read telemetry and clear the sticky button accumulator.
    pub fn take_telemetry(&self) -> TelemetrySnapshot {
        let mut inner = self.lock();
        let snapshot = Self::snapshot_of(&inner);
        inner.buttons = 0;
        snapshot
    }

    /// Read telemetry without consuming button state (monitor/logging use).
    pub fn telemetry(&self) -> TelemetrySnapshot {
        Self::snapshot_of(&self.lock())
    }

    fn snapshot_of(inner: &Inner) -> TelemetrySnapshot {
        TelemetrySnapshot {
            power_w: inner.power_w,
            heart_rate_bpm: inner.heart_rate_bpm,
            cadence_rpm: inner.cadence_rpm,
            speed_kph: inner.speed_kph,
            distance_m: inner.distance_m,
            buttons: inner.buttons,
            steering: inner.steering,
            status: DeviceStatus(inner.status),
        }
    }

    pub fn raw_speed(&self) -> f64 {
        self.lock().raw_speed
    }

    // -- Lifecycle flags --------------------------------------------------

    pub fn set_running(&self) {
        self.lock().status = STATUS_RUNNING;
    }

    /// Pause telemetry collection. Returns false when not running or
    /// already paused.
    pub fn request_pause(&self) -> bool {
        let mut inner = self.lock();
        let status = DeviceStatus(inner.status);
        if !status.is_running() || status.is_paused() {
            return false;
        }
        inner.status |= STATUS_PAUSED;
        true
    }

    /// Resume after a pause. Returns false unless currently paused.
    pub fn resume(&self) -> bool {
        let mut inner = self.lock();
        let status = DeviceStatus(inner.status);
        if !(status.is_running() && status.is_paused()) {
            return false;
        }
        inner.status &= !STATUS_PAUSED;
        true
    }

    /// Ask the controller to run its close sequence and exit.
    pub fn request_stop(&self) {
        self.lock().status = 0;
    }

    /// Terminal: the controller hit an unrecoverable transport failure.
    pub fn mark_error(&self) {
        self.lock().status = STATUS_ERROR;
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus(self.lock().status)
    }

    // -- Environment (control pages) --------------------------------------

    /// Target-power (or basic-resistance) command: ergo at `watts`.
    pub fn apply_target_power(&self, watts: f64) {
        let mut inner = self.lock();
        inner.target_power_w = watts;
        inner.requested_mode = RequestedMode::Ergo;
    }

    pub fn target_power(&self) -> f64 {
        self.lock().target_power_w
    }

    pub fn requested_mode(&self) -> RequestedMode {
        self.lock().requested_mode
    }

    pub fn apply_wind_resistance(&self, coefficient: f64, wind_speed_kph: f64, drafting: f64) {
        let mut inner = self.lock();
        inner.wind_resistance_coefficient = coefficient;
        inner.wind_speed_kph = wind_speed_kph;
        inner.drafting_factor = drafting;
    }

    /// Track-resistance command: simulation at `slope_pct` / `crr`.
    pub fn apply_track_resistance(&self, slope_pct: f64, crr: f64) {
        let mut inner = self.lock();
        inner.slope_pct = slope_pct;
        inner.crr = crr;
        inner.requested_mode = RequestedMode::Slope;
    }

    pub fn apply_user_config(
        &self,
        user_weight_kg: f64,
        bike_weight_kg: f64,
        wheel_circumference_mm: f64,
    ) {
        let mut inner = self.lock();
        inner.user_weight_kg = user_weight_kg;
        inner.bike_weight_kg = bike_weight_kg;
        inner.wheel_circumference_mm = wheel_circumference_mm;
        inner.user_config_state = UserConfigState::Received;
    }

    /// Note that the broadcast stream is advertising that configuration is
    /// required. Only moves Empty→Waiting; the state never retreats.
    pub fn note_config_requested(&self) {
        let mut inner = self.lock();
        if inner.user_config_state == UserConfigState::Empty {
            inner.user_config_state = UserConfigState::Waiting;
        }
    }

    pub fn user_config_state(&self) -> UserConfigState {
        self.lock().user_config_state
    }

    pub fn wheel_circumference_mm(&self) -> f64 {
        self.lock().wheel_circumference_mm
    }

    /// Snapshot of everything the road model needs.
    pub fn ride_parameters(&self) -> RideParameters {
        let inner = self.lock();
        RideParameters {
            user_weight_kg: inner.user_weight_kg,
            bike_weight_kg: inner.bike_weight_kg,
            slope_pct: inner.slope_pct,
            crr: inner.crr,
            wind_resistance_coefficient: inner.wind_resistance_coefficient,
            wind_speed_kph: inner.wind_speed_kph,
            drafting_factor: inner.drafting_factor,
        }
    }

    pub fn slope_pct(&self) -> f64 {
        self.lock().slope_pct
    }

    // -- FE-C bookkeeping --------------------------------------------------

    /// Record the outcome of one processed control page. Id and status are
    /// published in the same critical section.
    pub fn record_command_status(&self, command_id: u8, status: CommandStatusCode) {
        let mut inner = self.lock();
        inner.last_rx_command_id = command_id;
        inner.command_status = status as u8;
    }

    /// Advance the broadcast sequence counter and return the new value.
    /// Starts at 0xFF (none), so the first broadcast carries 0.
    pub fn next_sequence_number(&self) -> u8 {
        let mut inner = self.lock();
        inner.sequence_number = inner.sequence_number.wrapping_add(1);
        inner.sequence_number
    }

    /// (last_rx_command_id, sequence_number, command_status) for page 0x47.
    pub fn command_status_fields(&self) -> (u8, u8, u8) {
        let inner = self.lock();
        (
            inner.last_rx_command_id,
            inner.sequence_number,
            inner.command_status,
        )
    }

    /// Schedule a one-shot transmission of `page_id`; last request wins.
    pub fn set_pending_request(&self, page_id: u8) {
        self.lock().pending_request = Some(page_id);
    }

    pub fn take_pending_request(&self) -> Option<u8> {
        self.lock().pending_request.take()
    }

    /// Session time in 0.25 s units, wrapping every 64 s per the profile.
    pub fn elapsed_quarter_seconds(&self) -> u8 {
        (self.started.elapsed().as_secs().wrapping_mul(4)) as u8
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_clamps_on_commit() {
        let state = SharedState::default();
        state.set_load(1200.0);
        assert_eq!(state.load(), 1000.0);
        state.set_load(10.0);
        assert_eq!(state.load(), 50.0);
        state.set_load(250.0);
        assert_eq!(state.load(), 250.0);
    }

    #[test]
    fn test_gradient_and_weight_clamp() {
        let state = SharedState::default();
        state.set_gradient(25.0);
        assert_eq!(state.gradient(), 20.0);
        state.set_gradient(-9.0);
        assert_eq!(state.gradient(), -5.0);
        state.set_weight(30.0);
        assert_eq!(state.weight(), 50.0);
        state.set_weight(500.0);
        assert_eq!(state.weight(), 120.0);
    }

    #[test]
    fn test_buttons_accumulate_until_taken() {
        let state = SharedState::default();
        state.publish_buttons_steering(0b0001, 0);
        state.publish_buttons_steering(0b0010, 0);

        let first = state.take_telemetry();
        assert_eq!(first.buttons, 0b0011);

        let second = state.take_telemetry();
        assert_eq!(second.buttons, 0);
    }

    #[test]
    fn test_peek_does_not_clear_buttons() {
        let state = SharedState::default();
        state.publish_buttons_steering(0b0100, 0);
        assert_eq!(state.telemetry().buttons, 0b0100);
        assert_eq!(state.take_telemetry().buttons, 0b0100);
    }

    #[test]
    fn test_user_config_state_is_monotonic() {
        let state = SharedState::default();
        assert_eq!(state.user_config_state(), UserConfigState::Empty);

        state.note_config_requested();
        assert_eq!(state.user_config_state(), UserConfigState::Waiting);

        state.apply_user_config(80.0, 9.0, 2105.0);
        assert_eq!(state.user_config_state(), UserConfigState::Received);

        // A later advertisement must not retreat the state.
        state.note_config_requested();
        assert_eq!(state.user_config_state(), UserConfigState::Received);
    }

    #[test]
    fn test_sequence_number_starts_at_zero() {
        let state = SharedState::default();
        assert_eq!(state.next_sequence_number(), 0);
        assert_eq!(state.next_sequence_number(), 1);
    }

    #[test]
    fn test_command_status_pair_updates_together() {
        let state = SharedState::default();
        let (id, _, status) = state.command_status_fields();
        assert_eq!(id, 0xFF);
        assert_eq!(status, 0xFF);

        state.record_command_status(0x31, CommandStatusCode::Pass);
        let (id, _, status) = state.command_status_fields();
        assert_eq!(id, 0x31);
        assert_eq!(status, 0);
    }

    #[test]
    fn test_pause_resume_stop_transitions() {
        let state = SharedState::default();
        assert!(!state.request_pause(), "cannot pause before running");

        state.set_running();
        assert!(state.request_pause());
        assert!(state.status().is_paused());
        assert!(!state.request_pause(), "already paused");

        assert!(state.resume());
        assert!(state.status().is_running());
        assert!(!state.status().is_paused());

        state.request_stop();
        assert!(!state.status().is_running());
    }

    #[test]
    fn test_track_resistance_requests_slope() {
        let state = SharedState::default();
        assert_eq!(state.requested_mode(), RequestedMode::Ergo);
        state.apply_track_resistance(2.0, 0.004);
        assert_eq!(state.requested_mode(), RequestedMode::Slope);
        let params = state.ride_parameters();
        assert_eq!(params.slope_pct, 2.0);

        state.apply_target_power(250.0);
        assert_eq!(state.requested_mode(), RequestedMode::Ergo);
    }

    #[test]
    fn test_pending_request_is_one_shot() {
        let state = SharedState::default();
        state.set_pending_request(0x36);
        state.set_pending_request(0x47);
        assert_eq!(state.take_pending_request(), Some(0x47));
        assert_eq!(state.take_pending_request(), None);
    }
}
