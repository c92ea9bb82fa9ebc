//! The FE-C master scheduler: channel bring-up, the 4 Hz broadcast page
//! rotation, and inbound control-page dispatch.
//!
//! Bring-up walks the standard master open sequence — network key, channel
//! assignment, id, RF frequency, period, open — advancing on the dongle's
//! response events, with a bounded retry budget that restarts from the
//! network key.
//!
//! Steady state broadcasts one page per 250 ms tick, keyed by a counter
//! modulo 66:
//!
//! - slots 64 and 65 alternate Manufacturer Info (0x50) and Product Info
//!   (0x51);
//! - otherwise, by slot mod 8: 0/1/4/5 → General FE (0x10), 2/6 → Specific
//!   Trainer (0x19), 3/7 → General Settings (0x11).
//!
//! A received Request page (0x46) replaces the next rotation slot with the
//! asked-for page, once.
//!
//! Before each broadcast the scheduler snapshots telemetry and commits the
//! required watts to the trainer: the target power in ergo sessions, or the
//! road model's output in simulation sessions. Either way the brake is
//! driven in ergo — FE-C "slope" is simulated, which keeps load delivery
//! deterministic instead of trusting the brake's native slope curve.

use crate::error::BridgeError;
use crate::physics::power_required_watts;
use crate::ports::{AntEvent, AntPort, CHANNEL_TYPE_MASTER, ant_message_id};
use crate::state::{RequestedMode, SharedState, TelemetrySnapshot, TrainerMode, UserConfigState};
use fec_protocol::{
    ANTPLUS_NETWORK_KEY, CAPABILITIES_ALL, CommandStatusCode, CommandStatusPage, ControlPage,
    FEC_CHANNEL_PERIOD, FEC_DEVICE_TYPE, FEC_RF_FREQUENCY, FeCapabilitiesPage, FecPageError,
    GeneralFePage, GeneralSettingsPage, MAX_RESISTANCE_NEWTONS, ManufacturerInfoPage,
    PAGE_COMMAND_STATUS, PAGE_FE_CAPABILITIES, PAGE_GENERAL_FE, PAGE_GENERAL_SETTINGS,
    PAGE_MANUFACTURER_INFO, PAGE_PRODUCT_INFO, PAGE_SPECIFIC_TRAINER, PAYLOAD_LEN,
    ProductInfoPage, SpecificTrainerPage, TRAINER_STATUS_USER_CONFIG_REQUIRED,
};
use fortius_protocol::BUTTON_ENTER;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Length of the broadcast rotation.
const ROTATION_SLOTS: u32 = 66;

/// Hardware revision reported in Manufacturer Info.
const HARDWARE_REVISION: u8 = 1;
/// Manufacturer id 0xFF marks a development build.
const MANUFACTURER_ID_DEVELOPMENT: u16 = 0xFF;
const MODEL_ID: u16 = 1;
const SOFTWARE_REVISION: u16 = 1;
const SERIAL_NUMBER: u32 = 0x0403_0201;

/// Scheduler pacing and retry budgets. Tests collapse the durations.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    /// Broadcast tick period (the FE-C mandated ~4 Hz).
    pub tick_period: Duration,
    /// How long to wait for each dongle response during bring-up.
    pub response_wait: Duration,
    /// Silent response waits tolerated before the attempt is abandoned.
    pub silence_limit: u32,
    /// Bring-up attempts (each restarting from the network key) before the
    /// scheduler gives up.
    pub retry_limit: u32,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(250),
            response_wait: Duration::from_millis(250),
            silence_limit: 25,
            retry_limit: 10,
        }
    }
}

impl SchedulerTiming {
    /// No pacing, for scripted tests.
    pub fn immediate() -> Self {
        Self {
            tick_period: Duration::ZERO,
            response_wait: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// The ANT-side worker. Owns the dongle exclusively.
pub struct FecMaster<A: AntPort> {
    ant: A,
    state: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    device_number: u16,
    channel: u8,
    timing: SchedulerTiming,
    slot: u32,
    product_info_next: bool,
    accumulated_power_w: u16,
    enter_held: bool,
    lap_count: u32,
}

impl<A: AntPort + 'static> FecMaster<A> {
    pub fn new(
        ant: A,
        state: Arc<SharedState>,
        shutdown: Arc<AtomicBool>,
        device_number: u16,
    ) -> Self {
        Self {
            ant,
            state,
            shutdown,
            device_number,
            channel: 0,
            timing: SchedulerTiming::default(),
            slot: 0,
            product_info_next: false,
            accumulated_power_w: 0,
            enter_held: false,
            lap_count: 0,
        }
    }

    pub fn with_timing(mut self, timing: SchedulerTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Start the worker thread.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("fec-master".into())
            .spawn(move || {
                if let Err(err) = self.run() {
                    tracing::error!("FE-C master terminated: {err}");
                }
            })
    }

    /// Bring the channel up, then broadcast until shutdown.
    pub fn run(&mut self) -> Result<(), BridgeError> {
        if let Err(err) = self.open_channel() {
            self.teardown();
            return Err(err);
        }
        tracing::info!(
            device_number = self.device_number,
            "ANT channel open; broadcasting FE-C pages at ~4 Hz"
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            let tick_started = Instant::now();
            self.drain_events();
            if let Err(err) = self.tick() {
                self.teardown();
                return Err(err);
            }
            pace(tick_started, self.timing.tick_period);
        }

        self.teardown();
        tracing::info!("FE-C master stopping");
        Ok(())
    }

    /// Drive the master open sequence, retrying from the network key on any
    /// sub-step failure, up to the retry budget.
    fn open_channel(&mut self) -> Result<(), BridgeError> {
        let mut attempts: u32 = 0;

        'attempt: loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(BridgeError::Cancelled);
            }
            if attempts >= self.timing.retry_limit {
                return Err(BridgeError::ChannelSetup { attempts });
            }
            attempts += 1;
            if attempts > 1 {
                tracing::warn!("restarting ANT channel setup (attempt {attempts})");
            }

            self.ant.set_network_key(0, &ANTPLUS_NETWORK_KEY)?;

            let mut silent_waits = 0u32;
            loop {
                if self.shutdown.load(Ordering::Relaxed) {
                    return Err(BridgeError::Cancelled);
                }
                match self.ant.recv_event_timeout(self.timing.response_wait) {
                    Some(AntEvent::Response { message_id, ok }) => {
                        if !ok {
                            tracing::warn!(
                                "dongle refused message {message_id:#04x} during setup"
                            );
                            continue 'attempt;
                        }
                        match message_id {
                            ant_message_id::NETWORK_KEY => {
                                self.ant.assign_channel(self.channel, CHANNEL_TYPE_MASTER, 0)?;
                            }
                            ant_message_id::ASSIGN_CHANNEL => {
                                self.ant.set_channel_id(
                                    self.channel,
                                    self.device_number,
                                    FEC_DEVICE_TYPE,
                                    fec_protocol::FEC_TRANSMISSION_TYPE,
                                )?;
                            }
                            ant_message_id::CHANNEL_ID => {
                                self.ant.set_rf_frequency(self.channel, FEC_RF_FREQUENCY)?;
                            }
                            ant_message_id::CHANNEL_RF_FREQUENCY => {
                                self.ant.set_channel_period(self.channel, FEC_CHANNEL_PERIOD)?;
                            }
                            ant_message_id::CHANNEL_PERIOD => {
                                self.ant.open_channel(self.channel)?;
                            }
                            ant_message_id::OPEN_CHANNEL => return Ok(()),
                            other => {
                                tracing::warn!("unexpected setup response {other:#04x}");
                                continue 'attempt;
                            }
                        }
                    }
                    Some(AntEvent::ChannelClosed) => continue 'attempt,
                    Some(AntEvent::Broadcast { .. }) => {}
                    None => {
                        silent_waits += 1;
                        if silent_waits >= self.timing.silence_limit {
                            tracing::warn!("dongle silent during channel setup");
                            continue 'attempt;
                        }
                    }
                }
            }
        }
    }

    /// Drain everything the transport's receive thread queued since the
    /// last tick.
    fn drain_events(&mut self) {
        while let Some(event) = self.ant.try_recv_event() {
            match event {
                AntEvent::Broadcast { payload } => self.handle_broadcast(&payload),
                AntEvent::Response { .. } => {}
                AntEvent::ChannelClosed => {
                    tracing::warn!("ANT channel closed by the dongle");
                }
            }
        }
    }

    /// Dispatch one inbound control page and record its command status.
    /// Id and status are committed together.
    pub fn handle_broadcast(&mut self, payload: &[u8; PAYLOAD_LEN]) {
        let (command_id, status) = match ControlPage::decode(payload) {
            Ok(page) => {
                let id = page.page_id();
                (id, self.apply_control(page))
            }
            Err(FecPageError::UnsupportedPage(id)) => {
                tracing::warn!("unsupported control page {id:#04x}");
                (id, CommandStatusCode::NotSupported)
            }
            Err(err) => {
                tracing::warn!("control page failed to decode: {err}");
                (payload[0], CommandStatusCode::Failed)
            }
        };
        self.state.record_command_status(command_id, status);
    }

    fn apply_control(&mut self, page: ControlPage) -> CommandStatusCode {
        match page {
            ControlPage::BasicResistance(resistance) => {
                let watts = resistance.target_load_watts();
                tracing::info!(
                    "basic resistance {:.1} % -> {watts:.0} W",
                    resistance.resistance_pct()
                );
                self.state.apply_target_power(watts);
                CommandStatusCode::Pass
            }
            ControlPage::TargetPower(target) => {
                let watts = target.target_power_watts();
                tracing::info!("target power {watts:.2} W");
                self.state.apply_target_power(watts);
                CommandStatusCode::Pass
            }
            ControlPage::WindResistance(wind) => {
                tracing::info!(
                    "wind: coef {:.2} kg/m, speed {:.0} km/h, drafting {:.2}",
                    wind.wind_resistance_coefficient,
                    wind.wind_speed_kph,
                    wind.drafting_factor
                );
                self.state.apply_wind_resistance(
                    wind.wind_resistance_coefficient,
                    wind.wind_speed_kph,
                    wind.drafting_factor,
                );
                CommandStatusCode::Pass
            }
            ControlPage::TrackResistance(track) => {
                tracing::info!("track: slope {:.2} %, crr {:.4}", track.slope_pct, track.crr);
                self.state.apply_track_resistance(track.slope_pct, track.crr);
                CommandStatusCode::Pass
            }
            ControlPage::UserConfiguration(config) => {
                if !config.is_plausible() {
                    tracing::warn!(
                        "rejecting user config: rider {:.2} kg, bike {:.2} kg",
                        config.user_weight_kg,
                        config.bike_weight_kg
                    );
                    return CommandStatusCode::Rejected;
                }
                tracing::info!(
                    "user config: rider {:.2} kg, bike {:.2} kg, wheel {:.0} mm",
                    config.user_weight_kg,
                    config.bike_weight_kg,
                    config.wheel_circumference_mm
                );
                self.state.apply_user_config(
                    config.user_weight_kg,
                    config.bike_weight_kg,
                    config.wheel_circumference_mm,
                );
                CommandStatusCode::Pass
            }
            ControlPage::Request(request) => {
                tracing::debug!(
                    "page {:#04x} requested for one-shot transmission",
                    request.requested_page_number
                );
                self.state.set_pending_request(request.requested_page_number);
                CommandStatusCode::Pass
            }
        }
    }

    /// One broadcast slot: snapshot, commit the watt target, transmit.
    pub fn tick(&mut self) -> Result<(), BridgeError> {
        let telemetry = self.state.take_telemetry();
        self.detect_lap(telemetry.buttons);

        let required_watts = match self.state.requested_mode() {
            RequestedMode::Ergo => self.state.target_power(),
            RequestedMode::Slope => {
                power_required_watts(telemetry.speed_kph, &self.state.ride_parameters())
            }
        };
        // Simulation converts to an ergo set-point; the brake's native slope
        // mode is bypassed. set_load clamps to the brake's window.
        self.state.set_mode(TrainerMode::Ergo);
        self.state.set_load(required_watts);

        let sequence = self.state.next_sequence_number();
        let payload = self.next_payload(sequence, &telemetry);
        self.ant.send_broadcast(self.channel, &payload)?;
        self.slot = (self.slot + 1) % ROTATION_SLOTS;
        Ok(())
    }

    /// Pick the payload for this slot: a pending one-shot request wins,
    /// otherwise the rotation.
    fn next_payload(&mut self, sequence: u8, telemetry: &TelemetrySnapshot) -> [u8; PAYLOAD_LEN] {
        if let Some(page_id) = self.state.take_pending_request() {
            if let Some(payload) = self.encode_page(page_id, sequence, telemetry) {
                return payload;
            }
            tracing::warn!("requested page {page_id:#04x} is not served; resuming rotation");
        }

        if self.slot == 64 || self.slot == 65 {
            let payload = if self.product_info_next {
                self.product_info().encode()
            } else {
                self.manufacturer_info().encode()
            };
            self.product_info_next = !self.product_info_next;
            return payload;
        }

        match self.slot % 8 {
            0 | 1 | 4 | 5 => self.general_fe(telemetry).encode(),
            2 | 6 => self.specific_trainer(sequence, telemetry).encode(),
            _ => self.general_settings().encode(),
        }
    }

    fn encode_page(
        &mut self,
        page_id: u8,
        sequence: u8,
        telemetry: &TelemetrySnapshot,
    ) -> Option<[u8; PAYLOAD_LEN]> {
        match page_id {
            PAGE_GENERAL_FE => Some(self.general_fe(telemetry).encode()),
            PAGE_GENERAL_SETTINGS => Some(self.general_settings().encode()),
            PAGE_SPECIFIC_TRAINER => Some(self.specific_trainer(sequence, telemetry).encode()),
            PAGE_FE_CAPABILITIES => Some(self.fe_capabilities().encode()),
            PAGE_MANUFACTURER_INFO => Some(self.manufacturer_info().encode()),
            PAGE_PRODUCT_INFO => Some(self.product_info().encode()),
            PAGE_COMMAND_STATUS => Some(self.command_status().encode()),
            _ => None,
        }
    }

    fn general_fe(&self, telemetry: &TelemetrySnapshot) -> GeneralFePage {
        GeneralFePage {
            elapsed_quarter_seconds: self.state.elapsed_quarter_seconds(),
            // The odometer is a float in meters; the page carries a u8 that
            // rolls over every 256 m.
            distance_m: (telemetry.distance_m.max(0.0) as u64 % 256) as u8,
            speed_mm_s: (telemetry.speed_kph / 3.6 * 1000.0)
                .round()
                .clamp(0.0, f64::from(u16::MAX)) as u16,
            heart_rate_bpm: telemetry.heart_rate_bpm.round().clamp(0.0, 255.0) as u8,
        }
    }

    fn general_settings(&self) -> GeneralSettingsPage {
        GeneralSettingsPage {
            cycle_length_cm: (self.state.wheel_circumference_mm() / 10.0)
                .round()
                .clamp(0.0, 255.0) as u8,
            incline_hundredths_pct: (self.state.slope_pct() * 100.0)
                .round()
                .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16,
            // Load as a percentage of the 1000 W ceiling, in 0.5 % units.
            resistance_half_pct: (self.state.load() / 5.0).round().clamp(0.0, 200.0) as u8,
        }
    }

    fn specific_trainer(
        &mut self,
        sequence: u8,
        telemetry: &TelemetrySnapshot,
    ) -> SpecificTrainerPage {
        let instantaneous = telemetry.power_w.round().clamp(0.0, 4095.0) as u16;
        self.accumulated_power_w = self.accumulated_power_w.wrapping_add(instantaneous);

        let trainer_status = if self.state.user_config_state() == UserConfigState::Received {
            0
        } else {
            self.state.note_config_requested();
            TRAINER_STATUS_USER_CONFIG_REQUIRED
        };

        SpecificTrainerPage {
            update_event_count: sequence,
            cadence_rpm: telemetry.cadence_rpm.round().clamp(0.0, 254.0) as u8,
            accumulated_power_w: self.accumulated_power_w,
            instantaneous_power_w: instantaneous,
            trainer_status,
            flags: 0,
        }
    }

    fn fe_capabilities(&self) -> FeCapabilitiesPage {
        FeCapabilitiesPage {
            max_resistance_n: MAX_RESISTANCE_NEWTONS,
            capabilities: CAPABILITIES_ALL,
        }
    }

    fn manufacturer_info(&self) -> ManufacturerInfoPage {
        ManufacturerInfoPage {
            hardware_revision: HARDWARE_REVISION,
            manufacturer_id: MANUFACTURER_ID_DEVELOPMENT,
            model_id: MODEL_ID,
        }
    }

    fn product_info(&self) -> ProductInfoPage {
        ProductInfoPage {
            software_revision: SOFTWARE_REVISION,
            serial_number: SERIAL_NUMBER,
        }
    }

    fn command_status(&self) -> CommandStatusPage {
        let (last_rx_command_id, sequence_number, status) = self.state.command_status_fields();
        CommandStatusPage {
            last_rx_command_id,
            sequence_number,
            status,
        }
    }

    /// The Enter button doubles as a lap key: count full press-release
    /// cycles.
    fn detect_lap(&mut self, buttons: u32) {
        if buttons & BUTTON_ENTER != 0 {
            self.enter_held = true;
        } else if self.enter_held {
            self.enter_held = false;
            self.lap_count += 1;
            tracing::debug!("lap {} marked", self.lap_count);
        }
    }

    fn teardown(&mut self) {
        if let Err(err) = self.ant.close_channel(self.channel) {
            tracing::debug!("close channel failed: {err}");
        }
        if let Err(err) = self.ant.unassign_channel(self.channel) {
            tracing::debug!("unassign channel failed: {err}");
        }
    }
}

fn pace(since: Instant, interval: Duration) {
    let elapsed = since.elapsed();
    if elapsed < interval {
        thread::sleep(interval - elapsed);
    }
}
