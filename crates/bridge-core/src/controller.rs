//! The trainer control loop: a paced full-duplex USB conversation with the
//! Fortius brake.
//!
//! Each iteration writes one command frame built from the current set-points
//! and reads back one telemetry transfer, publishing the decoded fields into
//! the shared state. Reads are paced 240 ms apart (the brake updates slower
//! than the head unit) with a 70 ms settle between write and read.
//!
//! Lifecycle: `Stopped → Running ↔ Paused → Stopped`, with `Error` terminal
//! on an unrecoverable transport failure. A single transient I/O error
//! bounces the port (close + reopen) once; a failed reopen is fatal.

use crate::error::BridgeError;
use crate::ports::{PortError, TrainerPort};
use crate::state::{BrakeTelemetry, SharedState, TrainerMode};
use fortius_protocol::{
    BrakeCommand, CalibrationFilter, PowerFilter, READ_BUFFER_LEN, READ_DELAY_MS, TelemetryFrame,
    WRITE_DELAY_MS, brake_raw_for_watts, watts_from_raw,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Loop pacing. The defaults match the brake's update cadence; tests
/// collapse them to zero.
#[derive(Debug, Clone, Copy)]
pub struct ControllerTiming {
    /// Minimum spacing between consecutive reads.
    pub read_interval: Duration,
    /// Settle time between the command write and the following read.
    pub write_settle: Duration,
    /// Poll interval while paused.
    pub pause_poll: Duration,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_millis(READ_DELAY_MS),
            write_settle: Duration::from_millis(WRITE_DELAY_MS),
            pause_poll: Duration::from_millis(100),
        }
    }
}

impl ControllerTiming {
    /// No pacing at all, for scripted tests.
    pub fn immediate() -> Self {
        Self {
            read_interval: Duration::ZERO,
            write_settle: Duration::ZERO,
            pause_poll: Duration::ZERO,
        }
    }
}

enum StepOutcome {
    Continue,
    Stopped,
}

/// The trainer-side worker. Owns the USB port exclusively.
pub struct TrainerController<P: TrainerPort> {
    port: P,
    state: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    timing: ControllerTiming,
    pedal_echo: u8,
    power_filter: PowerFilter,
    calibration: CalibrationFilter,
    last_read: Option<Instant>,
}

impl<P: TrainerPort + 'static> TrainerController<P> {
    pub fn new(port: P, state: Arc<SharedState>, shutdown: Arc<AtomicBool>) -> Self {
        let calibration = CalibrationFilter::new(state.brake_calibration_load_raw());
        Self {
            port,
            state,
            shutdown,
            timing: ControllerTiming::default(),
            pedal_echo: 0,
            power_filter: PowerFilter::new(),
            calibration,
            last_read: None,
        }
    }

    pub fn with_timing(mut self, timing: ControllerTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Start the worker thread.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("trainer-controller".into())
            .spawn(move || {
                if let Err(err) = self.run() {
                    tracing::error!("trainer controller terminated: {err}");
                }
            })
    }

    /// Run the control loop until stop, shutdown, or an unrecoverable error.
    pub fn run(&mut self) -> Result<(), BridgeError> {
        self.state.set_running();
        if let Err(err) = self.open_session() {
            tracing::error!("cannot open the trainer port: {err}");
            self.state.mark_error();
            return Err(err.into());
        }
        tracing::info!("trainer session open");

        loop {
            match self.step()? {
                StepOutcome::Continue => {}
                StepOutcome::Stopped => return Ok(()),
            }
        }
    }

    /// One loop iteration: lifecycle checks, paced write, settle, read.
    fn step(&mut self) -> Result<StepOutcome, BridgeError> {
        let status = self.state.status();
        if self.shutdown.load(Ordering::Relaxed) || !status.is_running() {
            self.close_session();
            tracing::info!("trainer controller stopping");
            return Ok(StepOutcome::Stopped);
        }

        if status.is_paused() {
            if self.port.is_open() {
                tracing::info!("paused; releasing the trainer port");
                self.port.close();
            }
            thread::sleep(self.timing.pause_poll);
            return Ok(StepOutcome::Continue);
        }

        if !self.port.is_open() {
            // Resuming from pause.
            if let Err(err) = self.open_session() {
                tracing::error!("cannot reopen the trainer port: {err}");
                self.state.mark_error();
                return Err(err.into());
            }
            tracing::info!("trainer session reopened");
        }

        if let Some(last_read) = self.last_read {
            pace(last_read, self.timing.read_interval);
        }

        let command = self.build_command().encode();
        if let Err(err) = self.port.write(&command) {
            tracing::warn!("brake write failed ({err}); bouncing the port");
            self.bounce_port()?;
            return Ok(StepOutcome::Continue);
        }

        thread::sleep(self.timing.write_settle);

        let mut buf = [0u8; READ_BUFFER_LEN];
        match self.port.read(&mut buf) {
            Ok(len) => {
                self.last_read = Some(Instant::now());
                self.publish(&buf[..len]);
            }
            Err(err) => {
                tracing::warn!("brake read failed ({err}); bouncing the port");
                self.bounce_port()?;
            }
        }

        Ok(StepOutcome::Continue)
    }

    /// Build the command frame for the current set-points.
    fn build_command(&self) -> BrakeCommand {
        match self.state.mode() {
            TrainerMode::Idle => BrakeCommand::Open,
            TrainerMode::Ergo => BrakeCommand::Ergo {
                brake_raw: brake_raw_for_watts(self.state.load(), self.state.raw_speed()),
                pedal_echo: self.pedal_echo,
                calibration_factor: self.state.brake_calibration_factor(),
            },
            TrainerMode::Slope => BrakeCommand::Slope {
                gradient_pct: self.state.gradient(),
                weight_kg: self.state.weight(),
                pedal_echo: self.pedal_echo,
                calibration_factor: self.state.brake_calibration_factor(),
            },
            TrainerMode::Calibrate => BrakeCommand::Calibrate,
        }
    }

    /// Decode one telemetry transfer and publish it.
    fn publish(&mut self, raw: &[u8]) {
        let frame = match TelemetryFrame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("discarding telemetry: {err}");
                return;
            }
        };

        match frame {
            TelemetryFrame::Controller(head) => {
                self.state.publish_buttons_steering(head.buttons, head.steering);
            }
            TelemetryFrame::Full(full) => {
                self.state.publish_buttons_steering(full.buttons, full.steering);
                self.pedal_echo = full.pedal_sensor;

                let raw_power = f64::from(full.raw_power);
                let raw_speed = f64::from(full.raw_speed);
                let filtered = self.power_filter.update(watts_from_raw(raw_power, raw_speed));
                self.state.publish_brake_telemetry(&BrakeTelemetry {
                    power_w: filtered * self.state.power_scale_factor(),
                    heart_rate_bpm: f64::from(full.heart_rate),
                    cadence_rpm: f64::from(full.cadence),
                    speed_kph: full.speed_kph(),
                    distance_m: full.distance_m(),
                    raw_power,
                    raw_speed,
                });

                if self.state.mode() == TrainerMode::Calibrate {
                    let settled = self.calibration.update(raw_power);
                    self.state.set_brake_calibration_load_raw(settled);
                }
            }
        }
    }

    /// Open the port and start a session.
    fn open_session(&mut self) -> Result<(), PortError> {
        self.port.open()?;
        // A failed session-open write is recovered by the next iteration's
        // bounce; only the port open itself is fatal here.
        if let Err(err) = self.port.write(&BrakeCommand::Open.encode()) {
            tracing::debug!("session-open write failed: {err}");
        }
        Ok(())
    }

    /// Close + reopen after a transient I/O error. A failed reopen is
    /// terminal.
    fn bounce_port(&mut self) -> Result<(), BridgeError> {
        self.port.close();
        if let Err(err) = self.open_session() {
            tracing::error!("port reopen failed: {err}");
            self.state.mark_error();
            return Err(err.into());
        }
        Ok(())
    }

    /// Send the close frame and release the port.
    fn close_session(&mut self) {
        if self.port.is_open() {
            if let Err(err) = self.port.write(&BrakeCommand::Close.encode()) {
                tracing::debug!("close-command write failed: {err}");
            }
            self.port.close();
        }
    }
}

/// Sleep out the remainder of `interval` measured from `since`.
fn pace(since: Instant, interval: Duration) {
    let elapsed = since.elapsed();
    if elapsed < interval {
        thread::sleep(interval - elapsed);
    }
}
