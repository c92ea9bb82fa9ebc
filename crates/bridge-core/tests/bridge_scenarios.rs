//! End-to-end scenarios driving both workers against scripted transports.
//!
//! These exercise the full path a head unit sees: a control page arrives
//! over the air, the scheduler translates it into a trainer set-point, the
//! controller encodes it onto the USB wire, and the telemetry it reads
//! flows back out as broadcast pages.

use bridge_core::testing::{MockAntPort, ScriptedTrainerPort, full_telemetry_frame};
use bridge_core::{
    AntEvent, ControllerTiming, FecMaster, SchedulerTiming, SharedState, StateConfig,
    TrainerController, TrainerMode,
};
use fortius_protocol::{brake_raw_for_watts, watts_from_raw};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Target-power path: an RX Target Power page becomes an ergo brake frame
/// on the USB wire, and the telemetry round-trips into a Specific Trainer
/// broadcast.
#[test]
fn test_target_power_reaches_the_brake() {
    let state = Arc::new(SharedState::new(StateConfig::default()));
    let shutdown = Arc::new(AtomicBool::new(false));

    // Script plenty of identical brake frames: 250 W-ish raw readings at a
    // steady roller speed.
    let mut trainer_port = ScriptedTrainerPort::new();
    let raw_speed = 8308u16;
    for _ in 0..400 {
        trainer_port.push_read(full_telemetry_frame(130, 0, 0, 5000, raw_speed, 4000, 90, 1));
    }
    let trainer_log = trainer_port.log_handle();

    let (ant_port, events) = MockAntPort::with_injector();
    let ant_commands = ant_port.commands_handle();

    let controller = TrainerController::new(
        trainer_port,
        Arc::clone(&state),
        Arc::clone(&shutdown),
    )
    .with_timing(ControllerTiming {
        read_interval: Duration::from_millis(2),
        write_settle: Duration::ZERO,
        pause_poll: Duration::from_millis(2),
    });
    let scheduler = FecMaster::new(
        ant_port,
        Arc::clone(&state),
        Arc::clone(&shutdown),
        fec_protocol::DEFAULT_DEVICE_NUMBER,
    )
    .with_timing(SchedulerTiming {
        tick_period: Duration::from_millis(2),
        response_wait: Duration::from_millis(2),
        ..SchedulerTiming::default()
    });

    let controller_handle = controller.spawn().expect("controller thread");
    let scheduler_handle = scheduler.spawn().expect("scheduler thread");

    // RX Target Power: 1000 quarter-watts = 250 W.
    let mut page = [0x31u8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0];
    page[6..8].copy_from_slice(&1000u16.to_le_bytes());
    events
        .send(AntEvent::Broadcast { payload: page })
        .expect("inject control page");

    assert!(
        wait_until(2000, || state.load() == 250.0 && state.mode() == TrainerMode::Ergo),
        "scheduler never committed the 250 W ergo set-point"
    );

    // The controller must encode that set-point at the current raw speed.
    let expected_raw = brake_raw_for_watts(250.0, f64::from(raw_speed));
    assert!(
        wait_until(2000, || {
            trainer_log
                .lock()
                .expect("log")
                .writes
                .iter()
                .rev()
                .any(|frame| {
                    frame.len() == 12
                        && u16::from_le_bytes([frame[4], frame[5]]) == expected_raw
                })
        }),
        "no ergo frame carrying the target raw load was written"
    );

    // Telemetry flows back out as a Specific Trainer page once the EMA has
    // converged on the steady-state reading.
    let steady_watts = watts_from_raw(4000.0, f64::from(raw_speed)).round() as u16;
    assert!(
        wait_until(2000, || {
            ant_commands
                .lock()
                .expect("commands")
                .iter()
                .any(|command| match command {
                    bridge_core::testing::AntCommand::Broadcast { payload, .. } => {
                        payload[0] == 0x19
                            && (u16::from_le_bytes([payload[5], payload[6]]) & 0x0FFF)
                                .abs_diff(steady_watts)
                                <= 1
                    }
                    _ => false,
                })
        }),
        "no trainer page carried the steady-state power"
    );

    shutdown.store(true, Ordering::Relaxed);
    state.request_stop();
    controller_handle.join().expect("controller join");
    scheduler_handle.join().expect("scheduler join");
}

/// Slope path: track resistance plus user configuration turn the road model
/// into an ergo commit.
#[test]
fn test_slope_session_commits_modeled_watts() {
    let state = Arc::new(SharedState::new(StateConfig::default()));
    let shutdown = Arc::new(AtomicBool::new(false));

    let (ant_port, _events) = MockAntPort::with_injector();
    let mut master = FecMaster::new(
        ant_port,
        Arc::clone(&state),
        Arc::clone(&shutdown),
        fec_protocol::DEFAULT_DEVICE_NUMBER,
    )
    .with_timing(SchedulerTiming::immediate());

    // User config: 75 kg rider, 10 kg bike, 700 mm wheel (circ ≈ 2199 mm).
    let mut config = [0x37u8, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
    config[1..3].copy_from_slice(&7500u16.to_le_bytes());
    master.handle_broadcast(&config);

    // Rolling at 30 km/h.
    state.publish_brake_telemetry(&bridge_core::BrakeTelemetry {
        power_w: 200.0,
        heart_rate_bpm: 0.0,
        cadence_rpm: 90.0,
        speed_kph: 30.0,
        distance_m: 0.0,
        raw_power: 3000.0,
        raw_speed: 8308.0,
    });

    // Track resistance: slope 2 %, crr 0.004.
    let mut track = [0x33u8, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 80];
    track[5..7].copy_from_slice(&20200u16.to_le_bytes());
    master.handle_broadcast(&track);

    master.tick().expect("tick");

    let expected = bridge_core::power_required_watts(30.0, &state.ride_parameters());
    assert_eq!(state.mode(), TrainerMode::Ergo);
    assert!((state.load() - expected).abs() < 1e-9);
    assert!(expected > 250.0 && expected < 380.0, "got {expected}");
}

/// A descent would ask for negative watts; the commit clamps to the brake's
/// 50 W floor.
#[test]
fn test_descent_clamps_to_minimum_load() {
    let state = Arc::new(SharedState::new(StateConfig::default()));
    let shutdown = Arc::new(AtomicBool::new(false));

    let (ant_port, _events) = MockAntPort::with_injector();
    let mut master = FecMaster::new(
        ant_port,
        Arc::clone(&state),
        Arc::clone(&shutdown),
        fec_protocol::DEFAULT_DEVICE_NUMBER,
    )
    .with_timing(SchedulerTiming::immediate());

    state.publish_brake_telemetry(&bridge_core::BrakeTelemetry {
        power_w: 100.0,
        heart_rate_bpm: 0.0,
        cadence_rpm: 80.0,
        speed_kph: 45.0,
        distance_m: 0.0,
        raw_power: 0.0,
        raw_speed: 12000.0,
    });

    // −5 % slope (raw 19500).
    let mut track = [0x33u8, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 80];
    track[5..7].copy_from_slice(&19500u16.to_le_bytes());
    master.handle_broadcast(&track);

    master.tick().expect("tick");
    assert_eq!(state.load(), 50.0);
}
