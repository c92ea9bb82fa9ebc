//! fortiusd — Tacx Fortius to ANT+ FE-C bridge daemon.
//!
//! Opens the Fortius head unit and an ANT+ stick, then runs the two workers
//! until SIGINT or an unrecoverable trainer error: the trainer controller
//! (USB control loop) and the FE-C master (ANT broadcast scheduler). The
//! main thread just watches telemetry once a second.
//!
//! The first SIGINT shuts down gracefully — the trainer gets its close
//! command, the ANT channel is closed and unassigned. A second SIGINT exits
//! immediately.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]

mod ant;
mod usb;

use anyhow::{Context as _, Result, bail};
use bridge_core::{FecMaster, SharedState, StateConfig, TrainerController, TrainerMode};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fortiusd", version)]
#[command(about = "Bridge a Tacx Fortius trainer onto ANT+ FE-C")]
struct Cli {
    /// Rider weight in kg, used until user configuration arrives over the
    /// air
    #[arg(long, default_value_t = 75.0, env = "FORTIUSD_USER_WEIGHT_KG")]
    user_weight_kg: f64,

    /// Bike weight in kg
    #[arg(long, default_value_t = 10.0, env = "FORTIUSD_BIKE_WEIGHT_KG")]
    bike_weight_kg: f64,

    /// Wheel circumference in mm
    #[arg(long, default_value_t = 2105.0, env = "FORTIUSD_WHEEL_CIRCUMFERENCE_MM")]
    wheel_circumference_mm: f64,

    /// ANT device number to present on the channel
    #[arg(long, default_value_t = fec_protocol::DEFAULT_DEVICE_NUMBER)]
    device_number: u16,

    /// Scale reported power to match a hub or crank power meter
    #[arg(long, default_value_t = 1.0)]
    power_scale: f64,

    /// Brake calibration factor applied to every control frame
    #[arg(long, default_value_t = 0.0)]
    brake_calibration_factor: f64,

    /// Pidfile location
    #[arg(long, default_value = "/var/run/fortiusd.pid")]
    pidfile: PathBuf,

    /// Skip pidfile creation (development runs)
    #[arg(long)]
    no_pidfile: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Pidfile that removes itself on drop.
struct Pidfile(PathBuf);

impl Pidfile {
    fn create(path: &Path) -> Result<Self> {
        fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("creating pidfile {} (run as root?)", path.display()))?;
        Ok(Self(path.to_path_buf()))
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::info!("fortiusd v{} starting", env!("CARGO_PKG_VERSION"));

    let _pidfile = if cli.no_pidfile {
        None
    } else {
        Some(Pidfile::create(&cli.pidfile)?)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if shutdown_for_signal.swap(true, Ordering::SeqCst) {
            eprintln!("second interrupt, exiting now");
            std::process::exit(130);
        }
    })
    .context("installing the SIGINT handler")?;

    let state = Arc::new(SharedState::new(StateConfig {
        user_weight_kg: cli.user_weight_kg,
        bike_weight_kg: cli.bike_weight_kg,
        wheel_circumference_mm: cli.wheel_circumference_mm,
    }));
    // Idle at a gentle ergo load until a controller takes over.
    state.set_mode(TrainerMode::Ergo);
    state.set_load(50.0);
    state.set_power_scale_factor(cli.power_scale);
    state.set_brake_calibration_factor(cli.brake_calibration_factor);

    let trainer_port = usb::FortiusUsbPort::new().context("initializing libusb")?;
    let dongle = ant::AntUsbDongle::open().context("opening the ANT+ stick")?;
    tracing::info!("transports ready");

    let controller = TrainerController::new(trainer_port, Arc::clone(&state), Arc::clone(&shutdown))
        .spawn()
        .context("spawning the trainer controller")?;
    let master = FecMaster::new(
        dongle,
        Arc::clone(&state),
        Arc::clone(&shutdown),
        cli.device_number,
    )
    .spawn()
    .context("spawning the FE-C master")?;

    // Monitor loop: a 1 Hz heartbeat of what the brake is doing.
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        let telemetry = state.telemetry();
        if telemetry.status.is_error() {
            tracing::error!("trainer controller reported an error; shutting down");
            shutdown.store(true, Ordering::Relaxed);
            break;
        }
        tracing::info!(
            "power {:6.1} W  cadence {:5.1} rpm  speed {:5.1} km/h  distance {:7.1} m  hr {:5.1}",
            telemetry.power_w,
            telemetry.cadence_rpm,
            telemetry.speed_kph,
            telemetry.distance_m,
            telemetry.heart_rate_bpm,
        );
    }

    tracing::info!("stopping workers");
    state.request_stop();
    shutdown.store(true, Ordering::Relaxed);
    if controller.join().is_err() {
        tracing::error!("trainer controller panicked");
    }
    if master.join().is_err() {
        tracing::error!("FE-C master panicked");
    }

    if state.status().is_error() {
        bail!("trainer terminated with an error");
    }
    tracing::info!("goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["fortiusd"]);
        assert_eq!(cli.device_number, 1147);
        assert_eq!(cli.user_weight_kg, 75.0);
        assert!(!cli.no_pidfile);
    }
}
