//! Core of the Fortius FE-C bridge: the two real-time control loops and the
//! state record they share.
//!
//! The bridge turns a Tacx Fortius trainer into an ANT+ FE-C master. Two
//! long-lived workers cooperate through one guarded state record:
//!
//! - [`controller::TrainerController`] runs the paced full-duplex USB loop
//!   against the brake, publishing telemetry and applying set-points;
//! - [`scheduler::FecMaster`] drives the ANT channel: the open sequence, the
//!   4 Hz broadcast page rotation, and inbound control-page dispatch.
//!
//! Transports are collaborators behind the [`ports`] traits; scripted
//! doubles for both live in [`testing`].

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

pub mod controller;
pub mod error;
pub mod physics;
pub mod ports;
pub mod scheduler;
pub mod state;
pub mod testing;

pub use controller::{ControllerTiming, TrainerController};
pub use error::BridgeError;
pub use physics::{RideParameters, power_required_watts};
pub use ports::{AntEvent, AntPort, PortError, TrainerPort};
pub use scheduler::{FecMaster, SchedulerTiming};
pub use state::{
    BrakeTelemetry, DeviceStatus, RequestedMode, SharedState, StateConfig, TelemetrySnapshot,
    TrainerMode, UserConfigState,
};
