//! ANT+ Fitness Equipment Control (FE-C) data page codec.
//!
//! FE-C is the ANT+ profile (device type 0x11) by which a controller — head
//! unit, phone, training app — commands a trainer. Every message is an
//! 8-byte broadcast payload whose first byte names the data page.
//!
//! This crate implements the page set a trainer *master* needs:
//!
//! - [`broadcast`]: the pages the master transmits — General FE (0x10),
//!   General Settings (0x11), Specific Trainer (0x19), FE Capabilities
//!   (0x36), Manufacturer Info (0x50), Product Info (0x51), and Command
//!   Status (0x47).
//! - [`control`]: the pages the master receives — Basic Resistance (0x30),
//!   Target Power (0x31), Wind Resistance (0x32), Track Resistance (0x33),
//!   User Configuration (0x37), and the common Request page (0x46).
//!
//! Multi-byte fields are little-endian; several fields are bit-packed and
//! are encoded field by field rather than through struct layout.

#![deny(static_mut_refs)]
#![deny(clippy::unwrap_used)]

pub mod broadcast;
pub mod control;

pub use broadcast::*;
pub use control::*;

use thiserror::Error;

/// Errors returned by FE-C page operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FecPageError {
    /// A payload led with a page id this profile does not implement.
    #[error("unsupported page id {0:#04x}")]
    UnsupportedPage(u8),

    /// A typed decoder was handed a payload for a different page.
    #[error("expected page {expected:#04x}, got {actual:#04x}")]
    WrongPage { expected: u8, actual: u8 },

    /// The Request page asked for something other than a data page.
    #[error("request command type {0} not supported (only data-page requests)")]
    UnsupportedCommandType(u8),

    #[error("payload too short: {0}")]
    Truncated(#[from] bridge_wire::WireError),
}

/// Convenience result alias for page operations.
pub type FecResult<T> = Result<T, FecPageError>;

/// Every FE-C payload is exactly eight bytes.
pub const PAYLOAD_LEN: usize = 8;

// Broadcast (TX) page ids.
pub const PAGE_GENERAL_FE: u8 = 0x10;
pub const PAGE_GENERAL_SETTINGS: u8 = 0x11;
pub const PAGE_SPECIFIC_TRAINER: u8 = 0x19;
pub const PAGE_FE_CAPABILITIES: u8 = 0x36;
pub const PAGE_COMMAND_STATUS: u8 = 0x47;
pub const PAGE_MANUFACTURER_INFO: u8 = 0x50;
pub const PAGE_PRODUCT_INFO: u8 = 0x51;

// Control (RX) page ids.
pub const PAGE_BASIC_RESISTANCE: u8 = 0x30;
pub const PAGE_TARGET_POWER: u8 = 0x31;
pub const PAGE_WIND_RESISTANCE: u8 = 0x32;
pub const PAGE_TRACK_RESISTANCE: u8 = 0x33;
pub const PAGE_USER_CONFIGURATION: u8 = 0x37;
pub const PAGE_REQUEST: u8 = 0x46;

/// ANT+ public network key.
pub const ANTPLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];

/// FE-C device type.
pub const FEC_DEVICE_TYPE: u8 = 0x11;
/// Transmission type advertised by this master.
pub const FEC_TRANSMISSION_TYPE: u8 = 0x05;
/// RF channel 57 → 2.457 GHz.
pub const FEC_RF_FREQUENCY: u8 = 57;
/// Channel period 8182/32768 s ≈ 4.06 Hz.
pub const FEC_CHANNEL_PERIOD: u16 = 8182;
/// Device number used unless configured otherwise.
pub const DEFAULT_DEVICE_NUMBER: u16 = 1147;

/// Equipment-type code for a trainer in General FE.
pub const EQUIPMENT_TYPE_TRAINER: u8 = 25;
/// FE state nibble: equipment in use.
pub const FE_STATE_IN_USE: u8 = 3;

/// Command status codes reported in page 0x47.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatusCode {
    Pass = 0,
    Failed = 1,
    NotSupported = 2,
    Rejected = 3,
    Pending = 4,
}

/// Status byte value before any control page has been received.
pub const COMMAND_STATUS_UNINITIALIZED: u8 = 0xFF;
/// Command id value before any control page has been received.
pub const COMMAND_ID_NONE: u8 = 0xFF;
