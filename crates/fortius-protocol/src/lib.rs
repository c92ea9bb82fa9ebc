//! USB wire protocol for the Tacx Fortius indoor cycling trainer.
//!
//! The Fortius head unit speaks a small proprietary bulk protocol:
//!
//! - a 4-byte *open* command that starts a session;
//! - a 12-byte *control* frame carrying the brake set-point, the pedal-sensor
//!   echo, the operating state, and a calibration word;
//! - telemetry frames of either 24 bytes (head unit only: buttons and
//!   steering) or 48 bytes (full brake telemetry: heart rate, odometer,
//!   speed, raw power, cadence, pedal sensor).
//!
//! The brake's native load unit is a dimensionless 16-bit "raw" number whose
//! relationship to mechanical watts depends on roller speed. [`power`] holds
//! the linear model used to translate in both directions, plus the smoothing
//! filters applied before telemetry is published.
//!
//! Byte layouts were captured from the vendor driver's USB traffic; all
//! multi-byte fields are little-endian.

#![deny(static_mut_refs)]
#![deny(clippy::unwrap_used)]

pub mod command;
pub mod power;
pub mod telemetry;

pub use command::*;
pub use power::*;
pub use telemetry::*;

use thiserror::Error;

/// Errors returned by Fortius protocol operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FortiusProtocolError {
    /// Telemetry arrived with a length other than 24 or 48 bytes.
    #[error("unexpected telemetry frame length: {0} bytes")]
    UnexpectedFrameLength(usize),

    #[error("frame field out of bounds: {0}")]
    Malformed(#[from] bridge_wire::WireError),
}

/// Convenience result alias for Fortius protocol operations.
pub type FortiusResult<T> = Result<T, FortiusProtocolError>;

/// Tacx USB Vendor ID.
pub const VENDOR_ID: u16 = 0x3561;
/// Product ID for the Fortius head unit (white unit).
pub const PRODUCT_ID_FORTIUS: u16 = 0x1942;
/// Product ID for the older solid-blue head unit.
pub const PRODUCT_ID_SOLID_BLUE: u16 = 0x1902;
/// Product ID reported by a head unit whose firmware has not been loaded.
pub const PRODUCT_ID_UNINITIALISED: u16 = 0xE6BE;

/// Minimum pause between consecutive telemetry reads, in milliseconds.
/// The brake updates slower than the head unit; reading faster than this
/// mostly yields 24-byte controller-only frames.
pub const READ_DELAY_MS: u64 = 240;
/// Minimum pause between a control write and the following read, in
/// milliseconds.
pub const WRITE_DELAY_MS: u64 = 70;
/// Fixed bulk transfer timeout, in milliseconds.
pub const USB_TIMEOUT_MS: u64 = 500;

/// Size of the read buffer handed to the bulk IN endpoint.
pub const READ_BUFFER_LEN: usize = 64;

/// Head-unit button bits as reported in telemetry.
pub const BUTTON_ENTER: u32 = 0x01;
pub const BUTTON_MINUS: u32 = 0x02;
pub const BUTTON_PLUS: u32 = 0x04;
pub const BUTTON_CANCEL: u32 = 0x08;

/// Distance covered per odometer count. The odometer increments twice per
/// roller revolution.
pub const HALF_ROLLER_CIRCUMFERENCE_M: f64 = 0.06264880952;

/// Load range the brake can regulate in ergo mode, in watts.
pub const MIN_LOAD_WATTS: f64 = 50.0;
pub const MAX_LOAD_WATTS: f64 = 1000.0;

/// Gradient range accepted in slope mode, in percent.
pub const MIN_GRADIENT_PCT: f64 = -5.0;
pub const MAX_GRADIENT_PCT: f64 = 20.0;

/// Rider+bike weight range encodable in the slope-mode frame, in kg. The
/// weight byte doubles as the mode marker in ergo (0x0A) and idle (0x52)
/// frames; the operating-state byte disambiguates.
pub const MIN_WEIGHT_KG: f64 = 50.0;
pub const MAX_WEIGHT_KG: f64 = 120.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_constants() {
        assert_eq!(VENDOR_ID, 0x3561);
        assert_eq!(PRODUCT_ID_FORTIUS, 0x1942);
    }

    #[test]
    fn test_weight_range_clears_ergo_marker() {
        // 0x0A flags ergo in the mode/weight byte; a legal slope weight can
        // never encode to it.
        assert!(MIN_WEIGHT_KG as u8 > 0x0A);
    }

    #[test]
    fn test_pacing_constants() {
        assert_eq!(READ_DELAY_MS, 240);
        assert_eq!(WRITE_DELAY_MS, 70);
        assert_eq!(USB_TIMEOUT_MS, 500);
    }
}
