//! Inbound telemetry frames.
//!
//! A bulk read returns one of two frame shapes:
//!
//! - 24 bytes: the head unit alone responded. Only buttons (offset 13) and
//!   steering (16-bit LE at 18) are meaningful.
//! - 48 bytes: full brake telemetry. Heart rate at 12, buttons at 13,
//!   steering at 18–19, odometer (32-bit LE double-revolution count) at
//!   28–31, raw speed (16-bit LE) at 32, raw power (signed 16-bit LE) at 38,
//!   cadence at 44, pedal sensor at 46.
//!
//! Any other length is a protocol error; callers log it and carry on.

use crate::{FortiusProtocolError, FortiusResult, HALF_ROLLER_CIRCUMFERENCE_M};
use bridge_wire::{i16_le_at, u16_le_at, u32_le_at, u8_at};

/// Length of a head-unit-only frame.
pub const CONTROLLER_FRAME_LEN: usize = 24;
/// Length of a full telemetry frame.
pub const FULL_FRAME_LEN: usize = 48;

/// Telemetry carried by every frame shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerFrame {
    pub buttons: u8,
    pub steering: i16,
}

/// Full brake telemetry, present only in 48-byte frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullFrame {
    pub heart_rate: u8,
    pub buttons: u8,
    pub steering: i16,
    /// Odometer: the roller counts two ticks per revolution.
    pub double_revolutions: u32,
    pub raw_speed: u16,
    /// Signed: the brake reads negative while coasting.
    pub raw_power: i16,
    pub cadence: u8,
    /// `0x01` while the rider is pedalling; echoed back in the next command.
    pub pedal_sensor: u8,
}

impl FullFrame {
    /// Odometer distance in meters.
    pub fn distance_m(&self) -> f64 {
        f64::from(self.double_revolutions) * HALF_ROLLER_CIRCUMFERENCE_M
    }

    /// Roller speed in km/h: `1.3 · raw_speed / (3.6 · 100)`.
    pub fn speed_kph(&self) -> f64 {
        1.3 * f64::from(self.raw_speed) / (3.6 * 100.0)
    }
}

/// One decoded telemetry read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryFrame {
    Controller(ControllerFrame),
    Full(FullFrame),
}

impl TelemetryFrame {
    /// Decode a bulk-IN transfer of `len` bytes.
    pub fn decode(buf: &[u8]) -> FortiusResult<Self> {
        match buf.len() {
            CONTROLLER_FRAME_LEN => Ok(TelemetryFrame::Controller(ControllerFrame {
                buttons: u8_at(buf, 13)?,
                steering: i16_le_at(buf, 18)?,
            })),
            FULL_FRAME_LEN => Ok(TelemetryFrame::Full(FullFrame {
                heart_rate: u8_at(buf, 12)?,
                buttons: u8_at(buf, 13)?,
                steering: i16_le_at(buf, 18)?,
                double_revolutions: u32_le_at(buf, 28)?,
                raw_speed: u16_le_at(buf, 32)?,
                raw_power: i16_le_at(buf, 38)?,
                cadence: u8_at(buf, 44)?,
                pedal_sensor: u8_at(buf, 46)?,
            })),
            other => Err(FortiusProtocolError::UnexpectedFrameLength(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_frame_bytes() -> [u8; FULL_FRAME_LEN] {
        let mut buf = [0u8; FULL_FRAME_LEN];
        buf[12] = 142; // heart rate
        buf[13] = 0x05; // enter + plus
        buf[18..20].copy_from_slice(&(-120i16).to_le_bytes());
        buf[28..32].copy_from_slice(&10_000u32.to_le_bytes());
        buf[32..34].copy_from_slice(&8308u16.to_le_bytes()); // ~30 km/h
        buf[38..40].copy_from_slice(&4000i16.to_le_bytes());
        buf[44] = 92; // cadence
        buf[46] = 0x01; // pedalling
        buf
    }

    #[test]
    fn test_decode_full_frame() {
        let frame = TelemetryFrame::decode(&full_frame_bytes()).expect("valid frame");
        let TelemetryFrame::Full(full) = frame else {
            panic!("expected full frame");
        };

        assert_eq!(full.heart_rate, 142);
        assert_eq!(full.buttons, 0x05);
        assert_eq!(full.steering, -120);
        assert_eq!(full.double_revolutions, 10_000);
        assert_eq!(full.raw_speed, 8308);
        assert_eq!(full.raw_power, 4000);
        assert_eq!(full.cadence, 92);
        assert_eq!(full.pedal_sensor, 1);
    }

    #[test]
    fn test_decode_controller_frame() {
        let mut buf = [0u8; CONTROLLER_FRAME_LEN];
        buf[13] = 0x08;
        buf[18..20].copy_from_slice(&300i16.to_le_bytes());

        let frame = TelemetryFrame::decode(&buf).expect("valid frame");
        let TelemetryFrame::Controller(controller) = frame else {
            panic!("expected controller frame");
        };
        assert_eq!(controller.buttons, 0x08);
        assert_eq!(controller.steering, 300);
    }

    #[test]
    fn test_decode_rejects_other_lengths() {
        for len in [0usize, 1, 12, 23, 25, 47, 49, 64] {
            let buf = vec![0u8; len];
            assert_eq!(
                TelemetryFrame::decode(&buf),
                Err(FortiusProtocolError::UnexpectedFrameLength(len)),
                "length {len} must be rejected"
            );
        }
    }

    #[test]
    fn test_distance_uses_half_roller_circumference() {
        let mut buf = full_frame_bytes();
        buf[28..32].copy_from_slice(&1u32.to_le_bytes());
        let TelemetryFrame::Full(full) = TelemetryFrame::decode(&buf).expect("valid") else {
            panic!("expected full frame");
        };
        assert!((full.distance_m() - HALF_ROLLER_CIRCUMFERENCE_M).abs() < 1e-12);
    }

    #[test]
    fn test_speed_scaling() {
        let mut buf = full_frame_bytes();
        buf[32..34].copy_from_slice(&8308u16.to_le_bytes());
        let TelemetryFrame::Full(full) = TelemetryFrame::decode(&buf).expect("valid") else {
            panic!("expected full frame");
        };
        assert!((full.speed_kph() - 29.99).abs() < 0.01);
    }
}
