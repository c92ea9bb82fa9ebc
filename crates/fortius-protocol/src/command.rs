//! Outbound control frames for the Fortius brake.
//!
//! The 12-byte control frame layout:
//!
//! | Byte | Meaning |
//! |------|---------|
//! | 0–3  | Fixed prelude `01 08 01 00` |
//! | 4–5  | Brake value, little-endian |
//! | 6    | Pedal-sensor echo (value observed on the previous read) |
//! | 7    | `0x00` |
//! | 8    | Operating state: `0x00` idle, `0x02` active, `0x03` calibration |
//! | 9    | Mode/weight: `0x0A` ergo, rider+bike kg in slope, `0x52` idle |
//! | 10–11| Calibration word, little-endian: `130·factor + 1040` |
//!
//! Idle sessions use the short 4-byte open command instead of a control
//! frame.

use crate::{MAX_WEIGHT_KG, MIN_WEIGHT_KG};
use bridge_wire::PayloadBuilder;

/// Length of the full control frame.
pub const CONTROL_FRAME_LEN: usize = 12;
/// Length of the session-open command.
pub const OPEN_COMMAND_LEN: usize = 4;

/// Fixed prelude of every 12-byte control frame.
const PRELUDE: [u8; 4] = [0x01, 0x08, 0x01, 0x00];

/// Session-open command, also sent as the keep-alive while idle.
pub const OPEN_COMMAND: [u8; 4] = [0x02, 0x00, 0x00, 0x00];

/// Operating-state values for byte 8 of the control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperatingState {
    Idle = 0x00,
    Active = 0x02,
    Calibration = 0x03,
}

/// Mode/weight byte markers.
pub const MODE_ERGO: u8 = 0x0A;
pub const MODE_IDLE: u8 = 0x52;

/// Encode the calibration word: `130 · factor + 1040`, so a factor of zero
/// yields `0x0410`.
pub fn encode_calibration(factor: f64) -> i16 {
    (130.0 * factor + 1040.0).round() as i16
}

/// Encode the slope-mode brake value: `1300 · gradient + 507`. The vendor
/// driver adds the offset to create load at zero slope.
pub fn encode_slope_brake(gradient_pct: f64) -> i16 {
    (1300.0 * gradient_pct + 507.0).round() as i16
}

/// An outbound brake command, one per controller iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrakeCommand {
    /// Keep the session alive without driving the brake.
    Open,
    /// End the session.
    Close,
    /// Constant-power mode: the brake regulates to the given raw load.
    Ergo {
        brake_raw: u16,
        pedal_echo: u8,
        calibration_factor: f64,
    },
    /// Native slope mode: the brake simulates the given gradient for the
    /// given rider+bike weight.
    Slope {
        gradient_pct: f64,
        weight_kg: f64,
        pedal_echo: u8,
        calibration_factor: f64,
    },
    /// Spin-down calibration, as captured from the vendor software.
    Calibrate,
}

impl BrakeCommand {
    /// Encode to the bytes handed to the bulk OUT endpoint.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            BrakeCommand::Open => OPEN_COMMAND.to_vec(),
            BrakeCommand::Close => control_frame(0, 0, OperatingState::Idle, MODE_IDLE, 0),
            BrakeCommand::Ergo {
                brake_raw,
                pedal_echo,
                calibration_factor,
            } => control_frame(
                brake_raw,
                pedal_echo,
                OperatingState::Active,
                MODE_ERGO,
                encode_calibration(calibration_factor),
            ),
            BrakeCommand::Slope {
                gradient_pct,
                weight_kg,
                pedal_echo,
                calibration_factor,
            } => control_frame(
                encode_slope_brake(gradient_pct) as u16,
                pedal_echo,
                OperatingState::Active,
                weight_kg.clamp(MIN_WEIGHT_KG, MAX_WEIGHT_KG) as u8,
                encode_calibration(calibration_factor),
            ),
            BrakeCommand::Calibrate => control_frame(
                0x16A3,
                0,
                OperatingState::Calibration,
                MODE_IDLE,
                0,
            ),
        }
    }
}

fn control_frame(
    brake_raw: u16,
    pedal_echo: u8,
    state: OperatingState,
    mode_weight: u8,
    calibration: i16,
) -> Vec<u8> {
    let mut builder = PayloadBuilder::with_capacity(CONTROL_FRAME_LEN);
    builder
        .write_bytes(&PRELUDE)
        .write_u16_le(brake_raw)
        .write_u8(pedal_echo)
        .write_u8(0x00)
        .write_u8(state as u8)
        .write_u8(mode_weight)
        .write_i16_le(calibration);
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::raw_load_from_watts;

    #[test]
    fn test_open_command() {
        assert_eq!(BrakeCommand::Open.encode(), vec![0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_close_frame() {
        assert_eq!(
            BrakeCommand::Close.encode(),
            vec![0x01, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00]
        );
    }

    #[test]
    fn test_calibrate_frame_matches_vendor_capture() {
        assert_eq!(
            BrakeCommand::Calibrate.encode(),
            vec![0x01, 0x08, 0x01, 0x00, 0xA3, 0x16, 0x00, 0x00, 0x03, 0x52, 0x00, 0x00]
        );
    }

    #[test]
    fn test_ergo_frame_layout() {
        let raw = raw_load_from_watts(200.0, 0.0).round() as u16;
        let frame = BrakeCommand::Ergo {
            brake_raw: raw,
            pedal_echo: 0,
            calibration_factor: 0.0,
        }
        .encode();

        assert_eq!(frame.len(), CONTROL_FRAME_LEN);
        assert_eq!(&frame[0..4], &[0x01, 0x08, 0x01, 0x00]);
        // 200 W at rest uses the 2200 raw-speed floor: 200 / 0.016744 ≈ 11945.
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 11945);
        assert_eq!(frame[8], 0x02);
        assert_eq!(frame[9], MODE_ERGO);
        // Calibration factor 0 encodes to 1040 = 0x0410.
        assert_eq!(i16::from_le_bytes([frame[10], frame[11]]), 1040);
    }

    #[test]
    fn test_slope_frame_layout() {
        let frame = BrakeCommand::Slope {
            gradient_pct: 2.0,
            weight_kg: 72.0,
            pedal_echo: 1,
            calibration_factor: 0.0,
        }
        .encode();

        // 1300·2 + 507 = 3107
        assert_eq!(i16::from_le_bytes([frame[4], frame[5]]), 3107);
        assert_eq!(frame[6], 1);
        assert_eq!(frame[8], 0x02);
        assert_eq!(frame[9], 72);
    }

    #[test]
    fn test_slope_frame_clamps_weight_byte() {
        let heavy = BrakeCommand::Slope {
            gradient_pct: 0.0,
            weight_kg: 300.0,
            pedal_echo: 0,
            calibration_factor: 0.0,
        }
        .encode();
        assert_eq!(heavy[9], MAX_WEIGHT_KG as u8);

        let light = BrakeCommand::Slope {
            gradient_pct: 0.0,
            weight_kg: 10.0,
            pedal_echo: 0,
            calibration_factor: 0.0,
        }
        .encode();
        assert_eq!(light[9], MIN_WEIGHT_KG as u8);
    }

    #[test]
    fn test_negative_gradient_encodes_signed() {
        let frame = BrakeCommand::Slope {
            gradient_pct: -5.0,
            weight_kg: 80.0,
            pedal_echo: 0,
            calibration_factor: 0.0,
        }
        .encode();
        // 1300·(-5) + 507 = -5993
        assert_eq!(i16::from_le_bytes([frame[4], frame[5]]), -5993);
    }

    #[test]
    fn test_calibration_word() {
        assert_eq!(encode_calibration(0.0), 1040);
        assert_eq!(encode_calibration(1.0), 1170);
        assert_eq!(encode_calibration(-2.0), 780);
    }
}
