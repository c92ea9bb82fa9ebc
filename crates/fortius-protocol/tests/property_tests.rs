//! Property-based tests for the Fortius protocol.
//!
//! Uses proptest with 500 cases to verify the power-curve inverse, command
//! frame invariants, and telemetry decode totality.

use fortius_protocol::{
    BrakeCommand, CONTROL_FRAME_LEN, CONTROLLER_FRAME_LEN, FULL_FRAME_LEN, FortiusProtocolError,
    MAX_WEIGHT_KG, MIN_WEIGHT_KG, TelemetryFrame, power_curve_slope, raw_load_from_watts,
    watts_from_raw,
};
use proptest::prelude::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(500))]

    // -- Power curve ----------------------------------------------------------

    /// watts → raw → watts must be an identity to within 1e-6 relative error
    /// for every representable raw speed, including rest.
    #[test]
    fn prop_power_curve_inverse(raw_speed in 0u16..=u16::MAX, watts in 0.0f64..4000.0) {
        let raw_speed = f64::from(raw_speed);
        let back = watts_from_raw(raw_load_from_watts(watts, raw_speed), raw_speed);
        prop_assert!(
            (back - watts).abs() < 1e-6 * watts.max(1.0),
            "raw_speed={} watts={} back={}", raw_speed, watts, back
        );
    }

    /// The curve slope is strictly positive everywhere, so the inverse can
    /// never divide by zero.
    #[test]
    fn prop_curve_slope_positive(raw_speed in 0u16..=u16::MAX) {
        prop_assert!(power_curve_slope(f64::from(raw_speed)) > 0.0);
    }

    // -- Command frames -------------------------------------------------------

    /// Every ergo frame is 12 bytes with the fixed prelude and ergo markers.
    #[test]
    fn prop_ergo_frame_shape(brake_raw: u16, pedal: u8, factor in -4.0f64..4.0) {
        let frame = BrakeCommand::Ergo {
            brake_raw,
            pedal_echo: pedal,
            calibration_factor: factor,
        }
        .encode();

        prop_assert_eq!(frame.len(), CONTROL_FRAME_LEN);
        prop_assert_eq!(&frame[0..4], &[0x01, 0x08, 0x01, 0x00][..]);
        prop_assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), brake_raw);
        prop_assert_eq!(frame[6], pedal);
        prop_assert_eq!(frame[8], 0x02);
        prop_assert_eq!(frame[9], 0x0A);
    }

    /// The slope-mode weight byte always lands inside the encodable band, no
    /// matter how absurd the requested weight.
    #[test]
    fn prop_slope_weight_clamped(weight in -500.0f64..500.0) {
        let frame = BrakeCommand::Slope {
            gradient_pct: 0.0,
            weight_kg: weight,
            pedal_echo: 0,
            calibration_factor: 0.0,
        }
        .encode();
        prop_assert!(frame[9] >= MIN_WEIGHT_KG as u8);
        prop_assert!(frame[9] <= MAX_WEIGHT_KG as u8);
    }

    // -- Telemetry ------------------------------------------------------------

    /// Decode accepts exactly the two legal lengths and errors on the rest,
    /// never panicking.
    #[test]
    fn prop_decode_total(len in 0usize..=64, fill: u8) {
        let buf = vec![fill; len];
        match TelemetryFrame::decode(&buf) {
            Ok(TelemetryFrame::Controller(_)) => prop_assert_eq!(len, CONTROLLER_FRAME_LEN),
            Ok(TelemetryFrame::Full(_)) => prop_assert_eq!(len, FULL_FRAME_LEN),
            Err(FortiusProtocolError::UnexpectedFrameLength(l)) => {
                prop_assert_eq!(l, len);
                prop_assert!(len != CONTROLLER_FRAME_LEN && len != FULL_FRAME_LEN);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    /// Full-frame field extraction round-trips through raw bytes.
    #[test]
    fn prop_full_frame_fields(
        heart_rate: u8,
        buttons: u8,
        steering: i16,
        revs: u32,
        raw_speed: u16,
        raw_power: i16,
        cadence: u8,
        pedal: u8,
    ) {
        let mut buf = [0u8; FULL_FRAME_LEN];
        buf[12] = heart_rate;
        buf[13] = buttons;
        buf[18..20].copy_from_slice(&steering.to_le_bytes());
        buf[28..32].copy_from_slice(&revs.to_le_bytes());
        buf[32..34].copy_from_slice(&raw_speed.to_le_bytes());
        buf[38..40].copy_from_slice(&raw_power.to_le_bytes());
        buf[44] = cadence;
        buf[46] = pedal;

        let decoded = TelemetryFrame::decode(&buf);
        prop_assert!(decoded.is_ok());
        if let Ok(TelemetryFrame::Full(full)) = decoded {
            prop_assert_eq!(full.heart_rate, heart_rate);
            prop_assert_eq!(full.buttons, buttons);
            prop_assert_eq!(full.steering, steering);
            prop_assert_eq!(full.double_revolutions, revs);
            prop_assert_eq!(full.raw_speed, raw_speed);
            prop_assert_eq!(full.raw_power, raw_power);
            prop_assert_eq!(full.cadence, cadence);
            prop_assert_eq!(full.pedal_sensor, pedal);
        }
    }
}
