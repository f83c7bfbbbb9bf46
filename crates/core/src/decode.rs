//! Raw report → normalized controller state.
//!
//! Decoding is pure: the same identity and report always produce the same
//! state. The timestamp comes from the report itself, never from a clock read.

use crate::device::ControllerIdentity;
use crate::error::{DecodeError, Error, Result};
use crate::protocol::{self, offsets, FULL_REPORT_ID, INPUT_REPORT_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Accelerometer full-scale used for normalization (raw counts).
pub const ACCEL_FULL_SCALE: f32 = 6000.0;
/// Gyroscope full-scale used for normalization (raw counts).
pub const GYRO_FULL_SCALE: f32 = 5000.0;

/// One input report as read from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReport {
    pub bytes: Vec<u8>,
    pub received_at: Instant,
}

impl RawReport {
    /// Wrap bytes received just now.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::at(bytes, Instant::now())
    }

    /// Wrap bytes with an explicit receive time.
    pub fn at(bytes: Vec<u8>, received_at: Instant) -> Self {
        Self { bytes, received_at }
    }

    /// Report ID byte, if any.
    pub fn report_id(&self) -> Option<u8> {
        self.bytes.first().copied()
    }
}

/// Stick normalization parameters, in raw 12-bit units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisCalibration {
    pub center: u16,
    pub half_range: u16,
    /// Normalized magnitudes below this snap to zero.
    pub deadzone: f32,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self {
            center: 2048,
            half_range: 2048,
            deadzone: 0.05,
        }
    }
}

impl AxisCalibration {
    /// Reject values that would make normalization meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.half_range == 0 {
            return Err(Error::Config {
                field: "calibration.half_range",
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..1.0).contains(&self.deadzone) {
            return Err(Error::Config {
                field: "calibration.deadzone",
                reason: format!("{} is outside [0, 1)", self.deadzone),
            });
        }
        Ok(())
    }

    /// Map a raw axis value to [-1, 1].
    pub fn normalize(&self, raw: u16) -> f32 {
        let x = (raw as f32 - self.center as f32) / self.half_range as f32;
        if !x.is_finite() {
            return 0.0;
        }
        if x.abs() < self.deadzone {
            return 0.0;
        }
        x.clamp(-1.0, 1.0)
    }
}

/// A 3-axis reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Battery status from the report header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battery {
    /// 0 (empty) ..= 4 (full).
    pub level: u8,
    pub charging: bool,
}

impl Battery {
    fn from_byte(b: u8) -> Self {
        Self {
            level: ((b >> 5) & 0x07).min(4),
            charging: (b >> 4) & 0x01 == 1,
        }
    }
}

/// Position of a button bit inside the report.
#[derive(Debug, Clone, Copy)]
pub struct ButtonBit {
    pub name: &'static str,
    pub offset: usize,
    pub mask: u8,
}

const fn bit(name: &'static str, offset: usize, mask: u8) -> ButtonBit {
    ButtonBit { name, offset, mask }
}

/// Buttons reported by the left unit.
pub const LEFT_BUTTONS: &[ButtonBit] = &[
    bit("dpad_down", offsets::BUTTONS_LEFT, 0x01),
    bit("dpad_up", offsets::BUTTONS_LEFT, 0x02),
    bit("dpad_right", offsets::BUTTONS_LEFT, 0x04),
    bit("dpad_left", offsets::BUTTONS_LEFT, 0x08),
    bit("sr_left", offsets::BUTTONS_LEFT, 0x10),
    bit("sl_left", offsets::BUTTONS_LEFT, 0x20),
    bit("l", offsets::BUTTONS_LEFT, 0x40),
    bit("zl", offsets::BUTTONS_LEFT, 0x80),
    bit("minus", offsets::BUTTONS_SHARED, 0x01),
    bit("stick_left", offsets::BUTTONS_SHARED, 0x08),
    bit("capture", offsets::BUTTONS_SHARED, 0x20),
    bit("charging_grip", offsets::BUTTONS_SHARED, 0x80),
];

/// Buttons reported by the right unit.
pub const RIGHT_BUTTONS: &[ButtonBit] = &[
    bit("y", offsets::BUTTONS_RIGHT, 0x01),
    bit("x", offsets::BUTTONS_RIGHT, 0x02),
    bit("b", offsets::BUTTONS_RIGHT, 0x04),
    bit("a", offsets::BUTTONS_RIGHT, 0x08),
    bit("sr_right", offsets::BUTTONS_RIGHT, 0x10),
    bit("sl_right", offsets::BUTTONS_RIGHT, 0x20),
    bit("r", offsets::BUTTONS_RIGHT, 0x40),
    bit("zr", offsets::BUTTONS_RIGHT, 0x80),
    bit("plus", offsets::BUTTONS_SHARED, 0x02),
    bit("stick_right", offsets::BUTTONS_SHARED, 0x04),
    bit("home", offsets::BUTTONS_SHARED, 0x10),
    bit("charging_grip", offsets::BUTTONS_SHARED, 0x80),
];

/// Button table for an identity.
pub fn button_table(identity: ControllerIdentity) -> &'static [ButtonBit] {
    match identity {
        ControllerIdentity::Left => LEFT_BUTTONS,
        ControllerIdentity::Right => RIGHT_BUTTONS,
    }
}

fn stick_offset(identity: ControllerIdentity) -> usize {
    match identity {
        ControllerIdentity::Left => offsets::STICK_LEFT,
        ControllerIdentity::Right => offsets::STICK_RIGHT,
    }
}

/// Named button states for one controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Buttons(BTreeMap<&'static str, bool>);

impl Buttons {
    fn released(table: &[ButtonBit]) -> Self {
        Self(table.iter().map(|b| (b.name, false)).collect())
    }

    fn from_report(table: &[ButtonBit], bytes: &[u8]) -> Self {
        Self(
            table
                .iter()
                .map(|b| (b.name, bytes[b.offset] & b.mask != 0))
                .collect(),
        )
    }

    /// State of a named button, `None` if this controller has no such button.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn is_pressed(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    /// Names of all pressed buttons, sorted.
    pub fn pressed(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().filter(|(_, v)| **v).map(|(k, _)| *k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.0.iter().map(|(&k, &v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Calibrated state of one controller at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedState {
    pub identity: ControllerIdentity,
    pub stick_x: f32,
    pub stick_y: f32,
    pub buttons: Buttons,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub battery: Battery,
    /// When the underlying report was received.
    pub timestamp: Instant,
}

impl NormalizedState {
    /// Centered sticks, nothing pressed.
    pub fn neutral(identity: ControllerIdentity, timestamp: Instant) -> Self {
        Self {
            identity,
            stick_x: 0.0,
            stick_y: 0.0,
            buttons: Buttons::released(button_table(identity)),
            accel: Vector3::ZERO,
            gyro: Vector3::ZERO,
            battery: Battery::default(),
            timestamp,
        }
    }
}

/// Decode with the default stick calibration.
pub fn decode(identity: ControllerIdentity, raw: &RawReport) -> Result<NormalizedState, DecodeError> {
    decode_with(identity, raw, &AxisCalibration::default())
}

/// Decode a report for `identity` using `calibration` for the stick.
pub fn decode_with(
    identity: ControllerIdentity,
    raw: &RawReport,
    calibration: &AxisCalibration,
) -> Result<NormalizedState, DecodeError> {
    let bytes = raw.bytes.as_slice();
    if bytes.len() != INPUT_REPORT_LEN {
        return Err(DecodeError::MalformedReport {
            expected: INPUT_REPORT_LEN,
            actual: bytes.len(),
        });
    }

    // Freshly opened devices may emit zero-filled reports before real data.
    if bytes.iter().all(|&b| b == 0) {
        return Ok(NormalizedState::neutral(identity, raw.received_at));
    }

    let at = stick_offset(identity);
    let (h, v) = protocol::unpack_stick([bytes[at], bytes[at + 1], bytes[at + 2]]);

    let (accel, gyro) = if bytes[0] == FULL_REPORT_ID {
        read_imu(bytes)
    } else {
        (Vector3::ZERO, Vector3::ZERO)
    };

    Ok(NormalizedState {
        identity,
        stick_x: calibration.normalize(h),
        stick_y: calibration.normalize(v),
        buttons: Buttons::from_report(button_table(identity), bytes),
        accel,
        gyro,
        battery: Battery::from_byte(bytes[offsets::BATTERY]),
        timestamp: raw.received_at,
    })
}

fn read_i16(bytes: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn scaled(raw: i16, full_scale: f32) -> f32 {
    (raw as f32 / full_scale).clamp(-1.0, 1.0)
}

fn read_imu(bytes: &[u8]) -> (Vector3, Vector3) {
    let base = offsets::IMU;
    let axis = |i: usize, full_scale: f32| scaled(read_i16(bytes, base + 2 * i), full_scale);
    (
        Vector3::new(
            axis(0, ACCEL_FULL_SCALE),
            axis(1, ACCEL_FULL_SCALE),
            axis(2, ACCEL_FULL_SCALE),
        ),
        Vector3::new(
            axis(3, GYRO_FULL_SCALE),
            axis(4, GYRO_FULL_SCALE),
            axis(5, GYRO_FULL_SCALE),
        ),
    )
}


#[cfg(test)]
mod tests {
    use super::test_reports::*;
    use super::*;
    use crate::protocol::SUBCOMMAND_REPLY_ID;

    const TOL: f32 = 1e-6;

    fn raw(bytes: Vec<u8>) -> RawReport {
        RawReport::new(bytes)
    }

    #[test]
    fn centered_stick_decodes_to_zero() {
        for id in ControllerIdentity::ALL {
            let state = decode(*id, &raw(centered())).unwrap();
            assert!(state.stick_x.abs() < TOL);
            assert!(state.stick_y.abs() < TOL);
        }
    }

    #[test]
    fn center_plus_half_range_is_full_deflection() {
        let cal = AxisCalibration {
            center: 2000,
            half_range: 1500,
            deadzone: 0.05,
        };
        let state = decode_with(
            ControllerIdentity::Left,
            &raw(full_report(3500, 2000)),
            &cal,
        )
        .unwrap();
        assert_eq!(state.stick_x, 1.0);
        assert_eq!(state.stick_y, 0.0);

        let state = decode_with(
            ControllerIdentity::Left,
            &raw(full_report(2000, 3500)),
            &cal,
        )
        .unwrap();
        assert_eq!(state.stick_y, 1.0);
    }

    #[test]
    fn extremes_are_clamped() {
        let narrow = AxisCalibration {
            center: 2048,
            half_range: 100,
            deadzone: 0.0,
        };
        for (h, v) in [(0, 0), (0xFFF, 0xFFF), (0, 0xFFF), (1, 0xFFE)] {
            for id in ControllerIdentity::ALL {
                for cal in [AxisCalibration::default(), narrow] {
                    let state = decode_with(*id, &raw(full_report(h, v)), &cal).unwrap();
                    assert!((-1.0..=1.0).contains(&state.stick_x), "x={}", state.stick_x);
                    assert!((-1.0..=1.0).contains(&state.stick_y), "y={}", state.stick_y);
                }
            }
        }
        let state =
            decode_with(ControllerIdentity::Right, &raw(full_report(0xFFF, 0)), &narrow).unwrap();
        assert_eq!(state.stick_x, 1.0);
        assert_eq!(state.stick_y, -1.0);
    }

    #[test]
    fn every_byte_pattern_stays_in_range() {
        for fill in 0..=255u8 {
            let mut bytes = vec![fill; INPUT_REPORT_LEN];
            bytes[0] = FULL_REPORT_ID;
            let state = decode(ControllerIdentity::Left, &raw(bytes)).unwrap();
            assert!((-1.0..=1.0).contains(&state.stick_x));
            assert!((-1.0..=1.0).contains(&state.stick_y));
            assert!(state.accel.is_finite() && state.gyro.is_finite());
        }
    }

    #[test]
    fn zero_half_range_does_not_produce_nan() {
        let cal = AxisCalibration {
            center: 2048,
            half_range: 0,
            deadzone: 0.05,
        };
        let state = decode_with(ControllerIdentity::Left, &raw(full_report(4000, 10)), &cal).unwrap();
        assert!(state.stick_x.is_finite());
        assert!(state.stick_y.is_finite());
        assert!(cal.validate().is_err());
    }

    #[test]
    fn deadzone_snaps_small_deflection() {
        // 2048 + 40 → 0.0195, inside the 0.05 deadzone
        let state = decode(ControllerIdentity::Left, &raw(full_report(2088, 2008))).unwrap();
        assert_eq!(state.stick_x, 0.0);
        assert_eq!(state.stick_y, 0.0);

        let state = decode(ControllerIdentity::Left, &raw(full_report(2048 + 1024, 2048))).unwrap();
        assert!((state.stick_x - 0.5).abs() < TOL);
    }

    #[test]
    fn decode_is_pure() {
        let mut bytes = full_report(3000, 1000);
        bytes[offsets::BUTTONS_RIGHT] = 0x0A;
        bytes[offsets::IMU] = 0x10;
        let report = raw(bytes);
        let a = decode(ControllerIdentity::Right, &report).unwrap();
        let b = decode(ControllerIdentity::Right, &report).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.stick_x.to_bits(), b.stick_x.to_bits());
        assert_eq!(a.stick_y.to_bits(), b.stick_y.to_bits());
        assert_eq!(a.timestamp, report.received_at);
    }

    #[test]
    fn wrong_length_is_malformed() {
        for len in (0..=128).filter(|&n| n != INPUT_REPORT_LEN) {
            for id in ControllerIdentity::ALL {
                let err = decode(*id, &raw(vec![0u8; len])).unwrap_err();
                assert_eq!(
                    err,
                    DecodeError::MalformedReport {
                        expected: INPUT_REPORT_LEN,
                        actual: len
                    }
                );
            }
        }
    }

    #[test]
    fn all_zero_report_is_neutral() {
        let report = raw(vec![0u8; INPUT_REPORT_LEN]);
        for id in ControllerIdentity::ALL {
            let state = decode(*id, &report).unwrap();
            assert_eq!(state, NormalizedState::neutral(*id, report.received_at));
            assert_eq!(state.buttons.pressed().count(), 0);
            assert_eq!(state.buttons.len(), button_table(*id).len());
        }
    }

    #[test]
    fn right_buttons_map_by_name() {
        let mut bytes = centered();
        bytes[offsets::BUTTONS_RIGHT] = 0x08 | 0x80; // a + zr
        bytes[offsets::BUTTONS_SHARED] = 0x10 | 0x01; // home + minus (left-only)
        let state = decode(ControllerIdentity::Right, &raw(bytes)).unwrap();
        let pressed: Vec<_> = state.buttons.pressed().collect();
        assert_eq!(pressed, vec!["a", "home", "zr"]);
        assert_eq!(state.buttons.get("minus"), None);
        assert_eq!(state.buttons.get("b"), Some(false));
    }

    #[test]
    fn left_buttons_map_by_name() {
        let mut bytes = centered();
        bytes[offsets::BUTTONS_LEFT] = 0x02 | 0x40; // up + l
        bytes[offsets::BUTTONS_SHARED] = 0x08 | 0x20; // left stick + capture
        bytes[offsets::BUTTONS_RIGHT] = 0xFF; // right unit bits are ignored
        let state = decode(ControllerIdentity::Left, &raw(bytes)).unwrap();
        let pressed: Vec<_> = state.buttons.pressed().collect();
        assert_eq!(pressed, vec!["capture", "dpad_up", "l", "stick_left"]);
        assert!(!state.buttons.is_pressed("a"));
    }

    #[test]
    fn each_side_reads_its_own_stick() {
        let mut bytes = centered();
        bytes[offsets::STICK_RIGHT..offsets::STICK_RIGHT + 3]
            .copy_from_slice(&pack_stick(0xFFF, 0));
        let left = decode(ControllerIdentity::Left, &raw(bytes.clone())).unwrap();
        let right = decode(ControllerIdentity::Right, &raw(bytes)).unwrap();
        assert_eq!((left.stick_x, left.stick_y), (0.0, 0.0));
        assert!(right.stick_x > 0.99);
        assert_eq!(right.stick_y, -1.0);
    }

    #[test]
    fn imu_is_scaled_and_clamped() {
        let mut bytes = centered();
        let put = |bytes: &mut Vec<u8>, i: usize, v: i16| {
            let at = offsets::IMU + 2 * i;
            bytes[at..at + 2].copy_from_slice(&v.to_le_bytes());
        };
        put(&mut bytes, 0, 3000);
        put(&mut bytes, 1, -6000);
        put(&mut bytes, 2, i16::MAX);
        put(&mut bytes, 3, 2500);
        put(&mut bytes, 5, i16::MIN);
        let state = decode(ControllerIdentity::Left, &raw(bytes)).unwrap();
        assert!((state.accel.x - 0.5).abs() < TOL);
        assert!((state.accel.y + 1.0).abs() < TOL);
        assert_eq!(state.accel.z, 1.0);
        assert!((state.gyro.x - 0.5).abs() < TOL);
        assert_eq!(state.gyro.y, 0.0);
        assert_eq!(state.gyro.z, -1.0);
    }

    #[test]
    fn subcommand_reply_has_no_imu() {
        let mut bytes = centered();
        bytes[0] = SUBCOMMAND_REPLY_ID;
        bytes[offsets::IMU] = 0x7F;
        bytes[offsets::IMU + 1] = 0x12;
        let state = decode(ControllerIdentity::Left, &raw(bytes)).unwrap();
        assert_eq!(state.accel, Vector3::ZERO);
        assert_eq!(state.gyro, Vector3::ZERO);
    }

    #[test]
    fn battery_header_decodes() {
        let mut bytes = centered();
        bytes[offsets::BATTERY] = 0x6E; // level 3, connection bits set
        let state = decode(ControllerIdentity::Right, &raw(bytes)).unwrap();
        assert_eq!(
            state.battery,
            Battery {
                level: 3,
                charging: false
            }
        );

        let mut bytes = centered();
        bytes[offsets::BATTERY] = 0x90;
        let state = decode(ControllerIdentity::Right, &raw(bytes)).unwrap();
        assert_eq!(state.battery.level, 4);
        assert!(state.battery.charging);
    }

    #[test]
    fn calibration_validation() {
        assert!(AxisCalibration::default().validate().is_ok());
        let bad = AxisCalibration {
            deadzone: 1.5,
            ..AxisCalibration::default()
        };
        assert!(bad.validate().is_err());
    }
}
