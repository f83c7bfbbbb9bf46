//! Joy-Con HID report layout and subcommand encoding.
//!
//! Input reports used here:
//! - 0x30: standard full report, 49 bytes with buttons, sticks and 3 IMU frames
//! - 0x21: subcommand reply, same button/stick prefix but no IMU data
//!
//! Output report 0x01 carries a subcommand together with a neutral rumble frame.
//!
//! Layout reference: dekuNukem's Nintendo_Switch_Reverse_Engineering notes.

/// Full input report ID (buttons, sticks, IMU).
pub const FULL_REPORT_ID: u8 = 0x30;
/// Subcommand reply report ID.
pub const SUBCOMMAND_REPLY_ID: u8 = 0x21;
/// Output report ID for rumble + subcommand.
pub const SUBCOMMAND_REPORT_ID: u8 = 0x01;

/// Input report length, including the report ID byte.
pub const INPUT_REPORT_LEN: usize = 49;

/// Byte offsets within an input report.
pub mod offsets {
    /// Battery level (bits 5..7) and charging flag (bit 4).
    pub const BATTERY: usize = 2;
    /// Right-unit buttons.
    pub const BUTTONS_RIGHT: usize = 3;
    /// Buttons shared by both units.
    pub const BUTTONS_SHARED: usize = 4;
    /// Left-unit buttons.
    pub const BUTTONS_LEFT: usize = 5;
    /// Left stick, 3 packed bytes.
    pub const STICK_LEFT: usize = 6;
    /// Right stick, 3 packed bytes.
    pub const STICK_RIGHT: usize = 9;
    /// First IMU frame: accel x/y/z then gyro x/y/z, i16 little-endian.
    pub const IMU: usize = 13;
}

/// Subcommand IDs.
pub mod subcommands {
    /// Set input report mode.
    pub const SET_INPUT_MODE: u8 = 0x03;
    /// Enable or disable the 6-axis sensor.
    pub const ENABLE_IMU: u8 = 0x40;
}

/// Neutral rumble frame sent with every subcommand (left + right motor).
pub const NEUTRAL_RUMBLE: [u8; 8] = [0x00, 0x01, 0x40, 0x40, 0x00, 0x01, 0x40, 0x40];

/// Unpack a 3-byte stick field into (horizontal, vertical) 12-bit values.
pub fn unpack_stick(bytes: [u8; 3]) -> (u16, u16) {
    let h = bytes[0] as u16 | ((bytes[1] as u16 & 0x0F) << 8);
    let v = (bytes[1] as u16 >> 4) | ((bytes[2] as u16) << 4);
    (h, v)
}

/// A subcommand output report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcommandRequest {
    /// Rolling 4-bit packet counter.
    pub packet_number: u8,
    pub subcommand: u8,
    pub args: Vec<u8>,
}

impl SubcommandRequest {
    pub fn new(packet_number: u8, subcommand: u8, args: Vec<u8>) -> Self {
        Self {
            packet_number: packet_number & 0x0F,
            subcommand,
            args,
        }
    }

    /// Encode into an output report byte array.
    ///
    /// Layout: `[0x01, counter, rumble(8), subcommand, args...]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(11 + self.args.len());
        buf.push(SUBCOMMAND_REPORT_ID);
        buf.push(self.packet_number);
        buf.extend_from_slice(&NEUTRAL_RUMBLE);
        buf.push(self.subcommand);
        buf.extend_from_slice(&self.args);
        buf
    }
}

/// Hands out the rolling packet counter for one device.
#[derive(Debug, Default)]
pub struct PacketCounter(u8);

impl PacketCounter {
    /// Build the next subcommand report for this device.
    pub fn request(&mut self, subcommand: u8, args: &[u8]) -> SubcommandRequest {
        self.0 = (self.0 + 1) & 0x0F;
        SubcommandRequest::new(self.0, subcommand, args.to_vec())
    }
}

/// Handshake that switches a Joy-Con into full report mode with IMU enabled.
pub fn init_sequence(counter: &mut PacketCounter) -> [SubcommandRequest; 2] {
    [
        counter.request(subcommands::ENABLE_IMU, &[0x01]),
        counter.request(subcommands::SET_INPUT_MODE, &[FULL_REPORT_ID]),
    ]
}
