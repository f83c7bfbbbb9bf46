//! joycon-teleop-core: Joy-Con report decoding, device sessions, and UDP publishing.
//!
//! This crate reads input reports from a left/right Joy-Con pair over HID,
//! normalizes them, and forwards each controller's state as a JSON datagram
//! to a teleoperation receiver.

pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod protocol;
pub mod publish;
pub mod session;
pub mod teleop;
pub mod transport;
pub mod velocity;

/// Nintendo USB Vendor ID.
pub const NINTENDO_VID: u16 = 0x057E;

/// Known Joy-Con product IDs.
pub mod pids {
    /// Joy-Con (L).
    pub const JOYCON_LEFT: u16 = 0x2006;
    /// Joy-Con (R).
    pub const JOYCON_RIGHT: u16 = 0x2007;
}
