//! Controller identities and device discovery.

use crate::error::{Error, Result};
use crate::{pids, NINTENDO_VID};
use tracing::{debug, info};

/// The two supported Joy-Con units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ControllerIdentity {
    Left,
    Right,
}

impl ControllerIdentity {
    /// Both identities, in polling order.
    pub const ALL: &'static [ControllerIdentity] =
        &[ControllerIdentity::Left, ControllerIdentity::Right];

    /// Look up identity from USB product ID.
    pub fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            pids::JOYCON_LEFT => Some(Self::Left),
            pids::JOYCON_RIGHT => Some(Self::Right),
            _ => None,
        }
    }

    /// USB Product ID.
    pub fn pid(&self) -> u16 {
        match self {
            Self::Left => pids::JOYCON_LEFT,
            Self::Right => pids::JOYCON_RIGHT,
        }
    }

    /// Wire name used in the `side` payload field.
    pub fn side(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Left => "Joy-Con (L)",
            Self::Right => "Joy-Con (R)",
        }
    }

    /// Parse `left`/`right` (also `l`/`r`), case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "left" | "l" => Some(Self::Left),
            "right" | "r" => Some(Self::Right),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControllerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.side())
    }
}

/// Information about a discovered Joy-Con.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub identity: ControllerIdentity,
    pub vid: u16,
    pub pid: u16,
    pub path: String,
    /// Bluetooth MAC on most platforms.
    pub serial: Option<String>,
}

/// Filter an enumeration down to recognized Joy-Cons.
pub(crate) fn matching_devices<'a>(
    list: impl Iterator<Item = &'a hidapi::DeviceInfo>,
) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    for info in list {
        if info.vendor_id() != NINTENDO_VID {
            continue;
        }

        if let Some(identity) = ControllerIdentity::from_pid(info.product_id()) {
            info!(
                model = identity.name(),
                vid = format_args!("0x{:04X}", info.vendor_id()),
                pid = format_args!("0x{:04X}", info.product_id()),
                path = %info.path().to_string_lossy(),
                "Found Joy-Con"
            );
            devices.push(DeviceInfo {
                identity,
                vid: info.vendor_id(),
                pid: info.product_id(),
                path: info.path().to_string_lossy().into_owned(),
                serial: info.serial_number().map(|s| s.to_string()),
            });
        }
    }
    devices
}

/// Discover all connected Joy-Cons.
pub fn discover_devices() -> Result<Vec<DeviceInfo>> {
    debug!("Starting HID device enumeration");
    let api = hidapi::HidApi::new().map_err(|e| Error::Hid(e.to_string()))?;
    let devices = matching_devices(api.device_list());
    debug!(count = devices.len(), "Device enumeration complete");
    Ok(devices)
}
