//! HID transport abstraction for device communication.
//!
//! Provides a trait-based transport layer so that real HID devices and
//! mock devices share the same interface.

use crate::device::{self, ControllerIdentity};
use crate::error::{DeviceError, Error, Result};
use std::time::Duration;
use tracing::{debug, trace};

/// Abstraction over raw HID read/write for one open device.
pub trait HidTransport: Send {
    /// Write one output report. Returns bytes written.
    fn write_report(&self, data: &[u8]) -> std::result::Result<usize, DeviceError>;

    /// Read one input report into `buf`, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read_report(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, DeviceError>;
}

/// Opens a transport for a controller identity.
pub trait Connector {
    type Transport: HidTransport;

    fn connect(
        &mut self,
        identity: ControllerIdentity,
    ) -> std::result::Result<Self::Transport, DeviceError>;
}

/// Map a hidapi error message onto the device error taxonomy.
///
/// hidapi reports everything as free-form strings, so this goes by wording.
/// Pass the bare hidapi message: operation names such as `read_timeout`
/// would otherwise read as a timeout.
pub fn classify_hid_error(msg: &str) -> DeviceError {
    let lower = msg.to_lowercase();
    if lower.contains("permission")
        || lower.contains("access denied")
        || lower.contains("access is denied")
    {
        DeviceError::PermissionDenied(msg.to_string())
    } else if lower.contains("timed out") {
        DeviceError::Timeout
    } else {
        // Anything else on an open handle means the device is gone
        // (unplugged, unpaired, or the node was removed).
        DeviceError::Disconnected(msg.to_string())
    }
}

/// Same as [`classify_hid_error`], for failures while opening a device.
fn classify_open_error(identity: ControllerIdentity, msg: &str) -> DeviceError {
    match classify_hid_error(msg) {
        DeviceError::PermissionDenied(m) => DeviceError::PermissionDenied(m),
        _ => DeviceError::NotFound(identity),
    }
}

/// Classify a failed hidapi call, then name the call in the message.
fn classify_call_error(call: &str, err: &hidapi::HidError) -> DeviceError {
    match classify_hid_error(&err.to_string()) {
        DeviceError::PermissionDenied(m) => DeviceError::PermissionDenied(format!("{call}: {m}")),
        DeviceError::Disconnected(m) => DeviceError::Disconnected(format!("{call}: {m}")),
        other => other,
    }
}

fn timeout_ms(timeout: Duration) -> i32 {
    timeout.as_millis().min(i32::MAX as u128) as i32
}

/// hidapi-backed transport.
pub struct HidapiTransport {
    device: hidapi::HidDevice,
}

impl HidTransport for HidapiTransport {
    fn write_report(&self, data: &[u8]) -> std::result::Result<usize, DeviceError> {
        trace!(report_hex = format_args!("{:02X?}", data), "HID TX");
        self.device
            .write(data)
            .map_err(|e| classify_call_error("write", &e))
    }

    fn read_report(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, DeviceError> {
        let n = self
            .device
            .read_timeout(buf, timeout_ms(timeout))
            .map_err(|e| classify_call_error("read_timeout", &e))?;
        if n > 0 {
            trace!(len = n, report_hex = format_args!("{:02X?}", &buf[..n]), "HID RX");
        }
        Ok(n)
    }
}

/// Opens Joy-Cons through one shared hidapi context.
pub struct HidapiConnector {
    api: hidapi::HidApi,
}

impl HidapiConnector {
    /// Initialize hidapi. Fails if the platform HID library is unavailable.
    pub fn new() -> Result<Self> {
        let api = hidapi::HidApi::new().map_err(|e| Error::Hid(e.to_string()))?;
        Ok(Self { api })
    }
}

impl Connector for HidapiConnector {
    type Transport = HidapiTransport;

    fn connect(
        &mut self,
        identity: ControllerIdentity,
    ) -> std::result::Result<HidapiTransport, DeviceError> {
        // Pick up controllers paired since the last attempt.
        if let Err(e) = self.api.refresh_devices() {
            debug!(error = %e, "HID device refresh failed");
        }

        let path = device::matching_devices(self.api.device_list())
            .into_iter()
            .find(|d| d.identity == identity)
            .map(|d| d.path)
            .ok_or(DeviceError::NotFound(identity))?;

        let c_path = std::ffi::CString::new(path.clone())
            .map_err(|_| DeviceError::NotFound(identity))?;
        let device = self
            .api
            .open_path(&c_path)
            .map_err(|e| classify_open_error(identity, &e.to_string()))?;

        debug!(side = %identity, path = %path, "HID device opened");
        Ok(HidapiTransport { device })
    }
}
