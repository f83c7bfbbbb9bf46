//! Error types for joycon-teleop-core.

use crate::device::ControllerIdentity;
use thiserror::Error;

/// Failure to turn a raw report into a normalized state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Report length does not match the fixed layout.
    #[error("malformed report: got {actual} bytes, expected {expected}")]
    MalformedReport { expected: usize, actual: usize },
}

/// Device session failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No matching controller is connected.
    #[error("no {0} Joy-Con connected")]
    NotFound(ControllerIdentity),

    /// The platform refused access to the HID node.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No report arrived within the read timeout.
    #[error("read timed out")]
    Timeout,

    /// The connection was lost (unplugged, unpaired, or closed).
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl DeviceError {
    /// Timeouts are expected and mean "no new data this tick".
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Datagram publishing failure.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Destination host/port did not resolve to a socket address.
    #[error("cannot resolve destination {0}")]
    Resolve(String),

    /// Local socket could not be bound.
    #[error("cannot bind UDP socket: {0}")]
    Bind(#[source] std::io::Error),

    /// Payload field is NaN or infinite.
    #[error("non-finite value in payload field `{field}`")]
    NonFinite { field: &'static str },

    /// JSON encoding failed.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The OS rejected the datagram.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),
}

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HID library failure outside of a device session.
    #[error("HID error: {0}")]
    Hid(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {field} ({reason})")]
    Config {
        field: &'static str,
        reason: String,
    },

    /// Configuration file could not be read or parsed.
    #[error("config file error: {0}")]
    ConfigFile(String),

    /// Required controllers could not be opened at startup.
    #[error("startup failed: {0}")]
    Startup(String),
}

/// Convenience Result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
