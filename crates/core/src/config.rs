//! Runtime configuration, built once at startup.

use crate::decode::AxisCalibration;
use crate::device::ControllerIdentity;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default UDP destination host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default UDP destination port.
pub const DEFAULT_PORT: u16 = 5005;

/// Accepted poll rate range, in Hz.
pub const MIN_LOOP_HZ: f64 = 0.1;
pub const MAX_LOOP_HZ: f64 = 1000.0;
/// Upper bound on a single device read.
pub const MAX_READ_TIMEOUT_MS: u64 = 100;

/// Where datagrams are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// What to do when a controller cannot be opened at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Run with whichever controllers opened; keep retrying the rest.
    #[default]
    Degraded,
    /// Every controller must open, otherwise startup fails.
    RequireAll,
}

/// Teleoperation bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub destination: Destination,
    /// Ticks per second.
    pub loop_hz: f64,
    /// Per-controller read timeout within one tick.
    pub read_timeout_ms: u64,
    /// Controllers to poll, in order.
    pub controllers: Vec<ControllerIdentity>,
    pub startup: StartupPolicy,
    pub calibration: AxisCalibration,
    /// Attach an accelerometer-integrated velocity estimate to each datagram.
    pub velocity: bool,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            destination: Destination::default(),
            loop_hz: 100.0,
            read_timeout_ms: 5,
            controllers: ControllerIdentity::ALL.to_vec(),
            startup: StartupPolicy::default(),
            calibration: AxisCalibration::default(),
            velocity: false,
        }
    }
}

impl TeleopConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigFile(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::ConfigFile(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_LOOP_HZ..=MAX_LOOP_HZ).contains(&self.loop_hz) {
            return Err(Error::Config {
                field: "loop_hz",
                reason: format!(
                    "{} is outside {MIN_LOOP_HZ}..={MAX_LOOP_HZ} Hz",
                    self.loop_hz
                ),
            });
        }
        if self.read_timeout_ms > MAX_READ_TIMEOUT_MS {
            return Err(Error::Config {
                field: "read_timeout_ms",
                reason: format!("must be at most {MAX_READ_TIMEOUT_MS} ms"),
            });
        }
        if self.destination.port == 0 {
            return Err(Error::Config {
                field: "destination.port",
                reason: "must be non-zero".into(),
            });
        }
        if self.destination.host.trim().is_empty() {
            return Err(Error::Config {
                field: "destination.host",
                reason: "must not be empty".into(),
            });
        }
        if self.controllers.is_empty() {
            return Err(Error::Config {
                field: "controllers",
                reason: "at least one controller is required".into(),
            });
        }
        let mut seen = self.controllers.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.controllers.len() {
            return Err(Error::Config {
                field: "controllers",
                reason: "duplicate controller".into(),
            });
        }
        self.calibration.validate()
    }

    /// Nominal time between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.loop_hz)
    }

    /// Per-device read bound, never longer than one tick.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms).min(self.tick_interval())
    }
}
