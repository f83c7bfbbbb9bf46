//! Best-effort UDP publishing of normalized states.
//!
//! Each publish is one JSON datagram. Nothing is acknowledged or retried:
//! a failed send is reported to the caller and the data is dropped.

use crate::config::Destination;
use crate::decode::{Battery, Buttons, NormalizedState, Vector3};
use crate::error::PublishError;
use serde::Serialize;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Wire schema of one datagram.
#[derive(Debug, Serialize)]
pub struct Payload<'a> {
    pub side: &'static str,
    /// Wall-clock send time, seconds since the UNIX epoch.
    pub ts: f64,
    pub stick_x: f32,
    pub stick_y: f32,
    pub buttons: &'a Buttons,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub battery: Battery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vector3>,
}

impl<'a> Payload<'a> {
    pub fn new(state: &'a NormalizedState, velocity: Option<Vector3>, ts: f64) -> Self {
        Self {
            side: state.identity.side(),
            ts,
            stick_x: state.stick_x,
            stick_y: state.stick_y,
            buttons: &state.buttons,
            accel: state.accel,
            gyro: state.gyro,
            battery: state.battery,
            velocity,
        }
    }

    /// Reject NaN and infinities; JSON has no encoding for them.
    pub fn validate(&self) -> Result<(), PublishError> {
        let scalars = [
            ("ts", self.ts as f32),
            ("stick_x", self.stick_x),
            ("stick_y", self.stick_y),
        ];
        for (field, value) in scalars {
            if !value.is_finite() {
                return Err(PublishError::NonFinite { field });
            }
        }
        if !self.accel.is_finite() {
            return Err(PublishError::NonFinite { field: "accel" });
        }
        if !self.gyro.is_finite() {
            return Err(PublishError::NonFinite { field: "gyro" });
        }
        if self.velocity.is_some_and(|v| !v.is_finite()) {
            return Err(PublishError::NonFinite { field: "velocity" });
        }
        Ok(())
    }

    /// Validate and encode as UTF-8 JSON.
    pub fn encode(&self) -> Result<Vec<u8>, PublishError> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Resolve a destination to its first socket address.
pub fn resolve(destination: &Destination) -> Result<SocketAddr, PublishError> {
    (destination.host.as_str(), destination.port)
        .to_socket_addrs()
        .map_err(|_| PublishError::Resolve(destination.to_string()))?
        .next()
        .ok_or_else(|| PublishError::Resolve(destination.to_string()))
}

/// Sends normalized states to one fixed UDP destination.
pub struct Publisher {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl Publisher {
    /// Resolve `destination` and bind an ephemeral local socket of the same family.
    pub fn bind(destination: &Destination) -> Result<Self, PublishError> {
        let addr = resolve(destination)?;
        Self::bind_addr(addr)
    }

    pub fn bind_addr(destination: SocketAddr) -> Result<Self, PublishError> {
        let local: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(PublishError::Bind)?;
        // Never stall the poll loop on a full send buffer.
        socket.set_nonblocking(true).map_err(PublishError::Bind)?;
        debug!(%destination, local = ?socket.local_addr().ok(), "UDP publisher ready");
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Send one state as a single datagram. Returns the payload size.
    pub fn publish(
        &self,
        state: &NormalizedState,
        velocity: Option<Vector3>,
    ) -> Result<usize, PublishError> {
        let payload = Payload::new(state, velocity, unix_seconds()).encode()?;
        let sent = self
            .socket
            .send_to(&payload, self.destination)
            .map_err(PublishError::SendFailed)?;
        trace!(side = state.identity.side(), bytes = sent, "Datagram sent");
        Ok(sent)
    }
}
