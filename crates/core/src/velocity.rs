//! Linear velocity estimate from accelerometer samples.
//!
//! The first few samples are averaged into a gravity offset while the
//! controller is assumed to be at rest. After that, gravity-corrected
//! acceleration is integrated with the trapezoidal rule. A per-sample decay
//! and a hard clamp keep integration drift bounded.

use crate::decode::Vector3;
use tracing::debug;

/// Samples averaged into the gravity offset.
pub const GRAVITY_SAMPLES: usize = 3;
/// Multiplier applied to the velocity after every update.
pub const DECAY: f32 = 0.99;
/// Velocity magnitude limit per axis.
pub const MAX_VELOCITY: f32 = 2.0;

#[derive(Debug, Clone, Default)]
pub struct VelocityEstimator {
    velocity: Vector3,
    prev_accel: Vector3,
    gravity: Option<Vector3>,
    init_samples: Vec<Vector3>,
    sample_count: u64,
}

impl VelocityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the gravity offset has been captured.
    pub fn is_calibrated(&self) -> bool {
        self.gravity.is_some()
    }

    /// Forget everything, e.g. after the controller reconnects.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one accelerometer sample taken `dt` seconds after the previous one.
    pub fn update(&mut self, accel: Vector3, dt: f32) -> Vector3 {
        let Some(gravity) = self.gravity else {
            self.init_samples.push(accel);
            if self.init_samples.len() >= GRAVITY_SAMPLES {
                let n = self.init_samples.len() as f32;
                let sum = self.init_samples.iter().fold(Vector3::ZERO, |acc, s| {
                    Vector3::new(acc.x + s.x, acc.y + s.y, acc.z + s.z)
                });
                let offset = Vector3::new(sum.x / n, sum.y / n, sum.z / n);
                debug!(x = offset.x, y = offset.y, z = offset.z, "Gravity offset captured");
                self.gravity = Some(offset);
                self.init_samples.clear();
            }
            return Vector3::ZERO;
        };

        self.sample_count += 1;
        let corrected = Vector3::new(accel.x - gravity.x, accel.y - gravity.y, accel.z - gravity.z);
        let prev = self.prev_accel;

        let integrate = |v: f32, a: f32, p: f32| {
            let next = (v + (a + p) / 2.0 * dt) * DECAY;
            if next.is_finite() {
                next.clamp(-MAX_VELOCITY, MAX_VELOCITY)
            } else {
                0.0
            }
        };
        self.velocity = Vector3::new(
            integrate(self.velocity.x, corrected.x, prev.x),
            integrate(self.velocity.y, corrected.y, prev.y),
            integrate(self.velocity.z, corrected.z, prev.z),
        );
        self.prev_accel = corrected;
        self.velocity
    }

    pub fn velocity(&self) -> Vector3 {
        self.velocity
    }
}
