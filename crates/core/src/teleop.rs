//! Main poll loop: read both controllers, decode, publish.
//!
//! Single-threaded. Each tick visits every controller once with a bounded
//! read timeout, so a silent or missing controller never starves the other.
//! Per-controller failures are contained; only the stop flag ends the loop.

use crate::config::{StartupPolicy, TeleopConfig};
use crate::decode::{self, AxisCalibration};
use crate::device::ControllerIdentity;
use crate::error::{DeviceError, Error, Result};
use crate::publish::Publisher;
use crate::session::DeviceSession;
use crate::transport::{Connector, HidTransport};
use crate::velocity::VelocityEstimator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reconnect back-off: doubles per failed attempt, capped at 8x the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` failed attempts (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.min(3);
        self.base_delay.saturating_mul(1 << shift)
    }
}

/// Loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
}

/// What happened to one controller during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A state was decoded and sent.
    Published,
    /// No report within the read timeout.
    NoData,
    /// Report could not be decoded; nothing sent.
    Malformed,
    /// Decoded, but the datagram could not be sent.
    PublishFailed,
    /// The session was lost and closed; a reconnect is scheduled.
    Disconnected,
    /// A closed controller was reopened (and polled in the same tick).
    Reconnected,
    /// Reopen attempt failed; next attempt scheduled.
    ReconnectFailed,
    /// Closed, next reconnect attempt not yet due.
    Waiting,
}

struct ControllerSlot<T: HidTransport> {
    identity: ControllerIdentity,
    session: Option<DeviceSession<T>>,
    failed_attempts: u32,
    next_attempt: Instant,
    velocity: Option<VelocityEstimator>,
}

impl<T: HidTransport> ControllerSlot<T> {
    fn schedule_retry(&mut self, now: Instant, policy: &RetryPolicy) {
        let delay = policy.delay_for(self.failed_attempts);
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.next_attempt = now + delay;
        debug!(side = %self.identity, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
    }
}

/// The teleoperation loop over one connector and one publisher.
pub struct TeleopLoop<C: Connector> {
    connector: C,
    publisher: Publisher,
    slots: Vec<ControllerSlot<C::Transport>>,
    calibration: AxisCalibration,
    read_timeout: Duration,
    tick_interval: Duration,
    retry: RetryPolicy,
    state: LoopState,
}

impl<C: Connector> TeleopLoop<C> {
    /// Open the configured controllers and enter `Running`.
    ///
    /// Fails if no controller opens, or if any fails under
    /// [`StartupPolicy::RequireAll`].
    pub fn start(mut connector: C, publisher: Publisher, config: &TeleopConfig) -> Result<Self> {
        config.validate()?;
        let now = Instant::now();
        let retry = RetryPolicy::default();
        let mut slots = Vec::with_capacity(config.controllers.len());
        let mut failures = Vec::new();

        for &identity in &config.controllers {
            let mut slot = ControllerSlot {
                identity,
                session: None,
                failed_attempts: 0,
                next_attempt: now,
                velocity: config.velocity.then(VelocityEstimator::new),
            };
            match DeviceSession::open(&mut connector, identity) {
                Ok(session) => slot.session = Some(session),
                Err(e) => {
                    warn!(side = %identity, error = %e, "Joy-Con unavailable at startup");
                    slot.schedule_retry(now, &retry);
                    failures.push(format!("{identity}: {e}"));
                }
            }
            slots.push(slot);
        }

        let opened = slots.iter().filter(|s| s.session.is_some()).count();
        if opened == 0 {
            return Err(Error::Startup(format!(
                "no controller could be opened ({})",
                failures.join("; ")
            )));
        }
        if config.startup == StartupPolicy::RequireAll && !failures.is_empty() {
            return Err(Error::Startup(failures.join("; ")));
        }
        if !failures.is_empty() {
            warn!(opened, total = slots.len(), "Running with a reduced controller set");
        }

        info!(
            destination = %publisher.destination(),
            loop_hz = config.loop_hz,
            controllers = opened,
            "Teleop loop running"
        );
        Ok(Self {
            connector,
            publisher,
            slots,
            calibration: config.calibration,
            read_timeout: config.read_timeout(),
            tick_interval: config.tick_interval(),
            retry,
            state: LoopState::Running,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Identities with an open session.
    pub fn open_controllers(&self) -> Vec<ControllerIdentity> {
        self.slots
            .iter()
            .filter(|s| s.session.as_ref().is_some_and(|d| d.is_open()))
            .map(|s| s.identity)
            .collect()
    }

    /// Poll every controller once.
    pub fn tick(&mut self, now: Instant) -> Vec<(ControllerIdentity, TickOutcome)> {
        let mut outcomes = Vec::with_capacity(self.slots.len());
        for i in 0..self.slots.len() {
            let outcome = self.poll_slot(i, now);
            outcomes.push((self.slots[i].identity, outcome));
        }
        outcomes
    }

    fn poll_slot(&mut self, i: usize, now: Instant) -> TickOutcome {
        let slot = &mut self.slots[i];
        let identity = slot.identity;

        let mut reconnected = false;
        if slot.session.is_none() {
            if now < slot.next_attempt {
                return TickOutcome::Waiting;
            }
            match DeviceSession::open(&mut self.connector, identity) {
                Ok(session) => {
                    info!(side = %identity, attempts = slot.failed_attempts, "Joy-Con reconnected");
                    slot.session = Some(session);
                    slot.failed_attempts = 0;
                    if let Some(est) = slot.velocity.as_mut() {
                        est.reset();
                    }
                    reconnected = true;
                }
                Err(e) => {
                    debug!(side = %identity, error = %e, "Reconnect failed");
                    slot.schedule_retry(now, &self.retry);
                    return TickOutcome::ReconnectFailed;
                }
            }
        }

        let Some(session) = slot.session.as_mut() else {
            return TickOutcome::Waiting;
        };
        let report = match session.read_latest(self.read_timeout) {
            Ok(report) => report,
            Err(DeviceError::Timeout) if reconnected => return TickOutcome::Reconnected,
            Err(DeviceError::Timeout) => return TickOutcome::NoData,
            Err(e) => {
                warn!(side = %identity, error = %e, "Joy-Con lost, will retry");
                session.close();
                slot.session = None;
                slot.schedule_retry(now, &self.retry);
                return TickOutcome::Disconnected;
            }
        };

        let state = match decode::decode_with(identity, &report, &self.calibration) {
            Ok(state) => state,
            Err(e) => {
                debug!(side = %identity, error = %e, "Skipping undecodable report");
                return TickOutcome::Malformed;
            }
        };

        let dt = self.tick_interval.as_secs_f32();
        let velocity = slot.velocity.as_mut().map(|est| est.update(state.accel, dt));

        match self.publisher.publish(&state, velocity) {
            Ok(_) if reconnected => TickOutcome::Reconnected,
            Ok(_) => TickOutcome::Published,
            Err(e) => {
                warn!(side = %identity, error = %e, "Publish failed, dropping sample");
                TickOutcome::PublishFailed
            }
        }
    }

    /// Tick at the configured rate until `stop` is set, then shut down.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick(started);
            if let Some(rest) = self.tick_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        info!("Stop requested");
        self.shutdown();
    }

    /// Enter `Stopping` and release every session. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopping {
            return;
        }
        self.state = LoopState::Stopping;
        for slot in &mut self.slots {
            if let Some(mut session) = slot.session.take() {
                session.close();
            }
        }
        info!("Teleop loop stopped");
    }
}
