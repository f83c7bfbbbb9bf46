//! Device session: one open Joy-Con handle and its report reads.

use crate::decode::RawReport;
use crate::device::ControllerIdentity;
use crate::error::DeviceError;
use crate::protocol::{self, PacketCounter};
use crate::transport::{Connector, HidTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read buffer size; larger than any Joy-Con input report.
const READ_BUF_LEN: usize = 64;

/// Upper bound on queued reports discarded by [`DeviceSession::read_latest`].
pub const MAX_DRAIN: usize = 16;

/// Exclusive owner of one controller handle.
pub struct DeviceSession<T: HidTransport> {
    identity: ControllerIdentity,
    transport: Option<T>,
    counter: PacketCounter,
}

impl<T: HidTransport> DeviceSession<T> {
    /// Connect to `identity` and switch it into full report mode.
    pub fn open<C>(connector: &mut C, identity: ControllerIdentity) -> Result<Self, DeviceError>
    where
        C: Connector<Transport = T>,
    {
        let transport = connector.connect(identity)?;
        let mut session = Self::from_transport(identity, transport);
        if let Err(e) = session.initialize() {
            session.close();
            return Err(e);
        }
        info!(side = %identity, "Joy-Con session opened");
        Ok(session)
    }

    /// Wrap an already-open transport without any handshake.
    pub fn from_transport(identity: ControllerIdentity, transport: T) -> Self {
        Self {
            identity,
            transport: Some(transport),
            counter: PacketCounter::default(),
        }
    }

    fn initialize(&mut self) -> Result<(), DeviceError> {
        let transport = self.transport.as_ref().ok_or_else(closed)?;
        for req in protocol::init_sequence(&mut self.counter) {
            debug!(
                side = %self.identity,
                subcommand = format_args!("0x{:02X}", req.subcommand),
                "Sending subcommand"
            );
            transport.write_report(&req.encode())?;
        }
        Ok(())
    }

    pub fn identity(&self) -> ControllerIdentity {
        self.identity
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Read the next report, waiting at most `timeout`.
    ///
    /// Any failure other than a timeout releases the handle; every later read
    /// on this session then fails with `Disconnected`.
    pub fn read_report(&mut self, timeout: Duration) -> Result<RawReport, DeviceError> {
        let transport = self.transport.as_ref().ok_or_else(closed)?;
        let mut buf = [0u8; READ_BUF_LEN];
        match transport.read_report(&mut buf, timeout) {
            Ok(0) => Err(DeviceError::Timeout),
            Ok(n) => Ok(RawReport::new(buf[..n].to_vec())),
            Err(DeviceError::Timeout) => Err(DeviceError::Timeout),
            Err(e) => {
                warn!(side = %self.identity, error = %e, "Joy-Con read failed, releasing handle");
                self.close();
                Err(e)
            }
        }
    }

    /// Read one report, then drain whatever else is already queued and
    /// return the newest.
    ///
    /// A failure while draining is deferred: the newest report is returned
    /// and the closed session reports `Disconnected` on the next read.
    pub fn read_latest(&mut self, timeout: Duration) -> Result<RawReport, DeviceError> {
        let mut latest = self.read_report(timeout)?;
        for _ in 0..MAX_DRAIN {
            match self.read_report(Duration::ZERO) {
                Ok(report) => latest = report,
                Err(_) => break,
            }
        }
        Ok(latest)
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!(side = %self.identity, "Joy-Con session closed");
        }
    }
}

impl<T: HidTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn closed() -> DeviceError {
    DeviceError::Disconnected("session closed".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::test_reports;
    use crate::protocol::{subcommands, SUBCOMMAND_REPORT_ID};
    use crate::transport::mock::{MockConnector, MockRead, MockTransport};

    const TIMEOUT: Duration = Duration::from_millis(5);

    fn open_with(mock: &MockTransport) -> DeviceSession<MockTransport> {
        let mut connector = MockConnector::new();
        connector.attach(ControllerIdentity::Left, mock.clone());
        DeviceSession::open(&mut connector, ControllerIdentity::Left).unwrap()
    }

    #[test]
    fn open_sends_init_handshake() {
        let mock = MockTransport::new();
        let session = open_with(&mock);
        assert!(session.is_open());

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w[0] == SUBCOMMAND_REPORT_ID));
        assert_eq!(writes[0][10], subcommands::ENABLE_IMU);
        assert_eq!(writes[1][10], subcommands::SET_INPUT_MODE);
        assert_eq!(writes[1][11], protocol::FULL_REPORT_ID);
    }

    #[test]
    fn open_not_found() {
        let mut connector = MockConnector::new();
        let result: Result<DeviceSession<MockTransport>, _> =
            DeviceSession::open(&mut connector, ControllerIdentity::Right);
        assert_eq!(
            result.err(),
            Some(DeviceError::NotFound(ControllerIdentity::Right))
        );
    }

    #[test]
    fn open_permission_denied() {
        let mut connector = MockConnector::new();
        connector.refuse(
            ControllerIdentity::Left,
            DeviceError::PermissionDenied("hidraw".into()),
        );
        let result: Result<DeviceSession<MockTransport>, _> =
            DeviceSession::open(&mut connector, ControllerIdentity::Left);
        assert!(matches!(result, Err(DeviceError::PermissionDenied(_))));
    }

    #[test]
    fn open_fails_when_handshake_write_fails() {
        let mock = MockTransport::new();
        mock.fail_writes(DeviceError::Disconnected("write".into()));
        let mut connector = MockConnector::new();
        connector.attach(ControllerIdentity::Left, mock);
        let result = DeviceSession::open(&mut connector, ControllerIdentity::Left);
        assert!(matches!(result, Err(DeviceError::Disconnected(_))));
    }

    #[test]
    fn read_returns_report_bytes() {
        let mock = MockTransport::new();
        mock.push_report(test_reports::centered());
        let mut session = open_with(&mock);
        let report = session.read_report(TIMEOUT).unwrap();
        assert_eq!(report.bytes, test_reports::centered());
    }

    #[test]
    fn empty_read_is_timeout_and_keeps_session_open() {
        let mock = MockTransport::new();
        let mut session = open_with(&mock);
        assert_eq!(session.read_report(TIMEOUT), Err(DeviceError::Timeout));
        assert!(session.is_open());
    }

    #[test]
    fn disconnect_is_sticky() {
        let mock = MockTransport::new();
        mock.push(MockRead::Fail(DeviceError::Disconnected("unplugged".into())))
            .push_report(test_reports::centered());
        let mut session = open_with(&mock);

        assert!(matches!(
            session.read_report(TIMEOUT),
            Err(DeviceError::Disconnected(_))
        ));
        assert!(!session.is_open());

        // The queued report must never be read through the released handle.
        for _ in 0..3 {
            assert_eq!(session.read_report(TIMEOUT), Err(closed()));
        }
        assert_eq!(mock.read_calls(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let mock = MockTransport::new();
        let mut session = open_with(&mock);
        session.close();
        session.close();
        assert!(!session.is_open());
        assert!(session.read_report(TIMEOUT).is_err());
    }

    #[test]
    fn read_latest_returns_newest_queued_report() {
        let mock = MockTransport::new();
        let older = test_reports::full_report(100, 100);
        let newer = test_reports::full_report(4000, 4000);
        mock.push_report(older).push_report(newer.clone());
        let mut session = open_with(&mock);

        let report = session.read_latest(TIMEOUT).unwrap();
        assert_eq!(report.bytes, newer);
        assert!(session.is_open());
    }

    #[test]
    fn read_latest_defers_drain_failure() {
        let mock = MockTransport::new();
        mock.push_report(test_reports::centered())
            .push(MockRead::Fail(DeviceError::Disconnected("gone".into())));
        let mut session = open_with(&mock);

        assert!(session.read_latest(TIMEOUT).is_ok());
        assert!(!session.is_open());
        assert!(matches!(
            session.read_latest(TIMEOUT),
            Err(DeviceError::Disconnected(_))
        ));
    }

    #[test]
    fn read_latest_times_out_when_idle() {
        let mock = MockTransport::new();
        let mut session = open_with(&mock);
        assert_eq!(session.read_latest(TIMEOUT), Err(DeviceError::Timeout));
    }
}
