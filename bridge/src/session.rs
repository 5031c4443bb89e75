//! Connection lifecycle for one device.
//!
//! A [`Session`] is driven by an external fixed-rate scheduler: call
//! [`Session::tick`] once per frame. Discovery is a cooperative step that
//! carries its own elapsed time across ticks; nothing here sleeps or blocks
//! beyond a single bounded channel read.

use crate::calibration::CalibrationTransform;
use crate::channel::{ChannelConfig, ChannelError, LineChannel};
use crate::pipeline::{self, Orientation};
use crate::protocol::{self, Command, ParsedEvent};
use glam::Vec3;
use std::time::Duration;
use thiserror::Error;

/// How long the device has to answer `DISCOVER`.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Session has been terminated")]
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Waiting,
    Discovering,
    Connected,
    Terminated,
}

/// Why a discovery attempt did not connect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeFailure {
    #[error("No reply within {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("Unexpected reply {0:?}")]
    UnexpectedReply(String),
}

/// Something a tick produced that the host may want to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    HandshakeFailed(HandshakeFailure),
    Orientation(Orientation),
    ButtonDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Neutral,
    Success,
    Warning,
    Error,
}

/// Human-readable status for display next to the port selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub severity: Severity,
}

impl Status {
    fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Default)]
struct DiscoveryAttempt {
    elapsed: Duration,
}

pub struct Session<C: LineChannel> {
    channel: C,
    state: ConnectionState,
    discovery_window: Duration,
    discovery: Option<DiscoveryAttempt>,
    calibration: Option<CalibrationTransform>,
    latest_sample: Option<Vec3>,
    latest_orientation: Orientation,
    status: Status,
}

impl<C: LineChannel> Session<C> {
    pub fn new(channel: C) -> Self {
        Self::with_discovery_window(channel, DEFAULT_DISCOVERY_WINDOW)
    }

    pub fn with_discovery_window(channel: C, discovery_window: Duration) -> Self {
        Self {
            channel,
            state: ConnectionState::Waiting,
            discovery_window,
            discovery: None,
            calibration: None,
            latest_sample: None,
            latest_orientation: Orientation::default(),
            status: Status::new("Select a port", Severity::Neutral),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn latest_orientation(&self) -> Orientation {
        self.latest_orientation
    }

    /// Last raw sample received since the current connection started.
    pub fn latest_sample(&self) -> Option<Vec3> {
        self.latest_sample
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn calibration(&self) -> Option<&CalibrationTransform> {
        self.calibration.as_ref()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Open the channel and send the handshake probe.
    ///
    /// An open failure leaves a waiting session untouched. If a live channel
    /// had to be closed first, the session falls back to `Waiting`. The
    /// handshake itself resolves over the following ticks.
    pub fn begin_discovery(&mut self, config: &ChannelConfig) -> Result<(), SessionError> {
        if self.state == ConnectionState::Terminated {
            return Err(SessionError::Terminated);
        }

        let reopening = self.channel.is_open();
        if reopening {
            self.channel.close();
        }
        if let Err(e) = self.channel.open(config) {
            if reopening {
                tracing::warn!(%e, "Lost previous connection while reopening");
                self.reset_connection();
                self.status = Status::new("Connection failed.", Severity::Error);
            }
            return Err(e.into());
        }

        self.calibration = None;
        self.latest_sample = None;
        self.status = Status::new("Sent DISCOVER to port. T+: 0.0", Severity::Neutral);
        self.state = ConnectionState::Discovering;
        tracing::info!(port = %config.port, "Discovering device");

        if let Err(e) = self.channel.write_line(Command::Discover.as_line()) {
            tracing::error!(%e, "Failed to send DISCOVER");
            self.channel.close();
            self.state = ConnectionState::Waiting;
            self.status = Status::new("Connection failed.", Severity::Error);
            return Err(e.into());
        }
        self.discovery = Some(DiscoveryAttempt::default());
        Ok(())
    }

    /// Advance the session by one scheduler frame of length `dt`.
    pub fn tick(&mut self, dt: Duration) -> Option<SessionEvent> {
        match self.state {
            ConnectionState::Discovering => self.poll_discovery(dt),
            ConnectionState::Connected => self.poll_connected(),
            ConnectionState::Waiting | ConnectionState::Terminated => None,
        }
    }

    /// Tell the device to stop and close the channel. Does nothing once the
    /// session is terminated.
    pub fn request_close(&mut self) {
        if self.state == ConnectionState::Terminated {
            return;
        }

        if self.channel.is_open() {
            if let Err(e) = self.channel.write_line(Command::Terminate.as_line()) {
                tracing::error!(%e, "Failed to send TERMINATE");
            }
        }
        self.status = Status::new("Connection Terminated", Severity::Warning);
        self.state = ConnectionState::Terminated;
        self.discovery = None;
        self.channel.close();
        tracing::info!("Connection terminated");
    }

    /// Lifecycle hook for the host to call when the process is exiting.
    pub fn shutdown(&mut self) {
        self.request_close();
    }

    fn reset_connection(&mut self) {
        self.state = ConnectionState::Waiting;
        self.discovery = None;
        self.calibration = None;
        self.latest_sample = None;
    }

    fn poll_discovery(&mut self, dt: Duration) -> Option<SessionEvent> {
        let reply = self.read_line();
        let attempt = self.discovery.get_or_insert_with(DiscoveryAttempt::default);
        attempt.elapsed += dt;
        let elapsed = attempt.elapsed;

        self.status = Status::new(
            format!("Sent DISCOVER to port. T+: {:.1}", elapsed.as_secs_f32()),
            Severity::Neutral,
        );

        let failure = match reply {
            Some(reply) if reply == "ACKNOWLEDGE" => {
                self.discovery = None;
                self.state = ConnectionState::Connected;
                self.status = Status::new(format!("Device reply: {}", reply), Severity::Success);
                tracing::info!(?elapsed, "Device connected");
                return Some(SessionEvent::Connected);
            }
            Some(reply) if !reply.is_empty() => HandshakeFailure::UnexpectedReply(reply),
            _ if elapsed >= self.discovery_window => HandshakeFailure::Timeout { elapsed },
            _ => return None,
        };

        tracing::warn!(%failure, "Discovery failed");
        self.discovery = None;
        self.channel.close();
        self.state = ConnectionState::Waiting;
        self.status = Status::new("Connection failed.", Severity::Error);
        Some(SessionEvent::HandshakeFailed(failure))
    }

    fn poll_connected(&mut self) -> Option<SessionEvent> {
        let line = self.read_line()?;
        match protocol::parse(&line) {
            ParsedEvent::SensorSample { x, y, z } => {
                let raw = Vec3::new(x as f32, y as f32, z as f32);
                self.latest_sample = Some(raw);
                self.process_sample(raw)
            }
            ParsedEvent::ButtonDown => {
                tracing::info!("Button pressed");
                Some(SessionEvent::ButtonDown)
            }
            ParsedEvent::Acknowledge => {
                tracing::debug!("Ignoring ACKNOWLEDGE while connected");
                None
            }
            ParsedEvent::Unknown(text) => {
                tracing::debug!(%text, "Ignoring unknown line");
                None
            }
            ParsedEvent::Empty => None,
        }
    }

    fn process_sample(&mut self, raw: Vec3) -> Option<SessionEvent> {
        let transform = match self.calibration {
            Some(transform) => transform,
            None => match CalibrationTransform::calibrate(raw) {
                Ok(transform) => *self.calibration.insert(transform),
                Err(e) => {
                    tracing::warn!(%e, "Skipping calibration sample");
                    return None;
                }
            },
        };

        let orientation = pipeline::apply(&transform, raw);
        self.latest_orientation = orientation;
        Some(SessionEvent::Orientation(orientation))
    }

    /// One bounded read. Timeouts and channel errors both count as no data.
    fn read_line(&mut self) -> Option<String> {
        match self.channel.read_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(%e, "Channel read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const TICK: Duration = Duration::from_millis(500);

    #[derive(Default)]
    struct FakeChannel {
        open: bool,
        fail_open: bool,
        incoming: VecDeque<String>,
        sent: Vec<String>,
        closes: usize,
    }

    impl LineChannel for FakeChannel {
        fn open(&mut self, config: &ChannelConfig) -> Result<(), ChannelError> {
            if self.fail_open {
                return Err(ChannelError::Open {
                    port: config.port.clone(),
                    reason: "busy".into(),
                });
            }
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            if self.open {
                self.closes += 1;
            }
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
            if !self.open {
                return Err(ChannelError::WriteOnClosedChannel);
            }
            self.sent.push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
            Ok(self.incoming.pop_front())
        }
    }

    fn discovering() -> Session<FakeChannel> {
        let mut session = Session::new(FakeChannel::default());
        session.begin_discovery(&ChannelConfig::new("COM3")).unwrap();
        session
    }

    fn connected() -> Session<FakeChannel> {
        let mut session = discovering();
        session.channel_mut().incoming.push_back("ACKNOWLEDGE".into());
        assert_eq!(session.tick(TICK), Some(SessionEvent::Connected));
        session
    }

    #[test]
    fn begin_discovery_sends_probe() {
        let session = discovering();
        assert_eq!(session.state(), ConnectionState::Discovering);
        assert_eq!(session.channel().sent, vec!["DISCOVER"]);
        assert_eq!(session.status().severity, Severity::Neutral);
    }

    #[test]
    fn open_failure_keeps_waiting() {
        let mut session = Session::new(FakeChannel {
            fail_open: true,
            ..Default::default()
        });
        let err = session.begin_discovery(&ChannelConfig::new("COM3")).unwrap_err();
        assert!(matches!(err, SessionError::Channel(ChannelError::Open { .. })));
        assert_eq!(session.state(), ConnectionState::Waiting);
        assert!(session.channel().sent.is_empty());
    }

    #[test]
    fn failed_reopen_drops_connection() {
        let mut session = connected();
        session.channel_mut().incoming.push_back("XYZ:0:0:-100".into());
        session.tick(TICK);
        assert!(session.is_calibrated());

        session.channel_mut().fail_open = true;
        let err = session.begin_discovery(&ChannelConfig::new("COM4")).unwrap_err();
        assert!(matches!(err, SessionError::Channel(ChannelError::Open { .. })));
        assert_eq!(session.state(), ConnectionState::Waiting);
        assert!(!session.channel().is_open());
        assert!(!session.is_calibrated());
        assert_eq!(session.latest_sample(), None);
        assert_eq!(session.status().severity, Severity::Error);
        assert_eq!(session.tick(TICK), None);
    }

    #[test]
    fn latest_sample_tracks_current_connection() {
        let mut session = connected();
        assert_eq!(session.latest_sample(), None);

        session.channel_mut().incoming.push_back("XYZ:1:-2:-300".into());
        session.tick(TICK);
        assert_eq!(session.latest_sample(), Some(Vec3::new(1.0, -2.0, -300.0)));

        session.begin_discovery(&ChannelConfig::new("COM3")).unwrap();
        assert_eq!(session.latest_sample(), None);
    }

    #[test]
    fn status_reports_elapsed_time() {
        let mut session = discovering();
        assert_eq!(session.tick(Duration::from_millis(1300)), None);
        assert_eq!(session.status().message, "Sent DISCOVER to port. T+: 1.3");
    }

    #[test]
    fn unexpected_reply_fails_discovery() {
        let mut session = discovering();
        session.channel_mut().incoming.push_back("HELLO".into());
        assert_eq!(
            session.tick(TICK),
            Some(SessionEvent::HandshakeFailed(HandshakeFailure::UnexpectedReply(
                "HELLO".into()
            )))
        );
        assert_eq!(session.state(), ConnectionState::Waiting);
        assert!(!session.channel().is_open());
        assert_eq!(session.status().severity, Severity::Error);
    }

    #[test]
    fn empty_reply_keeps_waiting_for_ack() {
        let mut session = discovering();
        session.channel_mut().incoming.push_back(String::new());
        assert_eq!(session.tick(TICK), None);
        assert_eq!(session.state(), ConnectionState::Discovering);
    }

    #[test]
    fn ack_while_connected_is_ignored() {
        let mut session = connected();
        session.channel_mut().incoming.push_back("ACKNOWLEDGE".into());
        assert_eq!(session.tick(TICK), None);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn malformed_sample_does_not_end_session() {
        let mut session = connected();
        session.channel_mut().incoming.push_back("XYZ:1:oops:3".into());
        assert_eq!(session.tick(TICK), None);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(!session.is_calibrated());
    }

    #[test]
    fn zero_sample_defers_calibration() {
        let mut session = connected();
        session.channel_mut().incoming.push_back("XYZ:0:0:0".into());
        assert_eq!(session.tick(TICK), None);
        assert!(!session.is_calibrated());

        session.channel_mut().incoming.push_back("XYZ:0:0:-100".into());
        assert!(matches!(session.tick(TICK), Some(SessionEvent::Orientation(_))));
        assert!(session.is_calibrated());
    }

    #[test]
    fn close_from_waiting_without_channel() {
        let mut session = Session::new(FakeChannel::default());
        session.request_close();
        assert_eq!(session.state(), ConnectionState::Terminated);
        assert!(session.channel().sent.is_empty());
        assert_eq!(session.status().severity, Severity::Warning);
    }

    #[test]
    fn terminated_session_refuses_discovery() {
        let mut session = connected();
        session.shutdown();
        assert!(matches!(
            session.begin_discovery(&ChannelConfig::new("COM3")),
            Err(SessionError::Terminated)
        ));
        assert_eq!(session.tick(TICK), None);
    }

    #[test]
    fn close_during_discovery_stops_polling() {
        let mut session = discovering();
        session.request_close();
        session.channel_mut().incoming.push_back("ACKNOWLEDGE".into());
        assert_eq!(session.tick(TICK), None);
        assert_eq!(session.state(), ConnectionState::Terminated);
    }

    #[test]
    fn rediscovery_closes_previous_channel() {
        let mut session = connected();
        session.begin_discovery(&ChannelConfig::new("COM4")).unwrap();
        assert_eq!(session.channel().closes, 1);
        assert_eq!(session.state(), ConnectionState::Discovering);
    }
}
