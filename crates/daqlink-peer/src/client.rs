//! Client side of a connection: the real driver talking to a proxy server.
//!
//! A session connects, announces its role, pushes its settings snapshot and
//! then polls for commands. Replies go out through [`ClientSession::request`]
//! or, from other threads and callbacks, through a [`ClientHandle`].

use std::collections::VecDeque;
use std::fmt;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use daqlink_transport::{poll_readiness, Readiness, TcpConnection, DEFAULT_PORT};
use daqlink_wire::{Scalar, WireConfig, WireReader, WireValue, WireWriter};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{AxisInfo, Command};
use crate::error::{PeerError, Result};
use crate::handshake::announce_role;
use crate::role::GRABBER;

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host. Default: `localhost`.
    pub host: String,
    /// Server port. Default: 6341.
    pub port: u16,
    /// Role announced on connect. Default: `GRABBER`.
    pub role: String,
    /// Settings snapshot sent as `Infos` right after the role.
    pub settings_xml: String,
    /// Commands written after the snapshot, before the session starts listening.
    pub bootstrap: Vec<Command>,
    /// Sleep between poll ticks in [`ClientSession::run`]. Default: 10 ms.
    pub poll_interval: Duration,
    pub wire: WireConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            role: GRABBER.to_string(),
            settings_xml: String::new(),
            bootstrap: Vec::new(),
            poll_interval: Duration::from_millis(10),
            wire: WireConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_settings_xml(mut self, xml: impl Into<String>) -> Self {
        self.settings_xml = xml.into();
        self
    }

    pub fn with_bootstrap(mut self, command: Command) -> Self {
        self.bootstrap.push(command);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wire_config(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Announced,
    Listening,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Announced => "announced",
            SessionState::Listening => "listening",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Something the owner wants the session to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    PositionIs(Scalar),
    MoveDone(Scalar),
    XAxis(AxisInfo),
    YAxis(AxisInfo),
    /// One setting changed locally; sent as `Info_xml`.
    SendInfo { path: Vec<String>, xml: String },
    /// One acquisition; sent as `Done`.
    DataReady(Vec<WireValue>),
    /// Sent as `Info`.
    InfoString { label: String, value: String },
    /// Change the server address. Only legal before connecting.
    UpdateConnection { host: String, port: u16 },
    Quit,
}

impl ClientRequest {
    /// The command this request puts on the wire, if any.
    pub fn into_command(self) -> Option<Command> {
        let command = match self {
            ClientRequest::PositionIs(position) => Command::PositionIs(position),
            ClientRequest::MoveDone(position) => Command::MoveDone(position),
            ClientRequest::XAxis(info) => Command::XAxis(info),
            ClientRequest::YAxis(info) => Command::YAxis(info),
            ClientRequest::SendInfo { path, xml } => Command::InfoXml { path, xml },
            ClientRequest::DataReady(values) => Command::Done(values),
            ClientRequest::InfoString { label, value } => Command::Info { label, value },
            ClientRequest::Quit => Command::Quit,
            ClientRequest::UpdateConnection { .. } => return None,
        };
        Some(command)
    }
}

/// Notification for the session's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Status(String),
    /// A command received from the server.
    Command(Command),
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connected => f.write_str("connected"),
            ClientEvent::Disconnected => f.write_str("disconnected"),
            ClientEvent::Status(message) => f.write_str(message),
            ClientEvent::Command(command) => write!(f, "received {command}"),
        }
    }
}

/// Cloneable sender of requests into a session. Requests are picked up on
/// the session's next poll tick.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: Sender<ClientRequest>,
}

impl ClientHandle {
    pub fn send(&self, request: ClientRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| PeerError::Disconnected("client session dropped".to_string()))
    }
}

struct Link {
    reader: WireReader<TcpConnection>,
    writer: WireWriter<TcpConnection>,
}

/// One outgoing connection and its state machine.
pub struct ClientSession {
    config: ClientConfig,
    state: SessionState,
    link: Option<Link>,
    tx: Sender<ClientRequest>,
    rx: Receiver<ClientRequest>,
    pending: VecDeque<ClientEvent>,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            state: SessionState::Idle,
            link: None,
            tx,
            rx,
            pending: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect, announce the role, send the settings snapshot and the
    /// bootstrap commands.
    ///
    /// A refused connection moves the session to `Closed` and queues
    /// `Disconnected` plus a status line before returning the error.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(PeerError::InvalidState(format!(
                "cannot connect from state {}",
                self.state
            )));
        }
        self.state = SessionState::Connecting;
        let (host, port) = (self.config.host.clone(), self.config.port);
        debug!(%host, port, role = %self.config.role, "connecting");

        let conn = match TcpConnection::connect(&host, port) {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%host, port, error = %err, "connection failed");
                self.state = SessionState::Closed;
                self.pending.push_back(ClientEvent::Disconnected);
                self.pending
                    .push_back(ClientEvent::Status(format!("connection failed: {err}")));
                return Err(err.into());
            }
        };

        if let Err(err) = self.announce(conn) {
            self.fail(&err.to_string());
            return Err(err);
        }

        self.state = SessionState::Announced;
        info!(%host, port, role = %self.config.role, "connected");
        self.pending.push_back(ClientEvent::Connected);
        self.pending
            .push_back(ClientEvent::Status(format!("connected to {host}:{port}")));
        Ok(())
    }

    fn announce(&mut self, conn: TcpConnection) -> Result<()> {
        let reader = WireReader::with_config_tcp(conn.try_clone()?, self.config.wire.clone())?;
        let mut writer = WireWriter::with_config_tcp(conn, self.config.wire.clone())?;

        announce_role(&mut writer, &self.config.role)?;
        Command::Infos(self.config.settings_xml.clone()).write_to(&mut writer)?;
        for command in &self.config.bootstrap {
            command.write_to(&mut writer)?;
        }
        self.link = Some(Link { reader, writer });
        Ok(())
    }

    /// Carry out one request synchronously.
    pub fn request(&mut self, request: ClientRequest) -> Result<()> {
        match request {
            ClientRequest::UpdateConnection { host, port } => {
                if self.state != SessionState::Idle {
                    return Err(PeerError::InvalidState(format!(
                        "cannot change the address while {}",
                        self.state
                    )));
                }
                debug!(%host, port, "connection address updated");
                self.config.host = host;
                self.config.port = port;
                Ok(())
            }
            ClientRequest::Quit => {
                self.quit();
                Ok(())
            }
            other => {
                let Some(command) = other.into_command() else {
                    return Ok(());
                };
                self.send(&command)
            }
        }
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        let link = match (&self.state, self.link.as_mut()) {
            (SessionState::Announced | SessionState::Listening, Some(link)) => link,
            _ => return Err(PeerError::NotConnected(self.config.role.clone())),
        };
        match command.write_to(&mut link.writer) {
            Ok(()) => {
                debug!(command = %command, "command sent");
                Ok(())
            }
            Err(err @ daqlink_wire::WireError::Type { .. }) => Err(err.into()),
            Err(err) => {
                self.fail(&err.to_string());
                Err(err.into())
            }
        }
    }

    /// Send `Quit` if connected, then close. Idempotent.
    pub fn quit(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(err) = Command::Quit.write_to(&mut link.writer) {
                debug!(error = %err, "quit not delivered");
            }
            link.writer.get_ref().close();
            info!(role = %self.config.role, "session closed");
            self.pending.push_back(ClientEvent::Disconnected);
        }
        self.state = SessionState::Closed;
    }

    /// One tick: drain the handle, then read at most one command.
    pub fn poll_once(&mut self) -> Result<Vec<ClientEvent>> {
        self.drain_requests();
        if self.state == SessionState::Announced {
            self.state = SessionState::Listening;
        }
        if self.state == SessionState::Listening {
            self.read_one();
        }
        Ok(self.take_events())
    }

    fn drain_requests(&mut self) {
        while let Ok(request) = self.rx.try_recv() {
            if let Err(err) = self.request(request) {
                warn!(error = %err, "request failed");
                self.pending.push_back(ClientEvent::Status(err.to_string()));
            }
        }
    }

    fn read_one(&mut self) {
        let Some(fd) = self.link.as_ref().map(|link| link.reader.get_ref().as_raw_fd()) else {
            return;
        };
        if !self.command_waiting(poll_readiness(&[fd], Duration::ZERO)) {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        match Command::read(&mut link.reader) {
            Ok(command) => {
                debug!(command = %command, "command received");
                let ends_session = matches!(command, Command::Quit | Command::ServerClosed);
                self.pending.push_back(ClientEvent::Command(command));
                if ends_session {
                    self.quit();
                }
            }
            Err(err) => self.fail(&err.to_string()),
        }
    }

    /// Whether a command is waiting on the socket. A failed poll or a socket
    /// in error ends the session.
    fn command_waiting(&mut self, polled: daqlink_transport::Result<Vec<Readiness>>) -> bool {
        match polled.map(|ready| ready.first().copied().unwrap_or_default()) {
            Ok(ready) if ready.error => {
                self.fail("socket error");
                false
            }
            Ok(ready) => ready.readable,
            Err(err) => {
                self.fail(&err.to_string());
                false
            }
        }
    }

    /// Poll every `poll_interval` until `running` is cleared or the session
    /// closes. Requests still queued on the handle are sent before quitting.
    pub fn run(
        &mut self,
        running: &AtomicBool,
        mut on_event: impl FnMut(&ClientEvent),
    ) -> Result<()> {
        self.take_events().iter().for_each(&mut on_event);
        while running.load(Ordering::SeqCst) && self.state != SessionState::Closed {
            self.poll_once()?.iter().for_each(&mut on_event);
            std::thread::sleep(self.config.poll_interval);
        }
        self.drain_requests();
        self.quit();
        self.take_events().iter().for_each(&mut on_event);
        Ok(())
    }

    /// Events queued outside a poll tick, e.g. by [`ClientSession::connect`].
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        self.pending.drain(..).collect()
    }

    /// Tear the link down after a transport or framing error.
    fn fail(&mut self, reason: &str) {
        warn!(role = %self.config.role, %reason, "session failed");
        self.quit();
        if self.pending.back() != Some(&ClientEvent::Disconnected) {
            self.pending.push_back(ClientEvent::Disconnected);
        }
        self.pending.push_back(ClientEvent::Status(reason.to_string()));
    }
}
