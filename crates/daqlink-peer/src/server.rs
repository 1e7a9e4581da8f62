use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use daqlink_transport::{poll_readiness, TcpConnection, TcpTransport, DEFAULT_PORT};
use daqlink_wire::{WireConfig, WireReader, WireWriter};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::dispatch::{self, Route};
use crate::error::{PeerError, Result};
use crate::handshake::{read_role, HandshakeConfig};
use crate::proxy::Proxy;
use crate::registry::{ClientEntry, ConnectionId, ConnectionRegistry};

/// Longest a peer may take to finish a frame it has started. A stalled peer
/// is dropped after this instead of blocking the whole poll tick.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when a second peer announces a role that is already connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateRolePolicy {
    /// Close the newcomer; the existing connection stays.
    #[default]
    Reject,
    /// Close the existing connection and register the newcomer.
    Replace,
}

impl FromStr for DuplicateRolePolicy {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(DuplicateRolePolicy::Reject),
            "replace" => Ok(DuplicateRolePolicy::Replace),
            other => Err(PeerError::Protocol(format!(
                "unknown duplicate-role policy {other:?}"
            ))),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or IPv4 address to bind. Default: `localhost`.
    pub bind_addr: String,
    /// TCP port. Default: 6341. `0` picks a free port.
    pub port: u16,
    /// Sleep between poll ticks in [`Server::run`]. Default: 100 ms.
    pub tick: Duration,
    /// How long a new peer may take to announce its role. Default: 5 s.
    pub handshake_timeout: Duration,
    pub duplicate_roles: DuplicateRolePolicy,
    /// Roles accepted besides the proxy's own.
    pub extra_roles: Vec<String>,
    /// Per-peer stream settings. The read and write timeouts bound every
    /// frame after the handshake. Default: [`DEFAULT_FRAME_TIMEOUT`] for both.
    pub wire: WireConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "localhost".to_string(),
            port: DEFAULT_PORT,
            tick: Duration::from_millis(100),
            handshake_timeout: HandshakeConfig::default().timeout,
            duplicate_roles: DuplicateRolePolicy::default(),
            extra_roles: Vec::new(),
            wire: WireConfig {
                read_timeout: Some(DEFAULT_FRAME_TIMEOUT),
                write_timeout: Some(DEFAULT_FRAME_TIMEOUT),
                ..WireConfig::default()
            },
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_duplicate_roles(mut self, policy: DuplicateRolePolicy) -> Self {
        self.duplicate_roles = policy;
        self
    }

    pub fn with_extra_role(mut self, role: impl Into<String>) -> Self {
        self.extra_roles.push(role.into());
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.wire.read_timeout = Some(timeout);
        self.wire.write_timeout = Some(timeout);
        self
    }

    pub fn with_wire_config(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }
}

/// Notification for the server's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Listening {
        address: String,
    },
    ClientConnected {
        id: ConnectionId,
        role: String,
        address: String,
    },
    ClientRejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        address: String,
        reason: String,
    },
    ClientDisconnected {
        id: ConnectionId,
        role: String,
        address: String,
        reason: String,
    },
    CommandDispatched {
        id: ConnectionId,
        role: String,
        command: String,
    },
    /// Received but outside the proxy's allow-list.
    CommandIgnored {
        id: ConnectionId,
        role: String,
        command: String,
    },
    CommandRelayed {
        from: ConnectionId,
        to: ConnectionId,
        command: String,
    },
    ServerClosed,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Listening { address } => write!(f, "listening on {address}"),
            ServerEvent::ClientConnected { role, address, .. } => {
                write!(f, "{role} connected with {address}")
            }
            ServerEvent::ClientRejected {
                role,
                address,
                reason,
            } => match role {
                Some(role) => write!(f, "{role} from {address} rejected: {reason}"),
                None => write!(f, "connection from {address} rejected: {reason}"),
            },
            ServerEvent::ClientDisconnected { role, reason, .. } => {
                write!(f, "client {role} disconnected ({reason})")
            }
            ServerEvent::CommandDispatched { role, command, .. } => {
                write!(f, "{command} from {role}")
            }
            ServerEvent::CommandIgnored { role, command, .. } => {
                write!(f, "{command} from {role} ignored: not in the allow-list")
            }
            ServerEvent::CommandRelayed { from, to, command } => {
                write!(f, "{command} relayed from {from} to {to}")
            }
            ServerEvent::ServerClosed => f.write_str("server closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Listening,
    Closed,
}

/// A listening server standing in for one proxy.
///
/// All state is owned here and mutated only by [`Server::poll_once`] and the
/// outbound calls, all on the owner's thread.
pub struct Server<P> {
    transport: Option<TcpTransport>,
    registry: ConnectionRegistry,
    proxy: P,
    config: ServerConfig,
    accepted_roles: Vec<String>,
    pending: VecDeque<ServerEvent>,
}

impl<P: Proxy> Server<P> {
    /// Bind and start listening. A bind failure is returned as is, never retried.
    pub fn bind(config: ServerConfig, proxy: P) -> Result<Self> {
        let transport = TcpTransport::bind(&config.bind_addr, config.port)?;
        let local = transport.local_addr();

        let mut accepted_roles = vec![proxy.role().as_str().to_string()];
        for role in &config.extra_roles {
            if !accepted_roles.contains(role) {
                accepted_roles.push(role.clone());
            }
        }

        let mut pending = VecDeque::new();
        pending.push_back(ServerEvent::Listening {
            address: local.to_string(),
        });

        Ok(Self {
            transport: Some(transport),
            registry: ConnectionRegistry::new(local),
            proxy,
            config,
            accepted_roles,
            pending,
        })
    }

    /// One tick: a zero-timeout readiness check over the listener and every
    /// peer, then at most one accept and one command per ready peer.
    pub fn poll_once(&mut self) -> Result<Vec<ServerEvent>> {
        let listener_fd = match &self.transport {
            Some(transport) => transport.as_raw_fd(),
            None => return Err(PeerError::InvalidState("server is closed".to_string())),
        };

        let peers: Vec<ConnectionId> = self.registry.ids();
        let mut fds = Vec::with_capacity(peers.len() + 1);
        fds.push(listener_fd);
        fds.extend(self.registry.iter().map(|conn| conn.raw_fd()));

        let readiness = poll_readiness(&fds, Duration::ZERO)?;
        let listener = readiness[0];
        let peer_readiness: Vec<_> = peers
            .into_iter()
            .zip(readiness[1..].iter().copied())
            .collect();

        for (id, ready) in &peer_readiness {
            if ready.error {
                self.disconnect(*id, "socket error");
            }
        }

        if listener.error {
            warn!("listening socket reported an error");
        } else if listener.readable {
            self.accept_peer();
        }

        for (id, ready) in peer_readiness {
            if ready.readable && !ready.error && self.registry.contains(id) {
                if let Err(err) = self.serve_peer(id) {
                    self.disconnect(id, &err.to_string());
                }
            }
        }

        Ok(self.pending.drain(..).collect())
    }

    /// Poll every `tick` until `running` is cleared, then close.
    pub fn run(
        &mut self,
        running: &AtomicBool,
        mut on_event: impl FnMut(&ServerEvent),
    ) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(events) => events.iter().for_each(&mut on_event),
                Err(err) => {
                    self.close().iter().for_each(&mut on_event);
                    return Err(err);
                }
            }
            std::thread::sleep(self.config.tick);
        }
        self.close().iter().for_each(&mut on_event);
        Ok(())
    }

    /// Send a command to the connection holding `role`.
    ///
    /// Commands outside the proxy's allow-list are logged and dropped:
    /// the return value is `false` and nothing is written.
    pub fn send_command(&mut self, role: &str, command: &Command) -> Result<bool> {
        self.ensure_listening()?;
        if !self.proxy.accepts(command.name()) {
            warn!(%role, command = %command, "command not in the allow-list, not sent");
            return Ok(false);
        }
        let id = self
            .registry
            .find_by_role(role)
            .ok_or_else(|| PeerError::NotConnected(role.to_string()))?;
        self.write_command(id, command)?;
        self.proxy.on_command_sent(command);
        Ok(true)
    }

    /// Push one setting (`set_info`) to the proxy's own client.
    pub fn push_setting(&mut self, path: Vec<String>, xml: impl Into<String>) -> Result<bool> {
        let role = self.proxy.role().as_str();
        self.send_command(
            role,
            &Command::SetInfo {
                path,
                xml: xml.into(),
            },
        )
    }

    /// Close every connection and the listening socket. Idempotent.
    pub fn close(&mut self) -> Vec<ServerEvent> {
        if self.transport.take().is_some() {
            for conn in self.registry.drain() {
                self.pending.push_back(ServerEvent::ClientDisconnected {
                    id: conn.id(),
                    role: conn.role().to_string(),
                    address: conn.addr().to_string(),
                    reason: "server closed".to_string(),
                });
            }
            info!(addr = %self.registry.listener_addr(), "server closed");
            self.pending.push_back(ServerEvent::ServerClosed);
        }
        self.pending.drain(..).collect()
    }

    /// Role → address table, listener first.
    pub fn connected_clients(&self) -> Vec<ClientEntry> {
        if self.transport.is_none() {
            return Vec::new();
        }
        self.registry.table()
    }

    pub fn state(&self) -> ServerState {
        if self.transport.is_some() {
            ServerState::Listening
        } else {
            ServerState::Closed
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.registry.listener_addr()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    pub fn proxy_mut(&mut self) -> &mut P {
        &mut self.proxy
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn ensure_listening(&self) -> Result<()> {
        if self.transport.is_none() {
            return Err(PeerError::InvalidState("server is closed".to_string()));
        }
        Ok(())
    }

    fn accept_peer(&mut self) {
        let Some(transport) = &self.transport else {
            return;
        };
        let conn = match transport.accept() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "accept failed");
                return;
            }
        };
        let addr = conn.peer_addr();

        let (role, reader, writer) = match self.admit(conn) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(%addr, error = %err, "role announcement failed");
                self.pending.push_back(ServerEvent::ClientRejected {
                    role: None,
                    address: addr.to_string(),
                    reason: err.to_string(),
                });
                return;
            }
        };

        if !self.accepted_roles.contains(&role) {
            warn!(%addr, %role, "not a valid role, closing");
            writer.get_ref().close();
            self.pending.push_back(ServerEvent::ClientRejected {
                role: Some(role),
                address: addr.to_string(),
                reason: "role not allowed".to_string(),
            });
            return;
        }

        if let Some(existing) = self.registry.find_by_role(&role) {
            match self.config.duplicate_roles {
                DuplicateRolePolicy::Reject => {
                    warn!(%addr, %role, "role already connected, closing newcomer");
                    writer.get_ref().close();
                    self.pending.push_back(ServerEvent::ClientRejected {
                        role: Some(role),
                        address: addr.to_string(),
                        reason: "role already connected".to_string(),
                    });
                    return;
                }
                DuplicateRolePolicy::Replace => {
                    self.disconnect(existing, "replaced by a new connection");
                }
            }
        }

        let id = self.registry.insert(role.clone(), addr, reader, writer);
        self.pending.push_back(ServerEvent::ClientConnected {
            id,
            role,
            address: addr.to_string(),
        });
    }

    /// Read the role of a fresh connection under the handshake timeout, then
    /// switch the streams to runtime settings.
    fn admit(
        &self,
        conn: TcpConnection,
    ) -> Result<(String, WireReader<TcpConnection>, WireWriter<TcpConnection>)> {
        let handshake = HandshakeConfig::default().with_timeout(self.config.handshake_timeout);
        let reader_stream = conn.try_clone()?;
        let handshake_wire = WireConfig {
            read_timeout: Some(handshake.timeout),
            ..self.config.wire.clone()
        };

        let mut reader = WireReader::with_config_tcp(reader_stream, handshake_wire)?;
        let writer = WireWriter::with_config_tcp(conn, self.config.wire.clone())?;
        let role = read_role(&mut reader, &handshake)?;

        reader
            .get_ref()
            .set_read_timeout(self.config.wire.read_timeout)?;
        Ok((role, reader, writer))
    }

    fn serve_peer(&mut self, id: ConnectionId) -> Result<()> {
        let conn = self
            .registry
            .get_mut(id)
            .ok_or_else(|| PeerError::NotConnected(id.to_string()))?;
        let role = conn.role().to_string();
        let name = conn.reader.recv_string()?;
        debug!(%id, %role, command = %name, "command received");

        let route = dispatch::route(&name);
        if route == Route::Quit {
            self.disconnect(id, "quit");
            return Ok(());
        }

        // The body is read even for ignored commands so the stream stays framed.
        let command = Command::read_body(&name, &mut conn.reader)?;
        if !self.proxy.accepts(&name) {
            warn!(%id, %role, command = %name, "command not in the allow-list, ignored");
            self.pending.push_back(ServerEvent::CommandIgnored {
                id,
                role,
                command: name,
            });
            return Ok(());
        }

        self.pending.push_back(ServerEvent::CommandDispatched {
            id,
            role,
            command: name,
        });
        match route {
            Route::SelfContained => {
                dispatch::apply_self_contained(&mut self.proxy, command);
            }
            Route::Generic => {
                if let Some(relay) = dispatch::apply_generic(&mut self.proxy, id, command) {
                    self.relay(id, &relay)?;
                }
            }
            Route::Quit => {}
        }
        Ok(())
    }

    /// Forward `command` to the primary connection of the proxy's role,
    /// unless that is where it came from.
    fn relay(&mut self, origin: ConnectionId, command: &Command) -> Result<()> {
        let role = self.proxy.role().as_str();
        match self.registry.find_by_role(role) {
            Some(target) if target != origin => {
                self.write_command(target, command)?;
                self.proxy.on_command_sent(command);
                self.pending.push_back(ServerEvent::CommandRelayed {
                    from: origin,
                    to: target,
                    command: command.name().to_string(),
                });
            }
            _ => debug!(%origin, command = %command, "no other connection to relay to"),
        }
        Ok(())
    }

    /// Write to one connection; a write failure removes that connection.
    fn write_command(&mut self, id: ConnectionId, command: &Command) -> Result<()> {
        let conn = self
            .registry
            .get_mut(id)
            .ok_or_else(|| PeerError::NotConnected(id.to_string()))?;
        if let Err(err) = command.write_to(&mut conn.writer) {
            if matches!(err, daqlink_wire::WireError::Type { .. }) {
                return Err(err.into());
            }
            self.disconnect(id, &err.to_string());
            return Err(err.into());
        }
        debug!(%id, command = %command, "command sent");
        Ok(())
    }

    fn disconnect(&mut self, id: ConnectionId, reason: &str) {
        if let Some(conn) = self.registry.remove(id) {
            self.pending.push_back(ServerEvent::ClientDisconnected {
                id,
                role: conn.role().to_string(),
                address: conn.addr().to_string(),
                reason: reason.to_string(),
            });
        }
    }
}
