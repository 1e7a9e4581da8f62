use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use daqlink_transport::TcpConnection;
use daqlink_wire::{WireReader, WireWriter};
use serde::Serialize;
use tracing::info;

use crate::role::SERVER_ROLE;

/// Opaque handle for one registered peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One accepted socket tagged with the role its peer declared.
pub struct Connection {
    id: ConnectionId,
    role: String,
    addr: SocketAddr,
    pub(crate) reader: WireReader<TcpConnection>,
    pub(crate) writer: WireWriter<TcpConnection>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Remote address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }

    fn close(&self) {
        self.writer.get_ref().close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("addr", &self.addr)
            .finish()
    }
}

/// One row of the connected-clients table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEntry {
    pub role: String,
    pub address: String,
    /// `None` for the listening socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
}

/// The listening socket plus every registered peer, in registration order.
#[derive(Debug)]
pub struct ConnectionRegistry {
    listener_addr: SocketAddr,
    peers: Vec<Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new(listener_addr: SocketAddr) -> Self {
        Self {
            listener_addr,
            peers: Vec::new(),
            next_id: 1,
        }
    }

    /// Register a peer and hand back its id.
    pub fn insert(
        &mut self,
        role: impl Into<String>,
        addr: SocketAddr,
        reader: WireReader<TcpConnection>,
        writer: WireWriter<TcpConnection>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let role = role.into();
        info!(%id, %role, %addr, "client registered");
        self.peers.push(Connection {
            id,
            role,
            addr,
            reader,
            writer,
        });
        id
    }

    /// Unregister and close a peer.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let pos = self.peers.iter().position(|c| c.id == id)?;
        let conn = self.peers.remove(pos);
        conn.close();
        info!(%id, role = %conn.role, addr = %conn.addr, "client removed");
        Some(conn)
    }

    /// Close and drop every peer, returning them in registration order.
    pub fn drain(&mut self) -> Vec<Connection> {
        let peers = std::mem::take(&mut self.peers);
        for conn in &peers {
            conn.close();
        }
        peers
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.peers.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.peers.iter_mut().find(|c| c.id == id)
    }

    /// The connection addressed for `role`. Roles are unique per
    /// connection, so this is the only one.
    pub fn find_by_role(&self, role: &str) -> Option<ConnectionId> {
        self.peers.iter().find(|c| c.role == role).map(|c| c.id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.peers.iter().map(|c| c.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.peers.iter()
    }

    /// Number of peers, not counting the listening socket.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn listener_addr(&self) -> SocketAddr {
        self.listener_addr
    }

    /// Role → address table: the listening socket first, then peers in
    /// registration order.
    pub fn table(&self) -> Vec<ClientEntry> {
        let mut rows = Vec::with_capacity(self.peers.len() + 1);
        rows.push(ClientEntry {
            role: SERVER_ROLE.to_string(),
            address: self.listener_addr.to_string(),
            id: None,
        });
        rows.extend(self.peers.iter().map(|c| ClientEntry {
            role: c.role.clone(),
            address: c.addr.to_string(),
            id: Some(c.id),
        }));
        rows
    }
}

#[cfg(test)]
mod tests {
    use daqlink_transport::TcpTransport;

    use super::*;

    struct Pair {
        _client: TcpConnection,
        server: TcpConnection,
    }

    fn pair(listener: &TcpTransport) -> Pair {
        let port = listener.local_addr().port();
        let client = TcpConnection::connect("127.0.0.1", port).expect("client should connect");
        let server = listener.accept().expect("listener should accept");
        Pair {
            _client: client,
            server,
        }
    }

    fn register(
        registry: &mut ConnectionRegistry,
        role: &str,
        conn: TcpConnection,
    ) -> ConnectionId {
        let addr = conn.peer_addr();
        let reader = WireReader::new(conn.try_clone().expect("clone"));
        let writer = WireWriter::new(conn);
        registry.insert(role, addr, reader, writer)
    }

    #[test]
    fn table_lists_listener_first() {
        let listener = TcpTransport::bind("127.0.0.1", 0).expect("bind");
        let mut registry = ConnectionRegistry::new(listener.local_addr());
        let a = pair(&listener);
        let b = pair(&listener);
        let addr_a = a.server.peer_addr();

        let id_a = register(&mut registry, "GRABBER", a.server);
        let id_b = register(&mut registry, "ACTUATOR", b.server);
        assert_ne!(id_a, id_b);

        let table = registry.table();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].role, SERVER_ROLE);
        assert_eq!(table[0].address, listener.local_addr().to_string());
        assert_eq!(table[1].role, "GRABBER");
        assert_eq!(table[1].address, addr_a.to_string());
        assert_eq!(table[2].id, Some(id_b));
        drop(a._client);
        drop(b._client);
    }

    #[test]
    fn remove_leaves_others() {
        let listener = TcpTransport::bind("127.0.0.1", 0).expect("bind");
        let mut registry = ConnectionRegistry::new(listener.local_addr());
        let a = pair(&listener);
        let b = pair(&listener);

        let id_a = register(&mut registry, "GRABBER", a.server);
        let id_b = register(&mut registry, "ACTUATOR", b.server);

        assert!(registry.remove(id_a).is_some());
        assert!(registry.remove(id_a).is_none());
        assert_eq!(registry.ids(), vec![id_b]);
        assert_eq!(registry.find_by_role("ACTUATOR"), Some(id_b));
        assert_eq!(registry.find_by_role("GRABBER"), None);
        drop((a._client, b._client));
    }

    #[test]
    fn ids_are_not_reused() {
        let listener = TcpTransport::bind("127.0.0.1", 0).expect("bind");
        let mut registry = ConnectionRegistry::new(listener.local_addr());
        let a = pair(&listener);
        let id_a = register(&mut registry, "GRABBER", a.server);
        registry.remove(id_a);

        let b = pair(&listener);
        let id_b = register(&mut registry, "GRABBER", b.server);
        assert!(id_b > id_a);
        assert_eq!(id_b.to_string(), format!("conn-{}", id_b.get()));
        drop((a._client, b._client));
    }
}
