use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::TcpConnection;

/// Default port used by proxy servers and clients.
pub const DEFAULT_PORT: u16 = 6341;

/// Pending connections the kernel queues before `accept`.
pub const LISTEN_BACKLOG: i32 = 1;

/// A bound, listening TCP socket.
///
/// On Unix the standard library sets `SO_REUSEADDR` before binding, so a
/// restarted server can take its port back while old connections linger in
/// `TIME_WAIT`.
pub struct TcpTransport {
    listener: TcpListener,
    local: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `host:port`.
    ///
    /// A bind failure (address in use, permission denied) is returned as
    /// [`TransportError::Bind`] and never retried here.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = resolve_ipv4(host, port)?;
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        #[cfg(unix)]
        set_backlog(&listener, LISTEN_BACKLOG).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local, backlog = LISTEN_BACKLOG, "listening on tcp socket");

        Ok(Self { listener, local })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<TcpConnection> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok(TcpConnection::from_std(stream, peer))
    }

    /// The address this socket is bound to (with the real port when bound to 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for TcpTransport {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.listener.as_raw_fd()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local", &self.local)
            .finish()
    }
}

/// `TcpListener::bind` already called `listen(2)` with the std default;
/// listening again on the same socket only updates the queue length.
#[cfg(unix)]
fn set_backlog(listener: &TcpListener, backlog: i32) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor belongs to `listener`, which outlives the call.
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    let display = format!("{host}:{port}");
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: display.clone(),
            source: e,
        })?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or(TransportError::Unresolved(display))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_bind_accept_connect() {
        let listener = TcpTransport::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().port();
        assert_ne!(port, 0);

        let handle = std::thread::spawn(move || {
            let mut client = TcpConnection::connect("127.0.0.1", port).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_small_backlog_serves_clients_in_turn() {
        let listener = TcpTransport::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().port();

        for byte in [b'a', b'b', b'c'] {
            let mut client = TcpConnection::connect("127.0.0.1", port).unwrap();
            client.write_all(&[byte]).unwrap();

            let mut server = listener.accept().unwrap();
            let mut buf = [0u8; 1];
            server.read_exact(&mut buf).unwrap();
            assert_eq!(buf[0], byte);
        }
    }

    #[test]
    fn test_bind_port_in_use() {
        let first = TcpTransport::bind("127.0.0.1", 0).unwrap();
        let port = first.local_addr().port();

        let result = TcpTransport::bind("127.0.0.1", port);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let probe = TcpTransport::bind("127.0.0.1", 0).unwrap();
            probe.local_addr().port()
        };

        let result = TcpConnection::connect("127.0.0.1", port);
        match result {
            Err(TransportError::Connect { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn test_localhost_resolves_to_ipv4() {
        let addr = resolve_ipv4("localhost", 6341).unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 6341);
    }
}
