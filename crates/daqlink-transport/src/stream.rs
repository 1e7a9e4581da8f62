use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected TCP stream implementing `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations, for
/// both sides: streams accepted by a [`crate::TcpTransport`] and streams
/// opened with [`TcpConnection::connect`].
pub struct TcpConnection {
    inner: TcpStream,
    peer: SocketAddr,
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl TcpConnection {
    pub(crate) fn from_std(inner: TcpStream, peer: SocketAddr) -> Self {
        Self { inner, peer }
    }

    /// Connect to a listening server (blocking).
    ///
    /// `host` may be a name or a dotted address; the first IPv4 endpoint it
    /// resolves to is used.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = crate::tcp::resolve_ipv4(host, port)?;
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        // Small command frames; disable Nagle.
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to server");
        Ok(Self::from_std(stream, addr))
    }

    /// Remote address of this connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of this connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self::from_std(cloned, self.peer))
    }

    /// Shut down both halves of the connection.
    ///
    /// Errors are ignored: the socket may already be gone on the peer side.
    pub fn close(&self) {
        if let Err(err) = self.inner.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, error = %err, "shutdown on already closed socket");
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for TcpConnection {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.inner.as_raw_fd()
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .finish()
    }
}
