//! TCP transport for daqlink.
//!
//! Provides the plain-TCP building blocks the protocol layers sit on:
//! - [`TcpTransport`], a bound listening socket
//! - [`TcpConnection`], one connected stream (accepted or outgoing)
//! - [`readiness`], a zero-timeout readiness check across many sockets
//!
//! This is the lowest layer of daqlink. No framing happens here.

pub mod error;
#[cfg(unix)]
pub mod readiness;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
#[cfg(unix)]
pub use readiness::{poll_readiness, Readiness};
pub use stream::TcpConnection;
pub use tcp::{TcpTransport, DEFAULT_PORT, LISTEN_BACKLOG};
