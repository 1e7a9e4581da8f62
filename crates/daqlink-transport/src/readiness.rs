//! Zero-timeout readiness checks over many sockets at once.
//!
//! This is the `select()` step of a cooperative poll loop: it reports which
//! sockets have bytes (or a pending connection) waiting and which are in an
//! error state, without reading anything.

use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// Readiness of one socket after a poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Data is waiting (or, for a listener, a connection is pending).
    pub readable: bool,
    /// The socket is in error, or hung up with nothing left to read.
    pub error: bool,
}

impl Readiness {
    /// True if the socket needs attention this tick.
    pub fn is_ready(&self) -> bool {
        self.readable || self.error
    }

    fn from_revents(revents: libc::c_short) -> Self {
        let readable = revents & libc::POLLIN != 0;
        let hung_up = revents & libc::POLLHUP != 0;
        let error = revents & (libc::POLLERR | libc::POLLNVAL) != 0 || (hung_up && !readable);
        Self { readable, error }
    }
}

/// Poll `fds` for readability and error conditions.
///
/// A zero `timeout` never blocks. The result has one entry per input
/// descriptor, in the same order.
pub fn poll_readiness(fds: &[RawFd], timeout: Duration) -> Result<Vec<Readiness>> {
    if fds.is_empty() {
        return Ok(Vec::new());
    }

    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    loop {
        // SAFETY: `pollfds` is a valid, exclusively borrowed array of
        // `pollfds.len()` initialized `pollfd` structs for the duration of the call.
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if rc >= 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(TransportError::Poll(err));
        }
    }

    Ok(pollfds
        .iter()
        .map(|pfd| Readiness::from_revents(pfd.revents))
        .collect())
}
