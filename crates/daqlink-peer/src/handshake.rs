use std::io::{Read, Write};
use std::time::Duration;

use daqlink_wire::{WireError, WireReader, WireWriter};

use crate::error::{PeerError, Result};

const DEFAULT_MAX_ROLE_LEN: usize = 256;

/// Limits applied while a new peer announces its role.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long the server waits for the role frame.
    pub timeout: Duration,
    /// Longest role string accepted, in bytes.
    pub max_role_len: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_role_len: DEFAULT_MAX_ROLE_LEN,
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client side: declare the role as the first frame on a fresh connection.
pub fn announce_role<W: Write>(writer: &mut WireWriter<W>, role: &str) -> Result<()> {
    validate_role(role, DEFAULT_MAX_ROLE_LEN)?;
    writer.send_string(role)?;
    Ok(())
}

/// Server side: read the role frame of a freshly accepted connection.
///
/// The caller is expected to have set the socket read timeout to
/// `config.timeout`. The payload budget is tightened to `max_role_len`
/// for this one frame and restored afterwards.
pub fn read_role<R: Read>(reader: &mut WireReader<R>, config: &HandshakeConfig) -> Result<String> {
    let runtime_max = reader.config().max_payload_size;
    reader.set_max_payload_size(config.max_role_len);
    let result = reader.recv_string();
    reader.set_max_payload_size(runtime_max);

    let role = match result {
        Ok(role) => role,
        Err(WireError::Timeout) => return Err(PeerError::Timeout(config.timeout)),
        Err(WireError::ConnectionClosed) => {
            return Err(PeerError::Disconnected(
                "connection closed before role announcement".to_string(),
            ));
        }
        Err(err) => return Err(PeerError::Wire(err)),
    };

    validate_role(&role, config.max_role_len)?;
    Ok(role)
}

fn validate_role(role: &str, max_len: usize) -> Result<()> {
    if role.is_empty() || role.len() > max_len {
        return Err(PeerError::Protocol(format!(
            "invalid role length: {}",
            role.len()
        )));
    }
    if role.chars().any(char::is_control) {
        return Err(PeerError::Protocol(
            "role contains control characters".to_string(),
        ));
    }
    Ok(())
}
