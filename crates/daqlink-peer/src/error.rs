/// Errors that can occur in connection, session and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] daqlink_transport::TransportError),

    /// Wire codec error.
    #[error("wire error: {0}")]
    Wire(#[from] daqlink_wire::WireError),

    /// The peer broke the command protocol (bad path element, disallowed role, ...).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Operation not legal in the current session or server state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No connection is registered for the requested role, or the session is not connected.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Peer went away during the role announcement.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Role announcement did not arrive in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, PeerError>;
