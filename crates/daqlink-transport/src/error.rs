/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The readiness check itself failed.
    #[error("readiness poll failed: {0}")]
    Poll(std::io::Error),

    /// The address resolved to nothing usable.
    #[error("address {0} did not resolve to an IPv4 endpoint")]
    Unresolved(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
