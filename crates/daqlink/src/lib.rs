//! TCP transport and command dispatch for distributed data-acquisition modules.
//!
//! A proxy detector or actuator runs a [`peer::Server`]; the real hardware
//! driver connects to it as a [`peer::ClientSession`] and the two exchange
//! typed values and a small command vocabulary over plain TCP.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener, connections and readiness polling
//! - [`wire`]: length-prefixed codec for ints, strings, scalars, arrays and lists
//! - [`peer`]: sessions, server, connection registry and dispatch (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use daqlink_transport::*;
}

/// Re-export wire codec types.
pub mod wire {
    pub use daqlink_wire::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use daqlink_peer::*;
}
