//! Connections, sessions and command dispatch for daqlink.
//!
//! This is the protocol layer on top of the wire codec:
//! - [`Server`] listens, registers peers by declared role and dispatches
//!   one command per ready peer per tick into a [`Proxy`]
//! - [`ClientSession`] connects as a role, pushes its settings snapshot and
//!   hands received commands to its owner
//! - [`Command`] is the vocabulary with its bit-exact frame shapes

pub mod client;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod proxy;
pub mod registry;
pub mod role;
pub mod server;
pub mod settings;

pub use client::{
    ClientConfig, ClientEvent, ClientHandle, ClientRequest, ClientSession, SessionState,
};
pub use command::{Axis, AxisInfo, Command, CommandName, DataDim};
pub use error::{PeerError, Result};
pub use handshake::{announce_role, read_role, HandshakeConfig};
pub use proxy::{ActuatorProxy, EventPublisher, GrabberProxy, Proxy, ProxyEvent};
pub use registry::{ClientEntry, Connection, ConnectionId, ConnectionRegistry};
pub use role::{ProxyRole, ACTUATOR, GRABBER, SERVER_ROLE};
pub use server::{DuplicateRolePolicy, Server, ServerConfig, ServerEvent, ServerState};
pub use settings::ShadowSettings;
