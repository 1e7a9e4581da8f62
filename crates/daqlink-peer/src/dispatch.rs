//! Server-side command dispatch.
//!
//! A received name is first routed: self-contained commands concern the
//! proxy's own state and are applied without knowing which connection sent
//! them, `Quit` ends the connection, and everything else goes down the
//! generic path together with the originating connection.

use tracing::debug;

use crate::command::{Axis, Command, CommandName};
use crate::proxy::Proxy;
use crate::registry::ConnectionId;

/// Where a received command name goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SelfContained,
    Quit,
    Generic,
}

/// Route a received command name.
pub fn route(name: &str) -> Route {
    match CommandName::parse(name) {
        Some(CommandName::Quit) => Route::Quit,
        Some(
            CommandName::Done
            | CommandName::Info
            | CommandName::Infos
            | CommandName::InfoXml
            | CommandName::PositionIs
            | CommandName::MoveDone,
        ) => Route::SelfContained,
        _ => Route::Generic,
    }
}

/// Apply a self-contained command to the proxy. Returns `false` if the
/// command does not belong on this path.
pub fn apply_self_contained<P: Proxy + ?Sized>(proxy: &mut P, command: Command) -> bool {
    match command {
        Command::Done(values) => proxy.deliver_data(values),
        Command::Infos(xml) => {
            proxy.settings_mut().replace_snapshot(xml);
            proxy.settings_changed("");
        }
        Command::InfoXml { path, xml } => {
            let key = proxy.settings_mut().merge_fragment(&path, xml);
            proxy.settings_changed(&key);
        }
        Command::Info { label, value } => {
            proxy.settings_mut().set_info(label.clone(), value);
            proxy.settings_changed(&label);
        }
        Command::PositionIs(position) => proxy.update_position(position, false),
        Command::MoveDone(position) => proxy.update_position(position, true),
        other => {
            debug!(command = %other, "not a self-contained command");
            return false;
        }
    }
    true
}

/// Apply a command from the generic path. A returned command should be
/// relayed to the primary connection of the proxy's role.
pub fn apply_generic<P: Proxy + ?Sized>(
    proxy: &mut P,
    origin: ConnectionId,
    command: Command,
) -> Option<Command> {
    match command {
        Command::XAxis(info) => {
            proxy.update_axis(Axis::X, info);
            None
        }
        Command::YAxis(info) => {
            proxy.update_axis(Axis::Y, info);
            None
        }
        other => proxy.on_peer_command(origin, other),
    }
}
