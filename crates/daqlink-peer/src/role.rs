use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::command::CommandName;
use crate::error::PeerError;

/// Role recorded for the listening socket in the connected-clients table.
pub const SERVER_ROLE: &str = "server";
/// Role announced by detector clients.
pub const GRABBER: &str = "GRABBER";
/// Role announced by actuator clients.
pub const ACTUATOR: &str = "ACTUATOR";

const GRABBER_COMMANDS: &[CommandName] = &[
    CommandName::Quit,
    CommandName::SendData0D,
    CommandName::SendData1D,
    CommandName::SendData2D,
    CommandName::SendDataND,
    CommandName::Status,
    CommandName::Done,
    CommandName::ServerClosed,
    CommandName::Info,
    CommandName::Infos,
    CommandName::InfoXml,
    CommandName::XAxis,
    CommandName::YAxis,
    CommandName::SetInfo,
];

const ACTUATOR_COMMANDS: &[CommandName] = &[
    CommandName::Quit,
    CommandName::Status,
    CommandName::Done,
    CommandName::ServerClosed,
    CommandName::Info,
    CommandName::Infos,
    CommandName::InfoXml,
    CommandName::MoveAbs,
    CommandName::MoveHome,
    CommandName::MoveRel,
    CommandName::GetActuatorValue,
    CommandName::StopMotion,
    CommandName::PositionIs,
    CommandName::MoveDone,
    CommandName::SetInfo,
];

/// The kind of module a server stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyRole {
    Grabber,
    Actuator,
}

impl ProxyRole {
    /// Role string announced by clients of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyRole::Grabber => GRABBER,
            ProxyRole::Actuator => ACTUATOR,
        }
    }

    /// Command names this role may exchange.
    pub fn allowed_commands(self) -> &'static [CommandName] {
        match self {
            ProxyRole::Grabber => GRABBER_COMMANDS,
            ProxyRole::Actuator => ACTUATOR_COMMANDS,
        }
    }

    /// Whether `name` is in this role's allow-list. Unknown names never are.
    pub fn allows(self, name: &str) -> bool {
        CommandName::parse(name).is_some_and(|cmd| self.allowed_commands().contains(&cmd))
    }
}

impl fmt::Display for ProxyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyRole {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(GRABBER) {
            Ok(ProxyRole::Grabber)
        } else if s.eq_ignore_ascii_case(ACTUATOR) {
            Ok(ProxyRole::Actuator)
        } else {
            Err(PeerError::Protocol(format!("unknown role {s:?}")))
        }
    }
}
