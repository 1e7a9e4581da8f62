//! The command vocabulary and its frame shapes.
//!
//! Every command starts with its name as a string frame. What follows
//! depends on the name:
//!
//! | name | body |
//! |---|---|
//! | `Done` | list of values |
//! | `Infos` | string (XML snapshot) |
//! | `Info` | string label, string value |
//! | `Info_xml`, `set_info` | list of path strings, string (XML fragment) |
//! | `move_abs`, `move_rel`, `position_is`, `move_done` | scalar position |
//! | `x_axis`, `y_axis` | array, string label, string units |
//! | everything else | nothing |

use std::fmt;
use std::io::{Read, Write};

use daqlink_wire::{Encoder, Scalar, WireArray, WireError, WireReader, WireValue, WireWriter};

use crate::error::{PeerError, Result};

/// Names of the known commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Done,
    Infos,
    Info,
    InfoXml,
    SetInfo,
    MoveAbs,
    MoveRel,
    MoveHome,
    PositionIs,
    MoveDone,
    XAxis,
    YAxis,
    GetActuatorValue,
    StopMotion,
    Quit,
    SendData0D,
    SendData1D,
    SendData2D,
    SendDataND,
    Status,
    ServerClosed,
}

impl CommandName {
    pub const ALL: &'static [CommandName] = &[
        CommandName::Done,
        CommandName::Infos,
        CommandName::Info,
        CommandName::InfoXml,
        CommandName::SetInfo,
        CommandName::MoveAbs,
        CommandName::MoveRel,
        CommandName::MoveHome,
        CommandName::PositionIs,
        CommandName::MoveDone,
        CommandName::XAxis,
        CommandName::YAxis,
        CommandName::GetActuatorValue,
        CommandName::StopMotion,
        CommandName::Quit,
        CommandName::SendData0D,
        CommandName::SendData1D,
        CommandName::SendData2D,
        CommandName::SendDataND,
        CommandName::Status,
        CommandName::ServerClosed,
    ];

    /// The name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Done => "Done",
            CommandName::Infos => "Infos",
            CommandName::Info => "Info",
            CommandName::InfoXml => "Info_xml",
            CommandName::SetInfo => "set_info",
            CommandName::MoveAbs => "move_abs",
            CommandName::MoveRel => "move_rel",
            CommandName::MoveHome => "move_home",
            CommandName::PositionIs => "position_is",
            CommandName::MoveDone => "move_done",
            CommandName::XAxis => "x_axis",
            CommandName::YAxis => "y_axis",
            CommandName::GetActuatorValue => "get_actuator_value",
            CommandName::StopMotion => "stop_motion",
            CommandName::Quit => "Quit",
            CommandName::SendData0D => "Send Data 0D",
            CommandName::SendData1D => "Send Data 1D",
            CommandName::SendData2D => "Send Data 2D",
            CommandName::SendDataND => "Send Data ND",
            CommandName::Status => "Status",
            CommandName::ServerClosed => "Server Closed",
        }
    }

    /// Look up a wire name. Names are case-sensitive.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|cmd| cmd.as_str() == name)
    }

    /// True if frames follow the name.
    pub fn has_body(self) -> bool {
        matches!(
            self,
            CommandName::Done
                | CommandName::Infos
                | CommandName::Info
                | CommandName::InfoXml
                | CommandName::SetInfo
                | CommandName::MoveAbs
                | CommandName::MoveRel
                | CommandName::PositionIs
                | CommandName::MoveDone
                | CommandName::XAxis
                | CommandName::YAxis
        )
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dimensionality requested by a `Send Data *` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataDim {
    D0,
    D1,
    D2,
    DN,
}

impl DataDim {
    fn command_name(self) -> CommandName {
        match self {
            DataDim::D0 => CommandName::SendData0D,
            DataDim::D1 => CommandName::SendData1D,
            DataDim::D2 => CommandName::SendData2D,
            DataDim::DN => CommandName::SendDataND,
        }
    }
}

/// Which axis an `x_axis`/`y_axis` command describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

/// Axis values plus their label and units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisInfo {
    pub data: WireArray,
    pub label: String,
    pub units: String,
}

impl AxisInfo {
    pub fn new(data: WireArray, label: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            data,
            label: label.into(),
            units: units.into(),
        }
    }
}

/// One decoded command with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A grabber finished an acquisition and delivers its data.
    Done(Vec<WireValue>),
    /// Whole settings snapshot (XML).
    Infos(String),
    /// Ad hoc key/value for peers without a settings tree.
    Info { label: String, value: String },
    /// Client → server: one setting changed at `path`.
    InfoXml { path: Vec<String>, xml: String },
    /// Server → client: push one setting at `path`.
    SetInfo { path: Vec<String>, xml: String },
    MoveAbs(Scalar),
    MoveRel(Scalar),
    MoveHome,
    PositionIs(Scalar),
    MoveDone(Scalar),
    XAxis(AxisInfo),
    YAxis(AxisInfo),
    GetActuatorValue,
    StopMotion,
    Quit,
    SendData(DataDim),
    Status,
    ServerClosed,
    /// Application-specific name-only command.
    ///
    /// The name must not be one of the vocabulary names that carry a body;
    /// encoding such a command fails.
    Custom(String),
}

impl Command {
    /// Build a name-only command, typed when the name is in the vocabulary.
    pub fn from_name(name: &str) -> Self {
        match CommandName::parse(name) {
            Some(CommandName::MoveHome) => Command::MoveHome,
            Some(CommandName::GetActuatorValue) => Command::GetActuatorValue,
            Some(CommandName::StopMotion) => Command::StopMotion,
            Some(CommandName::Quit) => Command::Quit,
            Some(CommandName::SendData0D) => Command::SendData(DataDim::D0),
            Some(CommandName::SendData1D) => Command::SendData(DataDim::D1),
            Some(CommandName::SendData2D) => Command::SendData(DataDim::D2),
            Some(CommandName::SendDataND) => Command::SendData(DataDim::DN),
            Some(CommandName::Status) => Command::Status,
            Some(CommandName::ServerClosed) => Command::ServerClosed,
            _ => Command::Custom(name.to_string()),
        }
    }

    pub fn move_abs(position: f64) -> Self {
        Command::MoveAbs(Scalar::new(position))
    }

    pub fn move_rel(step: f64) -> Self {
        Command::MoveRel(Scalar::new(step))
    }

    pub fn position_is(position: f64) -> Self {
        Command::PositionIs(Scalar::new(position))
    }

    pub fn move_done(position: f64) -> Self {
        Command::MoveDone(Scalar::new(position))
    }

    /// Vocabulary entry, `None` for [`Command::Custom`].
    pub fn command_name(&self) -> Option<CommandName> {
        let name = match self {
            Command::Done(_) => CommandName::Done,
            Command::Infos(_) => CommandName::Infos,
            Command::Info { .. } => CommandName::Info,
            Command::InfoXml { .. } => CommandName::InfoXml,
            Command::SetInfo { .. } => CommandName::SetInfo,
            Command::MoveAbs(_) => CommandName::MoveAbs,
            Command::MoveRel(_) => CommandName::MoveRel,
            Command::MoveHome => CommandName::MoveHome,
            Command::PositionIs(_) => CommandName::PositionIs,
            Command::MoveDone(_) => CommandName::MoveDone,
            Command::XAxis(_) => CommandName::XAxis,
            Command::YAxis(_) => CommandName::YAxis,
            Command::GetActuatorValue => CommandName::GetActuatorValue,
            Command::StopMotion => CommandName::StopMotion,
            Command::Quit => CommandName::Quit,
            Command::SendData(dim) => dim.command_name(),
            Command::Status => CommandName::Status,
            Command::ServerClosed => CommandName::ServerClosed,
            Command::Custom(_) => return None,
        };
        Some(name)
    }

    /// Name sent on the wire.
    pub fn name(&self) -> &str {
        match self {
            Command::Custom(name) => name,
            other => other.command_name().map(CommandName::as_str).unwrap_or_default(),
        }
    }

    /// Position carried by a motion command, widened to `f64`.
    pub fn position(&self) -> Option<f64> {
        match self {
            Command::MoveAbs(p)
            | Command::MoveRel(p)
            | Command::PositionIs(p)
            | Command::MoveDone(p) => p.as_f64(),
            _ => None,
        }
    }

    /// Append the name frame and the body frames.
    pub fn encode(&self, enc: &mut Encoder<'_>) -> daqlink_wire::Result<()> {
        if let Command::Custom(name) = self {
            if CommandName::parse(name).is_some_and(CommandName::has_body) {
                return Err(WireError::Type {
                    found: format!("custom command named {name:?}"),
                    expected: "a name outside the vocabulary",
                });
            }
        }

        enc.put_string(self.name())?;
        match self {
            Command::Done(values) => {
                enc.put_list(values)?;
            }
            Command::Infos(xml) => {
                enc.put_string(xml)?;
            }
            Command::Info { label, value } => {
                enc.put_string(label)?;
                enc.put_string(value)?;
            }
            Command::InfoXml { path, xml } | Command::SetInfo { path, xml } => {
                enc.put_string_list(path)?;
                enc.put_string(xml)?;
            }
            Command::MoveAbs(p)
            | Command::MoveRel(p)
            | Command::PositionIs(p)
            | Command::MoveDone(p) => {
                enc.put_scalar(p)?;
            }
            Command::XAxis(axis) | Command::YAxis(axis) => {
                enc.put_array(&axis.data)?;
                enc.put_string(&axis.label)?;
                enc.put_string(&axis.units)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Send the whole command as one batch.
    pub fn write_to<W: Write>(&self, writer: &mut WireWriter<W>) -> daqlink_wire::Result<()> {
        writer.send_frames(|enc| self.encode(enc))
    }

    /// Read a name frame and the body that name implies.
    pub fn read<R: Read>(reader: &mut WireReader<R>) -> Result<Self> {
        let name = reader.recv_string()?;
        Self::read_body(&name, reader)
    }

    /// Read exactly the frames `name` implies. Names outside the vocabulary
    /// carry no body and come back as [`Command::Custom`].
    pub fn read_body<R: Read>(name: &str, reader: &mut WireReader<R>) -> Result<Self> {
        let Some(known) = CommandName::parse(name) else {
            return Ok(Command::Custom(name.to_string()));
        };

        let command = match known {
            CommandName::Done => Command::Done(reader.recv_list()?),
            CommandName::Infos => Command::Infos(reader.recv_string()?),
            CommandName::Info => {
                let label = reader.recv_string()?;
                let value = reader.recv_string()?;
                Command::Info { label, value }
            }
            CommandName::InfoXml => {
                let path = read_path(reader)?;
                let xml = reader.recv_string()?;
                Command::InfoXml { path, xml }
            }
            CommandName::SetInfo => {
                let path = read_path(reader)?;
                let xml = reader.recv_string()?;
                Command::SetInfo { path, xml }
            }
            CommandName::MoveAbs => Command::MoveAbs(reader.recv_scalar()?),
            CommandName::MoveRel => Command::MoveRel(reader.recv_scalar()?),
            CommandName::PositionIs => Command::PositionIs(reader.recv_scalar()?),
            CommandName::MoveDone => Command::MoveDone(reader.recv_scalar()?),
            CommandName::XAxis => Command::XAxis(read_axis(reader)?),
            CommandName::YAxis => Command::YAxis(read_axis(reader)?),
            other => Command::from_name(other.as_str()),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn read_path<R: Read>(reader: &mut WireReader<R>) -> Result<Vec<String>> {
    reader.recv_string_list().map_err(|err| match err {
        WireError::Type { found, .. } => {
            PeerError::Protocol(format!("settings path holds a non-string element ({found})"))
        }
        other => PeerError::Wire(other),
    })
}

fn read_axis<R: Read>(reader: &mut WireReader<R>) -> Result<AxisInfo> {
    let data = reader.recv_array()?;
    let label = reader.recv_string()?;
    let units = reader.recv_string()?;
    Ok(AxisInfo { data, label, units })
}
