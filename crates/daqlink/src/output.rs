use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use daqlink_peer::{ClientEntry, ClientEvent, Command, ServerEvent};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

pub fn print_server_event(event: &ServerEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => println!("{event}"),
    }
}

/// Role → address table, one row per registered socket.
pub fn print_clients(clients: &[ClientEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "event": "clients", "clients": clients })
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ROLE", "ADDRESS", "ID"]);
            for entry in clients {
                table.add_row(vec![
                    entry.role.clone(),
                    entry.address.clone(),
                    entry.id.map(|id| id.to_string()).unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for entry in clients {
                println!("{:<12} {}", entry.role, entry.address);
            }
        }
    }
}

#[derive(Serialize)]
struct ClientEventOutput<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl<'a> From<&'a ClientEvent> for ClientEventOutput<'a> {
    fn from(event: &'a ClientEvent) -> Self {
        let mut out = ClientEventOutput {
            event: "",
            command: None,
            position: None,
            message: None,
        };
        match event {
            ClientEvent::Connected => out.event = "connected",
            ClientEvent::Disconnected => out.event = "disconnected",
            ClientEvent::Status(message) => {
                out.event = "status";
                out.message = Some(message.as_str());
            }
            ClientEvent::Command(command) => {
                out.event = "command";
                out.command = Some(command.name());
                out.position = command.position();
                if let Command::SetInfo { xml, .. } = command {
                    out.message = Some(xml.as_str());
                }
            }
        }
        out
    }
}

pub fn print_client_event(event: &ClientEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&ClientEventOutput::from(event))
                .unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let out = ClientEventOutput::from(event);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "COMMAND", "DETAIL"])
                .add_row(vec![
                    out.event.to_string(),
                    out.command.unwrap_or_default().to_string(),
                    out.position
                        .map(|p| p.to_string())
                        .or_else(|| out.message.map(str::to_string))
                        .unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{event}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_command_output_carries_position() {
        let event = ClientEvent::Command(Command::move_abs(2.5));
        let json = serde_json::to_value(ClientEventOutput::from(&event)).expect("serialize");
        assert_eq!(json["event"], "command");
        assert_eq!(json["command"], "move_abs");
        assert_eq!(json["position"], 2.5);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn status_output_carries_message() {
        let event = ClientEvent::Status("connected to localhost:6341".to_string());
        let json = serde_json::to_value(ClientEventOutput::from(&event)).expect("serialize");
        assert_eq!(json["event"], "status");
        assert_eq!(json["message"], "connected to localhost:6341");
    }
}
