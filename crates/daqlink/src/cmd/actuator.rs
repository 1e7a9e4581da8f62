use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use daqlink_peer::{ClientConfig, ClientEvent, ClientRequest, ClientSession, Command, ACTUATOR};
use daqlink_wire::Scalar;
use tracing::{debug, error};

use crate::cmd::{install_ctrlc_handler, parse_duration, ActuatorArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_client_event, OutputFormat};

pub fn run(args: ActuatorArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ClientConfig::new(ACTUATOR)
        .with_address(args.connect.host.clone(), args.connect.port)
        .with_poll_interval(parse_duration(&args.connect.poll_interval)?)
        .with_settings_xml("<settings><actuator>mock</actuator><units>mm</units></settings>")
        .with_bootstrap(Command::position_is(args.start));
    let mut session = ClientSession::new(config);
    let handle = session.handle();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if let Err(err) = session.connect() {
        for event in session.take_events() {
            print_client_event(&event, format);
        }
        return Err(peer_error("connect failed", err));
    }

    let mut stage = MockStage::new(args.start);
    session
        .run(&running, |event| {
            print_client_event(event, format);
            let ClientEvent::Command(command) = event else {
                return;
            };
            let Some(reply) = stage.handle(command) else {
                return;
            };
            if let Err(err) = handle.send(reply) {
                error!(error = %err, "reply not queued");
                running.store(false, Ordering::SeqCst);
                return;
            }
            if args.count.is_some_and(|limit| stage.moves >= limit) {
                running.store(false, Ordering::SeqCst);
            }
        })
        .map_err(|err| peer_error("session failed", err))?;

    Ok(SUCCESS)
}

/// A stage that reaches every target instantly.
struct MockStage {
    position: f64,
    moves: usize,
}

impl MockStage {
    fn new(position: f64) -> Self {
        Self { position, moves: 0 }
    }

    /// Reply to one received command, if it calls for one.
    fn handle(&mut self, command: &Command) -> Option<ClientRequest> {
        let target = match command {
            Command::MoveAbs(target) => target.as_f64()?,
            Command::MoveRel(step) => self.position + step.as_f64()?,
            Command::MoveHome => 0.0,
            Command::StopMotion => self.position,
            Command::GetActuatorValue => {
                return Some(ClientRequest::PositionIs(Scalar::new(self.position)));
            }
            _ => return None,
        };
        debug!(from = self.position, to = target, "moving");
        self.position = target;
        self.moves += 1;
        Some(ClientRequest::MoveDone(Scalar::new(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_reply_with_move_done() {
        let mut stage = MockStage::new(1.0);
        assert_eq!(
            stage.handle(&Command::move_rel(0.5)),
            Some(ClientRequest::MoveDone(Scalar::new(1.5f64)))
        );
        assert_eq!(
            stage.handle(&Command::move_abs(-2.0)),
            Some(ClientRequest::MoveDone(Scalar::new(-2.0f64)))
        );
        assert_eq!(
            stage.handle(&Command::MoveHome),
            Some(ClientRequest::MoveDone(Scalar::new(0.0f64)))
        );
        assert_eq!(stage.moves, 3);
    }

    #[test]
    fn value_request_reports_position() {
        let mut stage = MockStage::new(4.25);
        assert_eq!(
            stage.handle(&Command::GetActuatorValue),
            Some(ClientRequest::PositionIs(Scalar::new(4.25f64)))
        );
        assert_eq!(stage.moves, 0);
        assert_eq!(stage.handle(&Command::Status), None);
    }
}
