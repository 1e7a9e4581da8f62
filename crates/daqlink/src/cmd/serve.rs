use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use daqlink_peer::{
    ActuatorProxy, Command, GrabberProxy, Proxy, Server, ServerConfig, ServerEvent,
};
use tracing::{error, info};

use crate::cmd::{install_ctrlc_handler, parse_duration, RoleArg, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_clients, print_server_event, OutputFormat};

/// What the server sends on its own while running.
struct Automation {
    on_connect: Option<Command>,
    after_done: Option<Command>,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = ServerConfig::default()
        .with_bind_addr(args.host.clone())
        .with_port(args.port)
        .with_tick(parse_duration(&args.tick)?)
        .with_handshake_timeout(parse_duration(&args.handshake_timeout)?)
        .with_duplicate_roles(args.on_duplicate.into());
    for role in &args.extra_roles {
        config = config.with_extra_role(role.clone());
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    match args.role {
        RoleArg::Grabber => {
            let request = args.grab.map(|dim| Command::SendData(dim.into()));
            let automation = Automation {
                on_connect: request.clone(),
                after_done: request,
            };
            let server = Server::bind(config, GrabberProxy::new())
                .map_err(|err| peer_error("bind failed", err))?;
            serve(server, &running, &automation, args.count, format)
        }
        RoleArg::Actuator => {
            let automation = Automation {
                on_connect: args.move_to.map(Command::move_abs),
                after_done: None,
            };
            let server = Server::bind(config, ActuatorProxy::new())
                .map_err(|err| peer_error("bind failed", err))?;
            serve(server, &running, &automation, args.count, format)
        }
    }
}

fn serve<P: Proxy>(
    mut server: Server<P>,
    running: &AtomicBool,
    automation: &Automation,
    count: Option<usize>,
    format: OutputFormat,
) -> CliResult<i32> {
    let role = server.proxy().role().as_str();
    info!(addr = %server.local_addr(), %role, "serving");
    let tick = server.config().tick;
    let mut dispatched = 0usize;

    while running.load(Ordering::SeqCst) {
        let events = match server.poll_once() {
            Ok(events) => events,
            Err(err) => {
                error!(error = %err, "server loop failed");
                server.close();
                return Err(peer_error("poll failed", err));
            }
        };

        for event in &events {
            print_server_event(event, format);
            if matches!(format, OutputFormat::Table)
                && matches!(
                    event,
                    ServerEvent::ClientConnected { .. } | ServerEvent::ClientDisconnected { .. }
                )
            {
                print_clients(&server.connected_clients(), format);
            }

            let follow_up = match event {
                ServerEvent::ClientConnected { role: who, .. } if who == role => {
                    automation.on_connect.as_ref()
                }
                ServerEvent::CommandDispatched { command, .. } => {
                    dispatched += 1;
                    if command == "Done" {
                        automation.after_done.as_ref()
                    } else {
                        None
                    }
                }
                _ => None,
            };

            if count.is_some_and(|limit| dispatched >= limit) {
                running.store(false, Ordering::SeqCst);
                continue;
            }
            if let Some(command) = follow_up {
                if let Err(err) = server.send_command(role, command) {
                    error!(error = %err, command = %command, "automatic command not sent");
                }
            }
        }

        if running.load(Ordering::SeqCst) {
            std::thread::sleep(tick);
        }
    }

    for event in server.close() {
        print_server_event(&event, format);
    }
    Ok(SUCCESS)
}
