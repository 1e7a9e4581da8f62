mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "daqlink",
    version,
    about = "TCP proxy server and mock clients for distributed acquisition modules"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(code = err.code, "{err}");
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{DimArg, DuplicateArg, RoleArg};

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "daqlink",
            "serve",
            "--role",
            "actuator",
            "--port",
            "7000",
            "--on-duplicate",
            "replace",
            "--extra-role",
            "SCANNER",
            "--move-to",
            "-1.5",
        ])
        .expect("serve args should parse");

        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.role, RoleArg::Actuator);
        assert_eq!(args.port, 7000);
        assert_eq!(args.on_duplicate, DuplicateArg::Replace);
        assert_eq!(args.extra_roles, vec!["SCANNER".to_string()]);
        assert_eq!(args.move_to, Some(-1.5));
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["daqlink", "serve", "--grab", "2d"]).expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.role, RoleArg::Grabber);
        assert_eq!(args.grab, Some(DimArg::D2));
        assert_eq!(args.tick, "100ms");
        assert_eq!(args.handshake_timeout, "5s");
    }

    #[test]
    fn parses_grabber_subcommand() {
        let cli = Cli::try_parse_from([
            "daqlink", "grabber", "--host", "10.0.0.5", "-p", "6400", "--width", "64",
        ])
        .expect("grabber args should parse");
        let Command::Grabber(args) = cli.command else {
            panic!("expected grabber");
        };
        assert_eq!(args.connect.host, "10.0.0.5");
        assert_eq!(args.connect.port, 6400);
        assert_eq!(args.width, 64);
    }

    #[test]
    fn rejects_unknown_role() {
        let err = Cli::try_parse_from(["daqlink", "serve", "--role", "widget"])
            .expect_err("unknown role should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
