use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use daqlink_peer::{DataDim, DuplicateRolePolicy};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod actuator;
pub mod grabber;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a proxy server and print its events.
    Serve(ServeArgs),
    /// Connect as a mock grabber answering acquisition requests.
    Grabber(GrabberArgs),
    /// Connect as a mock actuator answering motion commands.
    Actuator(ActuatorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Grabber(args) => grabber::run(args, format),
        Command::Actuator(args) => actuator::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Grabber,
    Actuator,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DuplicateArg {
    Reject,
    Replace,
}

impl From<DuplicateArg> for DuplicateRolePolicy {
    fn from(arg: DuplicateArg) -> Self {
        match arg {
            DuplicateArg::Reject => DuplicateRolePolicy::Reject,
            DuplicateArg::Replace => DuplicateRolePolicy::Replace,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DimArg {
    #[value(name = "0d")]
    D0,
    #[value(name = "1d")]
    D1,
    #[value(name = "2d")]
    D2,
    #[value(name = "nd")]
    DN,
}

impl From<DimArg> for DataDim {
    fn from(arg: DimArg) -> Self {
        match arg {
            DimArg::D0 => DataDim::D0,
            DimArg::D1 => DataDim::D1,
            DimArg::D2 => DataDim::D2,
            DimArg::DN => DataDim::DN,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Which proxy to host.
    #[arg(long, value_enum, default_value = "grabber")]
    pub role: RoleArg,
    /// Address to bind.
    #[arg(long, default_value = "localhost", env = "DAQLINK_HOST")]
    pub host: String,
    /// Port to bind (0 picks a free one).
    #[arg(
        long,
        short = 'p',
        default_value_t = daqlink_transport::DEFAULT_PORT,
        env = "DAQLINK_PORT"
    )]
    pub port: u16,
    /// Poll tick (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms")]
    pub tick: String,
    /// Time a new client gets to announce its role.
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
    /// What to do when a role connects twice.
    #[arg(long, value_enum, default_value = "reject")]
    pub on_duplicate: DuplicateArg,
    /// Accept this role besides the proxy's own (repeatable).
    #[arg(long = "extra-role", value_name = "ROLE")]
    pub extra_roles: Vec<String>,
    /// Grabber proxy: request an acquisition of this dimensionality when the
    /// grabber connects and again after every delivery.
    #[arg(long, value_enum, value_name = "DIM")]
    pub grab: Option<DimArg>,
    /// Actuator proxy: move to this position when the actuator connects.
    #[arg(long, value_name = "POSITION", allow_negative_numbers = true)]
    pub move_to: Option<f64>,
    /// Exit after N commands were dispatched.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server host.
    #[arg(long, default_value = "localhost", env = "DAQLINK_HOST")]
    pub host: String,
    /// Server port.
    #[arg(
        long,
        short = 'p',
        default_value_t = daqlink_transport::DEFAULT_PORT,
        env = "DAQLINK_PORT"
    )]
    pub port: u16,
    /// Poll interval (e.g. 10ms, 1s).
    #[arg(long, default_value = "10ms")]
    pub poll_interval: String,
}

#[derive(Args, Debug)]
pub struct GrabberArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Frame width in pixels.
    #[arg(long, default_value_t = 32)]
    pub width: usize,
    /// Frame height in pixels.
    #[arg(long, default_value_t = 16)]
    pub height: usize,
    /// Exit after delivering N acquisitions.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ActuatorArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Initial position reported on connect.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub start: f64,
    /// Exit after completing N moves.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
