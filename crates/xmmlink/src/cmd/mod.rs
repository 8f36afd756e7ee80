use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use xmmlink_modem::DEFAULT_DATACHANNEL_PATH;
use xmmlink_transport::{DEFAULT_MUX_PATH, DEFAULT_RPC_PATH};

use crate::exit::{hex_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod bridge;
pub mod call;
pub mod decode;
pub mod up;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the modem up and print the negotiated addresses.
    Up(UpArgs),
    /// Relay packets between a tun interface and the mux channel.
    Bridge(BridgeArgs),
    /// Issue one raw command and print the decoded reply.
    Call(CallArgs),
    /// Decode a hex-encoded value stream.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Up(args) => up::run(args, format),
        Command::Bridge(args) => bridge::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Carrier access point name.
    #[arg(long, env = "XMMLINK_APN")]
    pub apn: String,
    /// Command channel device.
    #[arg(long, env = "XMMLINK_RPC_DEVICE", default_value = DEFAULT_RPC_PATH)]
    pub rpc_device: PathBuf,
    /// Timeout for each call (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// How long to wait for the network to allow a rejected attach.
    #[arg(long, default_value = "60s")]
    pub attach_wait: String,
    /// Retry interval while no IP address is assigned.
    #[arg(long, default_value = "1s")]
    pub ip_fetch_interval: String,
    /// Address queries before giving up.
    #[arg(long, default_value = "30")]
    pub ip_fetch_attempts: u32,
    /// Data channel to route the session to.
    #[arg(long, default_value = DEFAULT_DATACHANNEL_PATH)]
    pub datachannel: String,
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Mux channel device.
    #[arg(long, env = "XMMLINK_MUX_DEVICE", default_value = DEFAULT_MUX_PATH)]
    pub mux_device: PathBuf,
    /// Tun interface to attach to.
    #[arg(long, default_value = "wwan0")]
    pub tun: String,
    /// Largest frame written to the mux channel.
    #[arg(long, default_value = "4096")]
    pub max_frame_size: usize,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Command name (e.g. UtaMsNetAttachReq) or numeric code (e.g. 0xa2).
    pub command: String,
    /// Command channel device.
    #[arg(long, env = "XMMLINK_RPC_DEVICE", default_value = DEFAULT_RPC_PATH)]
    pub rpc_device: PathBuf,
    /// Hex-encoded request body.
    #[arg(long, default_value = "")]
    pub body: String,
    /// Send as an async call and wait for its completion.
    #[arg(long = "async", conflicts_with = "no_wait")]
    pub is_async: bool,
    /// Send without waiting for the reply.
    #[arg(long)]
    pub no_wait: bool,
    /// Reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded values. Whitespace is ignored.
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
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

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).map_err(hex_error)
}
