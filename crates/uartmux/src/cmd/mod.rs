use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the serial link, publish virtual ports and multiplex until stopped.
    Run(RunArgs),
    /// Frame a payload for an address and write the wire bytes.
    Encode(EncodeArgs),
    /// Decode a captured byte stream and print every frame.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Encode(args) => encode::run(args),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON config file; flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Physical serial device.
    #[arg(long, value_name = "PATH", env = "UARTMUX_DEVICE")]
    pub device: Option<PathBuf>,
    /// Serial baud rate.
    #[arg(long, env = "UARTMUX_BAUD")]
    pub baud: Option<u32>,
    /// Virtual port symlink, in address order (repeatable).
    #[arg(long = "output", short = 'o', value_name = "PATH")]
    pub outputs: Vec<PathBuf>,
    /// Milliseconds a worker waits for input between shutdown checks.
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Destination address.
    #[arg(long, short = 'a')]
    pub address: u8,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["hex", "file"], required_unless_present_any = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// Print the wire bytes as hex instead of writing them raw.
    #[arg(long)]
    pub hex_output: bool,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Captured byte stream (`-` for stdin).
    pub input: PathBuf,
    /// Only show frames for this address.
    #[arg(long, short = 'a')]
    pub address: Option<u8>,
    /// Exit with status 60 if any malformed frame was seen.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
