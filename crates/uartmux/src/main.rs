mod cmd;
mod config;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "uartmux",
    version,
    about = "Multiplex many byte streams over a single UART"
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
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn parses_run_with_repeated_outputs() {
        let cli = Cli::try_parse_from([
            "uartmux",
            "run",
            "--device",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
            "-o",
            "/tmp/nav0",
            "--output",
            "/tmp/gps0",
        ])
        .expect("run args should parse");

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.device, Some(PathBuf::from("/dev/ttyUSB0")));
                assert_eq!(args.baud, Some(115_200));
                assert_eq!(
                    args.outputs,
                    vec![PathBuf::from("/tmp/nav0"), PathBuf::from("/tmp/gps0")]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "uartmux", "encode", "--address", "1", "--hex", "01", "--data", "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn encode_requires_a_payload() {
        let err = Cli::try_parse_from(["uartmux", "encode", "--address", "1"])
            .expect_err("missing payload should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn address_must_fit_a_byte() {
        assert!(Cli::try_parse_from(["uartmux", "encode", "-a", "256", "--data", "x"]).is_err());
    }

    #[test]
    fn parses_decode_from_stdin() {
        let cli = Cli::try_parse_from(["uartmux", "--format", "json", "decode", "-"])
            .expect("decode args should parse");
        assert!(matches!(cli.command, Command::Decode(ref args) if args.input == PathBuf::from("-")));
    }
}
