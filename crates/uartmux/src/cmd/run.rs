use std::sync::Arc;

use tracing::warn;
use uartmux_link::{SerialLink, VirtualPort};
use uartmux_mux::{Multiplexer, MuxContext, ShutdownSignal};

use crate::cmd::RunArgs;
use crate::config::MuxConfig;
use crate::exit::{link_error, mux_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_stats, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = resolve_config(&args)?;
    config.validate()?;
    let table = Arc::new(config.route_table()?);

    let shutdown = ShutdownSignal::new();
    install_shutdown_handler(shutdown.clone())?;

    let link = SerialLink::open(&config.device, config.baud)
        .map_err(|err| link_error("failed to open serial link", err))?;

    // Ports opened so far are unpublished on drop if a later one fails.
    let mut ports = Vec::with_capacity(config.outputs.len());
    for output in &config.outputs {
        let port = VirtualPort::open(output)
            .map_err(|err| link_error(&format!("failed to create {}", output.display()), err))?;
        ports.push(port);
    }
    let mut handles = Vec::with_capacity(ports.len());
    for port in &ports {
        handles.push(
            port.handle()
                .map_err(|err| link_error("failed to open port handle", err))?,
        );
    }

    let ctx = MuxContext::new(shutdown).with_poll_interval(config.poll_interval());

    let mux = Multiplexer::new(link, table, handles, ctx.clone())
        .map_err(|err| mux_error("invalid routing", err))?;
    let result = mux.run();

    for port in ports {
        let symlink = port.symlink().to_path_buf();
        if let Err(err) = port.close() {
            warn!(path = ?symlink, error = %err, "failed to remove port");
        }
    }

    print_stats(&ctx.stats().snapshot(), format);
    result.map_err(|err| mux_error("multiplexer stopped", err))?;
    Ok(SUCCESS)
}

/// Layer flags over the config file (or defaults).
fn resolve_config(args: &RunArgs) -> CliResult<MuxConfig> {
    let mut config = match &args.config {
        Some(path) => MuxConfig::load(path)?,
        None => MuxConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(baud) = args.baud {
        config.baud = baud;
    }
    if !args.outputs.is_empty() {
        config.outputs = args.outputs.clone();
    }
    if let Some(ms) = args.poll_interval {
        config.poll_interval_ms = ms;
    }
    Ok(config)
}

fn install_shutdown_handler(shutdown: ShutdownSignal) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.request();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = RunArgs {
            device: Some(PathBuf::from("/dev/ttyUSB1")),
            baud: Some(115_200),
            outputs: vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")],
            poll_interval: Some(20),
            ..RunArgs::default()
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/ttyUSB1"));
        assert_eq!(config.baud, 115_200);
        assert_eq!(config.outputs.len(), 2);
        assert_eq!(config.poll_interval_ms, 20);
    }

    #[test]
    fn no_flags_keeps_defaults() {
        let config = resolve_config(&RunArgs::default()).unwrap();
        assert_eq!(config, MuxConfig::default());
    }

    #[test]
    fn missing_config_file_fails() {
        let args = RunArgs {
            config: Some(PathBuf::from("/nonexistent/uartmux.json")),
            ..RunArgs::default()
        };
        assert!(resolve_config(&args).is_err());
    }
}
