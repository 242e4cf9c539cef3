use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uartmux_mux::RouteTable;

use crate::exit::{io_error, CliError, CliResult, USAGE};

pub const DEFAULT_DEVICE: &str = "/dev/ttyTHS2";
pub const DEFAULT_BAUD: u32 = 57_600;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_OUTPUTS: [&str; 5] = [
    "/dev/ttyNC0",
    "/dev/gps0",
    "/dev/roboclaw0",
    "/dev/ttyNC1",
    "/dev/imu0",
];

/// Multiplexer settings, loadable from a JSON file.
///
/// The position of each entry in `outputs` is its address on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxConfig {
    pub device: PathBuf,
    pub baud: u32,
    pub outputs: Vec<PathBuf>,
    pub poll_interval_ms: u64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            baud: DEFAULT_BAUD,
            outputs: DEFAULT_OUTPUTS.iter().map(PathBuf::from).collect(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl MuxConfig {
    /// Read a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        serde_json::from_str(&text).map_err(|err| {
            CliError::new(
                USAGE,
                format!("invalid config {}: {err}", path.display()),
            )
        })
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.outputs.is_empty() {
            return Err(CliError::new(USAGE, "at least one output is required"));
        }
        if self.outputs.len() > RouteTable::MAX_ROUTES {
            return Err(CliError::new(
                USAGE,
                format!(
                    "{} outputs configured, at most {} are addressable",
                    self.outputs.len(),
                    RouteTable::MAX_ROUTES
                ),
            ));
        }
        let mut seen = HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output) {
                return Err(CliError::new(
                    USAGE,
                    format!("output {} is listed more than once", output.display()),
                ));
            }
        }
        if self.baud == 0 {
            return Err(CliError::new(USAGE, "baud rate must be greater than zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(CliError::new(
                USAGE,
                "poll interval must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn route_table(&self) -> CliResult<RouteTable> {
        RouteTable::new(self.outputs.iter().map(|p| p.display().to_string()))
            .map_err(|err| CliError::new(USAGE, err.to_string()))
    }
}
