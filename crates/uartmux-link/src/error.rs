use std::path::PathBuf;

/// Errors that can occur while opening or driving link endpoints.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Failed to open the serial device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to apply terminal settings to a device.
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate has no termios speed constant.
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    /// Failed to allocate a pseudo-terminal pair.
    #[error("failed to allocate pseudo-terminal: {0}")]
    Pty(std::io::Error),

    /// Failed to publish or remove a port symlink.
    #[error("symlink {path}: {source}")]
    Symlink {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on an open endpoint.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
