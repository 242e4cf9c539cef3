use std::fmt;

use uartmux_frame::FrameError;
use uartmux_link::LinkError;

/// Traffic direction relative to the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Physical link to logical streams.
    Inbound,
    /// Logical streams to physical link.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Errors raised while resolving an address or delivering to its stream.
///
/// All are recoverable: the caller logs and moves on to the next frame.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// No logical stream is configured at this address.
    #[error("received data for address {address} when there are only {routes} devices")]
    Unroutable { address: u8, routes: usize },

    /// The logical stream at this address failed; nothing was delivered.
    #[error("logical stream {address} failed: {source}")]
    StreamFault {
        address: u8,
        source: std::io::Error,
    },

    /// The logical stream stopped draining part way through a payload.
    #[error("logical stream {address} took {delivered} of {len} bytes: {source}")]
    Truncated {
        address: u8,
        delivered: usize,
        len: usize,
        source: std::io::Error,
    },
}

/// Errors that can occur while running the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Link endpoint setup error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Routing error.
    #[error("route error: {0}")]
    Route(#[from] RouteError),

    /// The physical link failed; the affected direction has stopped.
    #[error("{direction} link fault: {source}")]
    LinkFault {
        direction: Direction,
        source: std::io::Error,
    },

    /// The outbound write queue has shut down.
    #[error("outbound queue closed")]
    QueueClosed,

    /// A worker thread could not be started.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    /// A worker thread panicked.
    #[error("{name} panicked")]
    WorkerPanicked { name: String },

    /// Routing setup is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MuxError {
    pub(crate) fn link_fault(direction: Direction, source: std::io::Error) -> Self {
        MuxError::LinkFault { direction, source }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

pub(crate) fn frame_to_io(err: FrameError) -> std::io::Error {
    match err {
        FrameError::Io(io) => io,
        FrameError::LinkClosed => {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "link closed")
        }
        other => std::io::Error::other(other.to_string()),
    }
}

pub(crate) fn link_to_io(err: LinkError) -> std::io::Error {
    match err {
        LinkError::Io(io) | LinkError::Pty(io) => io,
        LinkError::Open { source, .. }
        | LinkError::Configure { source, .. }
        | LinkError::Symlink { source, .. } => source,
        other => std::io::Error::other(other.to_string()),
    }
}
