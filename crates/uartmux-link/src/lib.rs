//! Link endpoints for uartmux.
//!
//! Provides the OS-backed ends of the multiplexer:
//! - [`SerialLink`]: the single physical UART carrying framed traffic
//! - [`VirtualPort`]: a pseudo-terminal pair published under a stable symlink
//!
//! The multiplexer core only depends on the [`Endpoint`] trait, never on how
//! an endpoint is backed.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod pty;
#[cfg(unix)]
pub mod serial;

pub use error::{LinkError, Result};
pub use traits::Endpoint;

#[cfg(unix)]
pub use pty::{PortHandle, VirtualPort};
#[cfg(unix)]
pub use serial::SerialLink;
