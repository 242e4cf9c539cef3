//! Multiplex many byte streams over a single UART.
//!
//! One physical serial link carries addressed, checksummed frames. Each
//! address is bridged to a pseudo-terminal published under a stable
//! symlink, so ordinary programs can open "their" device while sharing the
//! wire with everything else.
//!
//! # Crate Structure
//!
//! - [`link`]: OS-backed endpoints (serial device, virtual ports)
//! - [`frame`]: Wire framing, checksum and resynchronizing decoder
//! - [`mux`]: Address routing and the full-duplex multiplexer

/// Re-export link types.
pub mod link {
    pub use uartmux_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use uartmux_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use uartmux_mux::*;
}
