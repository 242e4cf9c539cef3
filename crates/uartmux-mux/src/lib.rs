//! Address routing and full-duplex multiplexing over one serial link.
//!
//! Many logical byte streams share a single physical link. Each stream is
//! identified by its index in a [`RouteTable`]; that index is the address
//! byte of every frame carrying its data.
//!
//! - [`InboundReader`] decodes frames off the link and delivers each payload
//!   to the stream at its address
//! - [`StreamPoller`] reads a stream and queues its bytes, framed, for the link
//! - [`OutboundWriter`] is the only writer of the link, one whole frame at a time
//! - [`Multiplexer`] runs all of them on dedicated threads until shutdown
//!
//! Malformed frames, unroutable addresses and failing streams are reported
//! through [`MuxEvent`]s and never stop the multiplexer. A link failure does.

pub mod context;
pub mod error;
pub mod inbound;
pub mod mux;
pub mod outbound;
pub mod router;

pub use context::{
    EventSink, MuxContext, MuxEvent, MuxStats, ShutdownSignal, StatsSnapshot, TracingSink,
    DEFAULT_POLL_INTERVAL,
};
pub use error::{Direction, MuxError, Result, RouteError};
pub use inbound::InboundReader;
pub use mux::Multiplexer;
pub use outbound::{OutboundQueue, OutboundWriter, StreamPoller, DEFAULT_QUEUE_DEPTH};
pub use router::{Route, RouteTable, Router, DEFAULT_WRITE_TIMEOUT};
