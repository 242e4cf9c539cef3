use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{trace, warn};
use uartmux_frame::Malformed;

use crate::error::Direction;

/// Default upper bound on how long a worker waits for input before
/// re-checking the shutdown signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Externally settable, cooperative shutdown request.
///
/// Workers check it once per loop iteration, never mid-frame.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every worker sharing this signal to stop.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something worth recording that happened on the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// A frame was delivered to its logical stream.
    FrameIn { address: u8, len: usize },
    /// A frame was written to the physical link.
    FrameOut { address: u8, len: usize },
    /// A received frame was rejected.
    Malformed(Malformed),
    /// A frame named an address with no logical stream.
    Unroutable { address: u8, routes: usize },
    /// A logical stream failed while reading or writing.
    StreamFault {
        address: u8,
        direction: Direction,
        error: String,
    },
    /// A logical stream stalled part way through an inbound payload.
    Truncated {
        address: u8,
        delivered: usize,
        len: usize,
    },
}

/// Receives every [`MuxEvent`].
pub trait EventSink: Send + Sync {
    fn record(&self, event: &MuxEvent);
}

/// Default sink: frames at trace level, every recoverable fault as a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &MuxEvent) {
        match event {
            MuxEvent::FrameIn { address, len } => trace!(address, len, "delivered frame"),
            MuxEvent::FrameOut { address, len } => trace!(address, len, "sent frame"),
            MuxEvent::Malformed(malformed) => {
                warn!(address = malformed.address(), error = %malformed, "dropped malformed frame")
            }
            MuxEvent::Unroutable { address, routes } => warn!(
                address,
                routes, "received data for address {address} when there are only {routes} devices"
            ),
            MuxEvent::StreamFault {
                address,
                direction,
                error,
            } => warn!(address, %direction, error = %error, "logical stream fault"),
            MuxEvent::Truncated {
                address,
                delivered,
                len,
            } => warn!(address, delivered, len, "truncated frame on stalled logical stream"),
        }
    }
}

/// Running counters, updated for every event.
#[derive(Debug, Default)]
pub struct MuxStats {
    frames_in: AtomicU64,
    bytes_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_out: AtomicU64,
    malformed: AtomicU64,
    unroutable: AtomicU64,
    stream_faults: AtomicU64,
    truncated: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`MuxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_in: u64,
    pub bytes_in: u64,
    pub frames_out: u64,
    pub bytes_out: u64,
    pub malformed: u64,
    pub unroutable: u64,
    pub stream_faults: u64,
    pub truncated: u64,
    pub discarded: u64,
}

impl MuxStats {
    fn apply(&self, event: &MuxEvent) {
        match event {
            MuxEvent::FrameIn { len, .. } => {
                self.frames_in.fetch_add(1, Ordering::Relaxed);
                self.bytes_in.fetch_add(*len as u64, Ordering::Relaxed);
            }
            MuxEvent::FrameOut { len, .. } => {
                self.frames_out.fetch_add(1, Ordering::Relaxed);
                self.bytes_out.fetch_add(*len as u64, Ordering::Relaxed);
            }
            MuxEvent::Malformed(_) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
            }
            MuxEvent::Unroutable { .. } => {
                self.unroutable.fetch_add(1, Ordering::Relaxed);
            }
            MuxEvent::StreamFault { .. } => {
                self.stream_faults.fetch_add(1, Ordering::Relaxed);
            }
            MuxEvent::Truncated { delivered, .. } => {
                self.truncated.fetch_add(1, Ordering::Relaxed);
                self.bytes_in.fetch_add(*delivered as u64, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn add_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            stream_faults: self.stream_faults.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Shared state handed to every worker.
#[derive(Clone)]
pub struct MuxContext {
    shutdown: ShutdownSignal,
    sink: Arc<dyn EventSink>,
    stats: Arc<MuxStats>,
    poll_interval: Duration,
}

impl MuxContext {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            sink: Arc::new(TracingSink),
            stats: Arc::new(MuxStats::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set how long workers wait for input between shutdown checks.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn stats(&self) -> &MuxStats {
        &self.stats
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Count an event and pass it to the sink.
    pub fn emit(&self, event: MuxEvent) {
        self.stats.apply(&event);
        self.sink.record(&event);
    }
}

impl std::fmt::Debug for MuxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxContext")
            .field("shutdown", &self.shutdown.is_requested())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
