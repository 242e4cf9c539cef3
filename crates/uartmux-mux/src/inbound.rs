use tracing::{debug, error};
use uartmux_frame::{Decoded, FrameReader};
use uartmux_link::Endpoint;

use crate::context::{MuxContext, MuxEvent};
use crate::error::{frame_to_io, link_to_io, Direction, MuxError, Result, RouteError};
use crate::router::Router;

/// Physical link → logical streams.
///
/// Owns the read half of the link and the write half of every logical
/// stream. Malformed frames, unroutable addresses and failing streams are
/// reported as events; only a link failure stops the reader.
pub struct InboundReader<L, W> {
    reader: FrameReader<L>,
    router: Router<W>,
    ctx: MuxContext,
    discarded: u64,
}

impl<L: Endpoint, W: Endpoint> InboundReader<L, W> {
    pub fn new(link: L, router: Router<W>, ctx: MuxContext) -> Self {
        Self {
            reader: FrameReader::new(link),
            router,
            ctx,
            discarded: 0,
        }
    }

    /// Run until shutdown is requested or the link fails.
    pub fn run(&mut self) -> Result<()> {
        debug!(routes = self.router.table().len(), "inbound reader started");
        while !self.ctx.shutdown().is_requested() {
            if let Err(err) = self.step() {
                error!(error = %err, "inbound reader stopped");
                return Err(err);
            }
        }
        debug!("inbound reader stopped on shutdown");
        Ok(())
    }

    /// One iteration: wait for input, read once, deliver what decodes.
    ///
    /// Returns the number of frames delivered to logical streams.
    pub fn step(&mut self) -> Result<usize> {
        let ready = self
            .reader
            .get_ref()
            .wait_readable(self.ctx.poll_interval())
            .map_err(|err| MuxError::link_fault(Direction::Inbound, link_to_io(err)))?;
        if !ready {
            return Ok(0);
        }

        self.reader
            .fill()
            .map_err(|err| MuxError::link_fault(Direction::Inbound, frame_to_io(err)))?;
        Ok(self.drain())
    }

    fn drain(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            match self.reader.next_decoded() {
                Decoded::Frame(frame) => {
                    match self.router.route_inbound(frame.address, &frame.payload) {
                        Ok(()) => {
                            delivered += 1;
                            self.ctx.emit(MuxEvent::FrameIn {
                                address: frame.address,
                                len: frame.payload.len(),
                            });
                        }
                        Err(RouteError::Unroutable { address, routes }) => {
                            self.ctx.emit(MuxEvent::Unroutable { address, routes });
                        }
                        Err(RouteError::StreamFault { address, source }) => {
                            self.ctx.emit(MuxEvent::StreamFault {
                                address,
                                direction: Direction::Inbound,
                                error: source.to_string(),
                            });
                        }
                        Err(RouteError::Truncated {
                            address,
                            delivered,
                            len,
                            ..
                        }) => {
                            self.ctx.emit(MuxEvent::Truncated {
                                address,
                                delivered,
                                len,
                            });
                        }
                    }
                }
                Decoded::Invalid(malformed) => self.ctx.emit(MuxEvent::Malformed(malformed)),
                Decoded::Incomplete => break,
            }
        }

        let total = self.reader.decoder().discarded();
        if total > self.discarded {
            self.ctx.stats().add_discarded(total - self.discarded);
            self.discarded = total;
        }
        delivered
    }

    pub fn router(&self) -> &Router<W> {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router<W> {
        &mut self.router
    }
}
