use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use uartmux_link::Endpoint;

use crate::context::MuxContext;
use crate::error::{MuxError, Result};
use crate::inbound::InboundReader;
use crate::outbound::{OutboundWriter, StreamPoller};
use crate::router::{RouteTable, Router};

type Finished = (String, Result<()>);

/// Full-duplex multiplexer over one physical link.
///
/// Owns the link and one endpoint per route until [`Multiplexer::run`]
/// returns. Closing the logical streams (and removing their symlinks) is
/// left to the caller, after `run` has joined every worker.
pub struct Multiplexer<L, S> {
    link: L,
    table: Arc<RouteTable>,
    streams: Vec<S>,
    ctx: MuxContext,
}

impl<L: Endpoint, S: Endpoint> Multiplexer<L, S> {
    /// Pair the link with one logical stream per route, in address order.
    pub fn new(link: L, table: Arc<RouteTable>, streams: Vec<S>, ctx: MuxContext) -> Result<Self> {
        if streams.len() != table.len() {
            return Err(MuxError::Config(format!(
                "{} streams supplied for {} routes",
                streams.len(),
                table.len()
            )));
        }
        Ok(Self {
            link,
            table,
            streams,
            ctx,
        })
    }

    pub fn context(&self) -> &MuxContext {
        &self.ctx
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Run both directions until shutdown or a link fault.
    ///
    /// Spawns the inbound reader, the outbound writer and one poller per
    /// logical stream. When either direction stops, shutdown is requested
    /// for the rest; every worker is joined before returning. The first
    /// direction error is returned.
    pub fn run(self) -> Result<()> {
        let Self {
            link,
            table,
            streams,
            ctx,
        } = self;

        let link_tx = link.try_clone()?;
        let mut readers = Vec::with_capacity(streams.len());
        for stream in &streams {
            readers.push(stream.try_clone()?);
        }

        let (mut writer, queue) = OutboundWriter::new(link_tx, Arc::clone(&table), ctx.clone());
        let router =
            Router::new(Arc::clone(&table), streams)?.with_write_timeout(ctx.poll_interval());
        let mut inbound = InboundReader::new(link, router, ctx.clone());

        let (done_tx, done_rx) = mpsc::channel::<Finished>();
        let mut workers = Vec::with_capacity(readers.len() + 2);

        let spawned = (|| -> Result<()> {
            workers.push(spawn_direction("uartmux-inbound", &done_tx, move || {
                inbound.run()
            })?);
            workers.push(spawn_direction("uartmux-outbound", &done_tx, move || {
                writer.run()
            })?);
            for (route, stream) in table.iter().zip(readers) {
                let name = format!("uartmux-poll-{}", route.address);
                let mut poller =
                    StreamPoller::new(route.address, stream, queue.clone(), ctx.clone());
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        if let Err(err) = poller.run() {
                            debug!(address = poller.address(), error = %err, "stream poller ended");
                        }
                    })
                    .map_err(|source| MuxError::Spawn { name, source })?;
                workers.push(handle);
            }
            Ok(())
        })();
        drop(done_tx);

        let mut first = match spawned {
            Ok(()) => {
                info!(routes = table.len(), "multiplexer running");
                match done_rx.recv() {
                    Ok((name, result)) => {
                        debug!(worker = %name, "direction finished, stopping");
                        result.err()
                    }
                    Err(_) => None,
                }
            }
            Err(err) => Some(err),
        };

        ctx.shutdown().request();
        for worker in workers {
            if worker.join().is_err() {
                warn!("multiplexer worker panicked");
            }
        }
        drop(queue);

        for (_, result) in done_rx.try_iter() {
            if first.is_none() {
                first = result.err();
            }
        }

        let stats = ctx.stats().snapshot();
        info!(
            frames_in = stats.frames_in,
            frames_out = stats.frames_out,
            malformed = stats.malformed,
            "multiplexer stopped"
        );
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_direction<F>(name: &str, done: &Sender<Finished>, work: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let done = done.clone();
    let label = name.to_string();
    thread::Builder::new()
        .name(label.clone())
        .spawn(move || {
            // A panic must still report, or `run` waits on the other direction forever.
            let result = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                Err(MuxError::WorkerPanicked {
                    name: label.clone(),
                })
            });
            let _ = done.send((label, result));
        })
        .map_err(|source| MuxError::Spawn {
            name: name.to_string(),
            source,
        })
}
