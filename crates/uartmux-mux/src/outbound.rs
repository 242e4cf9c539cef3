use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, warn};
use uartmux_frame::{FrameWriter, HEADER_SIZE, TRAILER_SIZE};
use uartmux_link::Endpoint;

use crate::context::{MuxContext, MuxEvent, ShutdownSignal};
use crate::error::{frame_to_io, link_to_io, Direction, MuxError, Result, RouteError};
use crate::router::RouteTable;

const READ_CHUNK_SIZE: usize = 4096;

/// Encoded frames the link write queue holds before submitters block.
///
/// 64 full frames is about 3 s of traffic at 57600 baud.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(2);

/// Submission side of the link write queue.
///
/// Cheap to clone; every logical stream's poller holds one. Each queued
/// item is one complete encoded frame. The queue is bounded, so a stream
/// producing faster than the link drains is held back in `submit` and its
/// pty fills up instead of memory.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: SyncSender<Bytes>,
    table: Arc<RouteTable>,
    shutdown: ShutdownSignal,
}

impl OutboundQueue {
    /// Frame `payload` for `address` and queue it for the link.
    ///
    /// Blocks while the queue is full. Returns the number of frames queued,
    /// which is short of the frame count only when shutdown was requested
    /// while waiting; the rest are dropped.
    pub fn submit(&self, address: u8, payload: &[u8]) -> Result<usize> {
        let frames = self.table.route_outbound(address, payload)?;
        let mut queued = 0;
        for frame in frames {
            if !self.send(frame)? {
                debug!(address, queued, "shutdown while link queue full");
                break;
            }
            queued += 1;
        }
        Ok(queued)
    }

    /// Returns `Ok(false)` if shutdown was requested before there was room.
    fn send(&self, mut frame: Bytes) -> Result<bool> {
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return Ok(true),
                Err(TrySendError::Disconnected(_)) => return Err(MuxError::QueueClosed),
                Err(TrySendError::Full(back)) => {
                    if self.shutdown.is_requested() {
                        return Ok(false);
                    }
                    frame = back;
                    thread::sleep(FULL_QUEUE_BACKOFF);
                }
            }
        }
    }
}

/// Single owner of the link's write half.
///
/// Frames are written one at a time, whole, in queue order.
pub struct OutboundWriter<W> {
    writer: FrameWriter<W>,
    rx: Receiver<Bytes>,
    ctx: MuxContext,
}

impl<W: Write> OutboundWriter<W> {
    pub fn new(link: W, table: Arc<RouteTable>, ctx: MuxContext) -> (Self, OutboundQueue) {
        Self::with_depth(link, table, ctx, DEFAULT_QUEUE_DEPTH)
    }

    /// Like [`OutboundWriter::new`] with a queue of `depth` frames.
    pub fn with_depth(
        link: W,
        table: Arc<RouteTable>,
        ctx: MuxContext,
        depth: usize,
    ) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        let queue = OutboundQueue {
            tx,
            table,
            shutdown: ctx.shutdown().clone(),
        };
        let writer = Self {
            writer: FrameWriter::new(link),
            rx,
            ctx,
        };
        (writer, queue)
    }

    /// Run until shutdown is requested or the link fails.
    ///
    /// Frames still queued at shutdown are dropped.
    pub fn run(&mut self) -> Result<()> {
        debug!("outbound writer started");
        while !self.ctx.shutdown().is_requested() {
            if let Err(err) = self.step() {
                error!(error = %err, "outbound writer stopped");
                return Err(err);
            }
        }
        debug!("outbound writer stopped on shutdown");
        Ok(())
    }

    /// Write at most one queued frame, waiting up to the poll interval.
    ///
    /// Returns whether a frame was written.
    pub fn step(&mut self) -> Result<bool> {
        let encoded = match self.rx.recv_timeout(self.ctx.poll_interval()) {
            Ok(encoded) => encoded,
            Err(RecvTimeoutError::Timeout) => return Ok(false),
            Err(RecvTimeoutError::Disconnected) if self.ctx.shutdown().is_requested() => {
                return Ok(false)
            }
            Err(RecvTimeoutError::Disconnected) => return Err(MuxError::QueueClosed),
        };

        self.writer
            .write_encoded(&encoded)
            .map_err(|err| MuxError::link_fault(Direction::Outbound, frame_to_io(err)))?;
        self.ctx.emit(MuxEvent::FrameOut {
            address: encoded[1],
            len: encoded.len() - HEADER_SIZE - TRAILER_SIZE,
        });
        Ok(true)
    }
}

/// Reads one logical stream and queues its bytes for a fixed address.
pub struct StreamPoller<R> {
    address: u8,
    stream: R,
    queue: OutboundQueue,
    ctx: MuxContext,
    buf: Box<[u8; READ_CHUNK_SIZE]>,
}

impl<R: Endpoint> StreamPoller<R> {
    pub fn new(address: u8, stream: R, queue: OutboundQueue, ctx: MuxContext) -> Self {
        Self {
            address,
            stream,
            queue,
            ctx,
            buf: Box::new([0u8; READ_CHUNK_SIZE]),
        }
    }

    /// Run until shutdown, end-of-file or a stream fault.
    ///
    /// A stream fault is reported as an event and ends only this poller.
    /// An error is returned only when the link write queue has closed.
    pub fn run(&mut self) -> Result<()> {
        debug!(address = self.address, "stream poller started");
        while !self.ctx.shutdown().is_requested() {
            match self.step() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(address = self.address, "logical stream closed");
                    return Ok(());
                }
                Err(MuxError::QueueClosed) => return Err(MuxError::QueueClosed),
                Err(err) => {
                    self.ctx.emit(MuxEvent::StreamFault {
                        address: self.address,
                        direction: Direction::Outbound,
                        error: err.to_string(),
                    });
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// One iteration: wait for input, read once, queue what was read.
    ///
    /// Returns `Some(frames queued)`, or `None` at end-of-file.
    pub fn step(&mut self) -> Result<Option<usize>> {
        let ready = self
            .stream
            .wait_readable(self.ctx.poll_interval())
            .map_err(|err| self.fault(link_to_io(err)))?;
        if !ready {
            return Ok(Some(0));
        }

        let n = match self.stream.read(&mut self.buf[..]) {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(err)
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) =>
            {
                return Ok(Some(0))
            }
            Err(err) => return Err(self.fault(err)),
        };

        match self.queue.submit(self.address, &self.buf[..n]) {
            Ok(frames) => Ok(Some(frames)),
            Err(MuxError::QueueClosed) => Err(MuxError::QueueClosed),
            Err(err) => {
                warn!(address = self.address, error = %err, "could not queue stream data");
                Err(err)
            }
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    fn fault(&self, source: std::io::Error) -> MuxError {
        RouteError::StreamFault {
            address: self.address,
            source,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use bytes::BytesMut;
    use uartmux_frame::{Decoded, Decoder, Frame};

    use super::*;
    use crate::context::testing::recording_context;

    fn table(n: usize) -> Arc<RouteTable> {
        Arc::new(RouteTable::new((0..n).map(|i| format!("port{i}"))).unwrap())
    }

    fn decode_all(wire: &[u8]) -> Vec<Frame> {
        let mut src = BytesMut::from(wire);
        let mut decoder = Decoder::new();
        let mut frames = Vec::new();
        loop {
            match decoder.decode_next(&mut src) {
                Decoded::Frame(frame) => frames.push(frame),
                Decoded::Incomplete => break,
                Decoded::Invalid(m) => panic!("unexpected malformed frame: {m}"),
            }
        }
        frames
    }

    #[test]
    fn submit_queues_one_item_per_frame() {
        let (ctx, _recorder) = recording_context();
        let (mut writer, queue) = OutboundWriter::new(Vec::new(), table(2), ctx.clone());

        assert_eq!(queue.submit(1, &[7u8; 600]).unwrap(), 3);
        while writer.step().unwrap() {}

        let frames = decode_all(writer.writer.get_ref());
        let lengths: Vec<usize> = frames.iter().map(|f| f.payload.len()).collect();
        assert_eq!(lengths, vec![255, 255, 90]);

        let stats = ctx.stats().snapshot();
        assert_eq!(stats.frames_out, 3);
        assert_eq!(stats.bytes_out, 600);
    }

    #[test]
    fn submit_rejects_unknown_address() {
        let (ctx, _recorder) = recording_context();
        let (mut writer, queue) = OutboundWriter::new(Vec::new(), table(1), ctx);

        assert!(queue.submit(1, b"x").is_err());
        assert!(!writer.step().unwrap());
        assert!(writer.writer.get_ref().is_empty());
    }

    #[test]
    fn submit_after_writer_dropped_is_queue_closed() {
        let (ctx, _recorder) = recording_context();
        let (writer, queue) = OutboundWriter::new(Vec::new(), table(1), ctx);
        drop(writer);

        assert!(matches!(queue.submit(0, b"x"), Err(MuxError::QueueClosed)));
    }

    #[test]
    fn submit_blocks_while_queue_is_full() {
        let (ctx, _recorder) = recording_context();
        let (mut writer, queue) = OutboundWriter::with_depth(Vec::new(), table(1), ctx, 2);

        assert_eq!(queue.submit(0, &[1u8; 510]).unwrap(), 2);

        let (done_tx, done_rx) = mpsc::channel();
        let blocked = queue.clone();
        let submitter = std::thread::spawn(move || {
            let result = blocked.submit(0, b"third");
            done_tx.send(()).unwrap();
            result
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert!(writer.step().unwrap());
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("submit should finish once a slot frees up");
        assert_eq!(submitter.join().unwrap().unwrap(), 1);

        while writer.step().unwrap() {}
        let frames = decode_all(writer.writer.get_ref());
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].payload, &b"third"[..]);
    }

    #[test]
    fn full_queue_gives_way_to_shutdown() {
        let (ctx, _recorder) = recording_context();
        let (writer, queue) = OutboundWriter::with_depth(Vec::new(), table(1), ctx.clone(), 1);
        assert_eq!(queue.submit(0, b"fills").unwrap(), 1);

        let blocked = queue.clone();
        let submitter = std::thread::spawn(move || blocked.submit(0, &[2u8; 600]));
        std::thread::sleep(Duration::from_millis(50));
        ctx.shutdown().request();

        assert_eq!(submitter.join().unwrap().unwrap(), 0);
        drop(writer);
    }

    #[test]
    fn write_failure_is_outbound_link_fault() {
        let (ctx, _recorder) = recording_context();
        let (device, link) = UnixStream::pair().unwrap();
        drop(device);
        let (mut writer, queue) = OutboundWriter::new(link, table(1), ctx);

        queue.submit(0, b"lost").unwrap();
        let err = writer.run().unwrap_err();
        assert!(matches!(
            err,
            MuxError::LinkFault {
                direction: Direction::Outbound,
                ..
            }
        ));
    }

    #[test]
    fn concurrent_pollers_never_tear_frames() {
        let (ctx, _recorder) = recording_context();
        let (mut device, link) = UnixStream::pair().unwrap();
        device
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (mut writer, queue) = OutboundWriter::new(link, table(4), ctx.clone());

        let mut apps = Vec::new();
        let mut pollers = Vec::new();
        for address in 0..4u8 {
            let (app, mux) = UnixStream::pair().unwrap();
            apps.push(app);
            let mut poller = StreamPoller::new(address, mux, queue.clone(), ctx.clone());
            pollers.push(std::thread::spawn(move || poller.run()));
        }
        let writer_thread = std::thread::spawn(move || writer.run());

        let chunk = 300usize;
        for round in 0..8 {
            for (address, app) in apps.iter_mut().enumerate() {
                let data = vec![(address * 16 + round) as u8; chunk];
                app.write_all(&data).unwrap();
            }
        }

        let total = 4 * 8 * chunk;
        let mut received = Vec::new();
        let mut per_address = [0usize; 4];
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 4096];
        while per_address.iter().sum::<usize>() < total {
            let n = device.read(&mut buf).unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
            let mut src = BytesMut::from(&received[..]);
            received.clear();
            loop {
                match decoder.decode_next(&mut src) {
                    Decoded::Frame(frame) => {
                        let address = frame.address as usize;
                        assert!(address < 4);
                        assert!(frame
                            .payload
                            .iter()
                            .all(|b| (*b as usize) / 16 == address));
                        per_address[address] += frame.payload.len();
                    }
                    Decoded::Invalid(m) => panic!("torn frame: {m}"),
                    Decoded::Incomplete => break,
                }
            }
            received.extend_from_slice(&src);
        }
        assert_eq!(per_address, [8 * chunk; 4]);

        ctx.shutdown().request();
        for poller in pollers {
            poller.join().unwrap().unwrap();
        }
        writer_thread.join().unwrap().unwrap();
        drop(queue);
    }

    #[test]
    fn poller_stops_at_stream_eof() {
        let (ctx, recorder) = recording_context();
        let (writer, queue) = OutboundWriter::new(Vec::new(), table(1), ctx.clone());
        let (app, mux) = UnixStream::pair().unwrap();
        drop(app);

        let mut poller = StreamPoller::new(0, mux, queue, ctx);
        assert!(poller.run().is_ok());
        assert!(recorder.events().is_empty());
        drop(writer);
    }

    #[test]
    fn poller_reports_queue_closed() {
        let (ctx, _recorder) = recording_context();
        let (writer, queue) = OutboundWriter::new(Vec::new(), table(1), ctx.clone());
        drop(writer);
        let (mut app, mux) = UnixStream::pair().unwrap();
        app.write_all(b"data").unwrap();

        let mut poller = StreamPoller::new(0, mux, queue, ctx);
        assert!(matches!(poller.run(), Err(MuxError::QueueClosed)));
    }
}
