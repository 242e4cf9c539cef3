use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use uartmux_frame::{encode_frame, FrameError, HEADER_SIZE, MAX_PAYLOAD, TRAILER_SIZE};
use uartmux_link::Endpoint;

use crate::error::{link_to_io, MuxError, Result, RouteError};

/// How long delivery waits for a full logical stream to drain.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// One configured logical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Protocol address (the route's index in the table).
    pub address: u8,
    /// Human-readable name, typically the published symlink path.
    pub name: String,
}

/// Address → logical stream table.
///
/// Addresses are dense and 0-based: the n-th configured stream answers to
/// address n. Built once and shared read-only by both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Largest number of routes an 8-bit address can reach.
    pub const MAX_ROUTES: usize = u8::MAX as usize + 1;

    /// Build a table from stream names in address order.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() > Self::MAX_ROUTES {
            return Err(MuxError::Config(format!(
                "{} routes configured, at most {} are addressable",
                names.len(),
                Self::MAX_ROUTES
            )));
        }

        let routes = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Route {
                address: index as u8,
                name,
            })
            .collect();
        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Look up the route for `address`.
    pub fn resolve(&self, address: u8) -> std::result::Result<&Route, RouteError> {
        self.routes
            .get(address as usize)
            .ok_or(RouteError::Unroutable {
                address,
                routes: self.routes.len(),
            })
    }

    /// Frame `payload` for the physical link.
    ///
    /// Payloads longer than one frame are split into consecutive frames in
    /// order, each with its own checksum. Returns one encoded buffer per
    /// frame so each can be written to the link in a single piece.
    pub fn route_outbound(&self, address: u8, payload: &[u8]) -> Result<Vec<Bytes>> {
        self.resolve(address)?;
        if payload.is_empty() {
            return Err(FrameError::OversizedPayload { size: 0 }.into());
        }

        let frames = payload.len().div_ceil(MAX_PAYLOAD);
        let mut buf =
            BytesMut::with_capacity(payload.len() + frames * (HEADER_SIZE + TRAILER_SIZE));
        let mut out = Vec::with_capacity(frames);
        for chunk in payload.chunks(MAX_PAYLOAD) {
            encode_frame(address, chunk, &mut buf)?;
            out.push(buf.split().freeze());
        }
        Ok(out)
    }
}

/// Delivers inbound payloads to logical streams by address.
///
/// Holds the write side of every logical stream, in table order. Streams
/// may be non-blocking; a payload is then delivered whole by waiting for
/// the consumer to drain, up to the write timeout per wait.
pub struct Router<W> {
    table: Arc<RouteTable>,
    streams: Vec<W>,
    write_timeout: Duration,
}

impl<W: Endpoint> Router<W> {
    /// Pair a table with one writable stream per route.
    pub fn new(table: Arc<RouteTable>, streams: Vec<W>) -> Result<Self> {
        if streams.len() != table.len() {
            return Err(MuxError::Config(format!(
                "{} streams supplied for {} routes",
                streams.len(),
                table.len()
            )));
        }
        Ok(Self {
            table,
            streams,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Resolve `address` to its stream.
    pub fn resolve(&mut self, address: u8) -> std::result::Result<&mut W, RouteError> {
        let routes = self.streams.len();
        self.streams
            .get_mut(address as usize)
            .ok_or(RouteError::Unroutable { address, routes })
    }

    /// Write `payload` verbatim to the stream at `address`.
    ///
    /// A stream that fails or stays full before any byte is written gets
    /// nothing ([`RouteError::StreamFault`]). One that stalls part way is
    /// reported as [`RouteError::Truncated`] with the delivered count.
    pub fn route_inbound(
        &mut self,
        address: u8,
        payload: &[u8],
    ) -> std::result::Result<(), RouteError> {
        let timeout = self.write_timeout;
        let stream = self.resolve(address)?;
        match deliver(stream, payload, timeout) {
            Ok(()) => stream
                .flush()
                .map_err(|source| RouteError::StreamFault { address, source }),
            Err((0, source)) => Err(RouteError::StreamFault { address, source }),
            Err((delivered, source)) => Err(RouteError::Truncated {
                address,
                delivered,
                len: payload.len(),
                source,
            }),
        }
    }

    /// Frame `payload` for the physical link. See [`RouteTable::route_outbound`].
    pub fn route_outbound(&self, address: u8, payload: &[u8]) -> Result<Vec<Bytes>> {
        self.table.route_outbound(address, payload)
    }

    /// Swap in a new stream at `address`, returning the old one.
    ///
    /// The address and table slot stay fixed; only the backing endpoint
    /// changes (e.g. after a port is recreated).
    pub fn replace_stream(
        &mut self,
        address: u8,
        stream: W,
    ) -> std::result::Result<W, RouteError> {
        let slot = self.resolve(address)?;
        Ok(std::mem::replace(slot, stream))
    }
}

/// Write all of `payload`, waiting out `WouldBlock`.
///
/// On failure returns how many bytes made it out.
fn deliver<W: Endpoint>(
    stream: &mut W,
    payload: &[u8],
    timeout: Duration,
) -> std::result::Result<(), (usize, io::Error)> {
    let mut written = 0;
    while written < payload.len() {
        match stream.write(&payload[written..]) {
            Ok(0) => return Err((written, io::Error::from(ErrorKind::WriteZero))),
            Ok(n) => written += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                match stream.wait_writable(timeout) {
                    Ok(true) => {}
                    Ok(false) => {
                        let stalled = io::Error::new(
                            ErrorKind::TimedOut,
                            format!("stream did not drain within {timeout:?}"),
                        );
                        return Err((written, stalled));
                    }
                    Err(err) => return Err((written, link_to_io(err))),
                }
            }
            Err(err) => return Err((written, err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    use uartmux_frame::{frame_checksum, Decoded, Decoder, START};

    use super::*;

    fn table(n: usize) -> Arc<RouteTable> {
        Arc::new(RouteTable::new((0..n).map(|i| format!("/dev/port{i}"))).unwrap())
    }

    #[test]
    fn table_assigns_dense_addresses() {
        let table = RouteTable::new(["/dev/ttyNC0", "/dev/gps0", "/dev/imu0"]).unwrap();
        assert_eq!(table.len(), 3);
        let addresses: Vec<u8> = table.iter().map(|r| r.address).collect();
        assert_eq!(addresses, vec![0, 1, 2]);
        assert_eq!(table.resolve(1).unwrap().name, "/dev/gps0");
    }

    #[test]
    fn table_rejects_too_many_routes() {
        let err = RouteTable::new((0..257).map(|i| i.to_string())).unwrap_err();
        assert!(matches!(err, MuxError::Config(_)));
        assert!(RouteTable::new((0..256).map(|i| i.to_string())).is_ok());
    }

    #[test]
    fn address_zero_routes_to_first_stream() {
        let streams = vec![MemStream::open(), MemStream::open()];
        let mut router = Router::new(table(2), streams).unwrap();
        router.route_inbound(0, b"\x01\x02").unwrap();

        assert_eq!(router.streams[0].data, b"\x01\x02");
        assert!(router.streams[1].data.is_empty());
    }

    #[test]
    fn address_equal_to_table_size_is_unroutable() {
        let streams = vec![MemStream::open(), MemStream::open(), MemStream::open()];
        let mut router = Router::new(table(3), streams).unwrap();
        let err = router.route_inbound(3, b"lost").unwrap_err();

        assert!(matches!(
            err,
            RouteError::Unroutable {
                address: 3,
                routes: 3
            }
        ));
        assert!(router.streams.iter().all(|s| s.data.is_empty()));
    }

    #[test]
    fn stream_failure_is_reported_per_address() {
        let broken = MemStream {
            broken: true,
            ..MemStream::open()
        };
        let mut router = Router::new(table(2), vec![broken, MemStream::open()]).unwrap();

        let err = router.route_inbound(0, b"x").unwrap_err();
        assert!(matches!(err, RouteError::StreamFault { address: 0, .. }));

        router.route_inbound(1, b"still-works").unwrap();
        assert_eq!(router.streams[1].data, b"still-works");
    }

    #[test]
    fn slow_consumer_gets_whole_payload() {
        // Room for 100 bytes at a time; every wait frees another 100.
        let slow = MemStream::with_room(100, 100);
        let mut router = Router::new(table(1), vec![slow]).unwrap();

        router.route_inbound(0, &[7u8; 255]).unwrap();
        assert_eq!(router.streams[0].data, vec![7u8; 255]);
    }

    #[test]
    fn stalled_consumer_reports_truncation() {
        let stalled = MemStream::with_room(100, 0);
        let mut router = Router::new(table(1), vec![stalled])
            .unwrap()
            .with_write_timeout(Duration::from_millis(5));

        let err = router.route_inbound(0, &[7u8; 255]).unwrap_err();
        assert!(matches!(
            err,
            RouteError::Truncated {
                address: 0,
                delivered: 100,
                len: 255,
                ..
            }
        ));
        assert_eq!(router.streams[0].data.len(), 100);
    }

    #[test]
    fn full_consumer_gets_nothing() {
        let full = MemStream::with_room(0, 0);
        let mut router = Router::new(table(1), vec![full])
            .unwrap()
            .with_write_timeout(Duration::from_millis(5));

        let err = router.route_inbound(0, b"dropped").unwrap_err();
        assert!(matches!(err, RouteError::StreamFault { address: 0, .. }));
        assert!(router.streams[0].data.is_empty());
    }

    #[test]
    fn nonblocking_socket_waits_for_reader() {
        let (mut app, mux) = UnixStream::pair().unwrap();
        mux.set_nonblocking(true).unwrap();
        let mut router = Router::new(table(1), vec![mux])
            .unwrap()
            .with_write_timeout(Duration::from_secs(5));

        let payload = vec![3u8; 512 * 1024];
        let expected = payload.len();
        let reader = std::thread::spawn(move || {
            let mut got = Vec::new();
            let mut buf = [0u8; 8192];
            while got.len() < expected {
                let n = app.read(&mut buf).unwrap();
                assert!(n > 0);
                got.extend_from_slice(&buf[..n]);
            }
            got
        });

        router.route_inbound(0, &payload).unwrap();
        assert_eq!(reader.join().unwrap(), payload);
    }

    #[test]
    fn router_rejects_mismatched_streams() {
        let result = Router::new(table(2), vec![MemStream::open()]);
        assert!(matches!(result, Err(MuxError::Config(_))));
    }

    #[test]
    fn replace_stream_keeps_slot() {
        let old = MemStream {
            data: b"old".to_vec(),
            ..MemStream::open()
        };
        let mut router = Router::new(table(1), vec![old]).unwrap();
        let old = router.replace_stream(0, MemStream::open()).unwrap();
        assert_eq!(old.data, b"old");

        router.route_inbound(0, b"new").unwrap();
        assert_eq!(router.streams[0].data, b"new");
        assert!(router.replace_stream(1, MemStream::open()).is_err());
    }

    #[test]
    fn route_outbound_chunks_600_bytes() {
        let streams = vec![MemStream::open(), MemStream::open()];
        let router = Router::new(table(2), streams).unwrap();
        let data: Vec<u8> = (0..600u32).map(|i| (i * 7) as u8).collect();

        let frames = router.route_outbound(1, &data).unwrap();
        assert_eq!(frames.len(), 3);

        let mut decoder = Decoder::new();
        let mut joined = Vec::new();
        let mut lengths = Vec::new();
        for encoded in &frames {
            assert_eq!(encoded[0], START);
            let payload = &encoded[3..encoded.len() - 1];
            assert_eq!(*encoded.last().unwrap(), frame_checksum(1, payload));

            let mut src = encoded.clone();
            match decoder.decode_next(&mut src) {
                Decoded::Frame(frame) => {
                    assert_eq!(frame.address, 1);
                    lengths.push(frame.payload.len());
                    joined.extend_from_slice(&frame.payload);
                }
                other => panic!("unexpected decode outcome: {other:?}"),
            }
        }
        assert_eq!(lengths, vec![255, 255, 90]);
        assert_eq!(joined, data);
    }

    #[test]
    fn route_outbound_validates_address_and_payload() {
        let table = table(2);
        assert!(matches!(
            table.route_outbound(2, b"x"),
            Err(MuxError::Route(RouteError::Unroutable { address: 2, .. }))
        ));
        assert!(matches!(
            table.route_outbound(0, b""),
            Err(MuxError::Frame(FrameError::OversizedPayload { size: 0 }))
        ));
    }

    /// In-memory logical stream with an optional, refillable write window.
    struct MemStream {
        data: Vec<u8>,
        /// Bytes accepted before `WouldBlock`; `None` is unlimited.
        room: Cell<Option<usize>>,
        /// Room restored by each `wait_writable`; 0 never drains.
        refill: usize,
        broken: bool,
    }

    impl MemStream {
        fn open() -> Self {
            Self {
                data: Vec::new(),
                room: Cell::new(None),
                refill: 0,
                broken: false,
            }
        }

        fn with_room(room: usize, refill: usize) -> Self {
            Self {
                room: Cell::new(Some(room)),
                refill,
                ..Self::open()
            }
        }
    }

    impl Read for MemStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for MemStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::from(ErrorKind::BrokenPipe));
            }
            let n = match self.room.get() {
                None => buf.len(),
                Some(0) => return Err(io::Error::from(ErrorKind::WouldBlock)),
                Some(room) => {
                    let n = room.min(buf.len());
                    self.room.set(Some(room - n));
                    n
                }
            };
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Endpoint for MemStream {
        fn wait_readable(&self, _timeout: Duration) -> uartmux_link::Result<bool> {
            Ok(false)
        }

        fn wait_writable(&self, timeout: Duration) -> uartmux_link::Result<bool> {
            if self.refill > 0 {
                self.room.set(Some(self.refill));
                return Ok(true);
            }
            if self.room.get() == Some(0) {
                std::thread::sleep(timeout);
                return Ok(false);
            }
            Ok(true)
        }

        fn try_clone(&self) -> uartmux_link::Result<Self> {
            Err(io::Error::from(ErrorKind::Unsupported).into())
        }
    }
}
