use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_chunked, encode_frame, Frame, MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * MAX_FRAME_SIZE;

/// Writes complete frames to any `Write` sink.
///
/// Every call writes whole frames before returning, so frames from one
/// writer are never interleaved on the wire.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.address, frame.payload.as_ref())
    }

    /// Encode and send a payload as a single frame.
    ///
    /// Payloads outside `1..=255` bytes are rejected before anything is
    /// written.
    pub fn send(&mut self, address: u8, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(address, payload, &mut self.buf)?;
        self.flush_buf()
    }

    /// Encode and send `data` as as many frames as needed.
    ///
    /// Returns the number of frames written.
    pub fn send_chunked(&mut self, address: u8, data: &[u8]) -> Result<usize> {
        self.buf.clear();
        let frames = encode_chunked(address, data, &mut self.buf)?;
        self.flush_buf()?;
        Ok(frames)
    }

    /// Write bytes that are already framed.
    pub fn write_encoded(&mut self, encoded: &[u8]) -> Result<()> {
        self.write_all(encoded)?;
        self.flush()
    }

    fn flush_buf(&mut self) -> Result<()> {
        let buf = std::mem::take(&mut self.buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result?;
        self.flush()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::LinkClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying sink.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner sink.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::codec::{encode, MAX_PAYLOAD};
    use crate::decoder::{Decoded, Decoder};

    fn decode_all(wire: Vec<u8>) -> Vec<Frame> {
        let mut src = Bytes::from(wire);
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
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(1, b"hello").unwrap();

        let frames = decode_all(writer.into_inner().into_inner());
        assert_eq!(frames, vec![Frame::new(1, &b"hello"[..])]);
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(0, b"one").unwrap();
        writer.send(2, b"two").unwrap();
        writer.write_frame(&Frame::new(3, "three")).unwrap();

        let frames = decode_all(writer.into_inner().into_inner());
        assert_eq!(
            frames,
            vec![
                Frame::new(0, &b"one"[..]),
                Frame::new(2, &b"two"[..]),
                Frame::new(3, &b"three"[..]),
            ]
        );
    }

    #[test]
    fn oversized_payload_rejected_before_write() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let err = writer.send(1, &[0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(err, FrameError::OversizedPayload { .. }));
        let err = writer.send(1, b"").unwrap_err();
        assert!(matches!(err, FrameError::OversizedPayload { size: 0 }));

        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn send_chunked_splits_in_order() {
        let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        assert_eq!(writer.send_chunked(9, &data).unwrap(), 3);

        let frames = decode_all(writer.into_inner().into_inner());
        let lengths: Vec<usize> = frames.iter().map(|f| f.payload.len()).collect();
        assert_eq!(lengths, vec![255, 255, 90]);
        assert!(frames.iter().all(|f| f.address == 9));
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn write_encoded_passes_bytes_through() {
        let encoded = encode(4, b"pre").unwrap();
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.write_encoded(&encoded).unwrap();

        assert_eq!(writer.into_inner().into_inner(), encoded.to_vec());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(1, b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = FrameWriter::new(cursor);

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.send(5, b"retry").unwrap();

        let inner = writer.into_inner();
        assert_eq!(decode_all(inner.data), vec![Frame::new(5, &b"retry"[..])]);
    }

    #[test]
    fn link_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::LinkClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn written_bytes_decode_through_reader() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(3, b"z").unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::FrameReader::new(Cursor::new(wire));
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.address, 3);
        assert_eq!(frame.payload.as_ref(), b"z");
    }
}
