use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{Frame, MAX_FRAME_SIZE};
use crate::decoder::{Decoded, Decoder};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * MAX_FRAME_SIZE;
const READ_CHUNK_SIZE: usize = 1024;

/// Drives a [`Decoder`] over any `Read` byte source.
///
/// Two ways to use it:
/// - [`FrameReader::read_frame`] blocks until the next valid frame and
///   reports rejected frames as [`FrameError::Malformed`].
/// - [`FrameReader::fill`] + [`FrameReader::next_decoded`] for callers that
///   poll the source themselves and want every outcome.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: Decoder,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decoder: Decoder::new(),
        }
    }

    /// Read the next valid frame (blocking).
    ///
    /// A rejected frame returns `Err(FrameError::Malformed)`; the reader
    /// stays usable and the next call continues with the following bytes.
    /// Returns `Err(FrameError::LinkClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match self.next_decoded() {
                Decoded::Frame(frame) => return Ok(frame),
                Decoded::Invalid(malformed) => return Err(FrameError::Malformed(malformed)),
                Decoded::Incomplete => {
                    self.read_chunk()?;
                }
            }
        }
    }

    /// Perform one read from the source into the internal buffer.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the source had
    /// nothing ready (`WouldBlock`). End-of-file is
    /// [`FrameError::LinkClosed`].
    pub fn fill(&mut self) -> Result<usize> {
        match self.read_chunk() {
            Err(FrameError::Io(err)) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            other => other,
        }
    }

    /// Decode the next outcome from already buffered bytes.
    pub fn next_decoded(&mut self) -> Decoded {
        self.decoder.decode_next(&mut self.buf)
    }

    fn read_chunk(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::LinkClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// The decoder driving this reader.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Bytes read from the source but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying source.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner source.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
