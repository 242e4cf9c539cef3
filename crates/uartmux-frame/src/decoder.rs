//! Resumable frame decoder.
//!
//! The decoder is an explicit five-state machine that consumes whatever
//! bytes are available and keeps its position across calls, so a frame may
//! arrive split over any number of reads. Bytes seen while waiting for the
//! start marker are dropped; that is how the decoder resynchronizes after
//! line noise.
//!
//! A rejected frame may have swallowed the start of the frames behind it
//! (a corrupted length byte is enough). Its bytes after the start marker
//! are therefore rescanned before any new input is consumed, so the next
//! well-formed frame is never lost.

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::checksum::Crc8;
use crate::codec::{Frame, MAX_PAYLOAD, START};
use crate::error::Malformed;

/// Which field the decoder expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    AwaitStart,
    ReadAddress,
    ReadLength,
    ReadPayload,
    ReadChecksum,
}

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame with a valid checksum.
    Frame(Frame),
    /// The source ran dry mid-frame (or before a start marker); call again
    /// once more bytes are available.
    Incomplete,
    /// A frame was rejected; the decoder is back in [`DecodeState::AwaitStart`].
    Invalid(Malformed),
}

/// Stateful decoder for the uartmux wire format.
#[derive(Debug)]
pub struct Decoder {
    state: DecodeState,
    address: u8,
    length: usize,
    payload: BytesMut,
    crc: Crc8,
    discarded: u64,
    /// Bytes of rejected frames waiting to be rescanned.
    replay: BytesMut,
    replaying: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::AwaitStart,
            address: 0,
            length: 0,
            payload: BytesMut::with_capacity(MAX_PAYLOAD),
            crc: Crc8::new(),
            discarded: 0,
            replay: BytesMut::new(),
            replaying: false,
        }
    }

    /// The field expected next.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Total input bytes dropped while hunting for a start marker.
    ///
    /// Bytes of a rejected frame are reported through [`Decoded::Invalid`]
    /// and are not counted again when rescanned.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Abandon any partially received frame and pending rescan bytes.
    pub fn reset(&mut self) {
        self.replay.clear();
        self.restart();
    }

    fn restart(&mut self) {
        self.state = DecodeState::AwaitStart;
        self.address = 0;
        self.length = 0;
        self.payload.clear();
        self.crc = Crc8::new();
    }

    /// Consume bytes from `src` until one frame attempt completes or `src`
    /// runs dry.
    ///
    /// Never consumes bytes past the end of the attempted frame, so repeated
    /// calls on the same buffer yield frames in wire order.
    pub fn decode_next<B: Buf>(&mut self, src: &mut B) -> Decoded {
        while !self.replay.is_empty() {
            let mut pending = self.replay.split().freeze();
            self.replaying = true;
            let outcome = self.advance(&mut pending);
            self.replaying = false;
            // A nested rejection queued its own bytes; the unscanned rest follows them.
            self.replay.extend_from_slice(&pending);
            if !matches!(outcome, Decoded::Incomplete) {
                return outcome;
            }
        }
        self.advance(src)
    }

    fn advance<B: Buf>(&mut self, src: &mut B) -> Decoded {
        loop {
            match self.state {
                DecodeState::AwaitStart => {
                    let chunk = src.chunk();
                    if chunk.is_empty() {
                        return Decoded::Incomplete;
                    }
                    match chunk.iter().position(|&b| b == START) {
                        Some(pos) => {
                            self.note_discarded(pos);
                            src.advance(pos + 1);
                            self.state = DecodeState::ReadAddress;
                        }
                        None => {
                            let len = chunk.len();
                            self.note_discarded(len);
                            src.advance(len);
                        }
                    }
                }
                DecodeState::ReadAddress => {
                    if !src.has_remaining() {
                        return Decoded::Incomplete;
                    }
                    self.address = src.get_u8();
                    self.crc = Crc8::new();
                    self.crc.push(self.address);
                    self.state = DecodeState::ReadLength;
                }
                DecodeState::ReadLength => {
                    if !src.has_remaining() {
                        return Decoded::Incomplete;
                    }
                    let length = src.get_u8();
                    if length == 0 {
                        let address = self.address;
                        self.restart();
                        self.replay.put_u8(address);
                        self.replay.put_u8(0);
                        return Decoded::Invalid(Malformed::ZeroLength { address });
                    }
                    self.crc.push(length);
                    self.length = length as usize;
                    self.payload.clear();
                    self.state = DecodeState::ReadPayload;
                }
                DecodeState::ReadPayload => {
                    let wanted = self.length - self.payload.len();
                    let mut take = wanted.min(src.remaining());
                    if take == 0 {
                        return Decoded::Incomplete;
                    }
                    while take > 0 {
                        let chunk = src.chunk();
                        let n = take.min(chunk.len());
                        self.crc.update(&chunk[..n]);
                        self.payload.extend_from_slice(&chunk[..n]);
                        src.advance(n);
                        take -= n;
                    }
                    if self.payload.len() == self.length {
                        self.state = DecodeState::ReadChecksum;
                    }
                }
                DecodeState::ReadChecksum => {
                    if !src.has_remaining() {
                        return Decoded::Incomplete;
                    }
                    let received = src.get_u8();
                    let computed = self.crc.finish();
                    let address = self.address;
                    let payload = self.payload.split().freeze();
                    let length = self.length as u8;
                    self.restart();

                    if received != computed {
                        self.replay.put_u8(address);
                        self.replay.put_u8(length);
                        self.replay.extend_from_slice(&payload);
                        self.replay.put_u8(received);
                        return Decoded::Invalid(Malformed::ChecksumMismatch {
                            address,
                            expected: computed,
                            actual: received,
                        });
                    }
                    return Decoded::Frame(Frame { address, payload });
                }
            }
        }
    }

    fn note_discarded(&mut self, count: usize) {
        if count > 0 && !self.replaying {
            self.discarded = self.discarded.saturating_add(count as u64);
            trace!(count, "discarded bytes while awaiting start marker");
        }
    }
}
