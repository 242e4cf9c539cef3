use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::Crc8;
use crate::error::{FrameError, Result};

/// Start-of-frame marker.
pub const START: u8 = 0xAA;

/// Frame header: start (1) + address (1) + length (1) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Frame trailer: checksum (1).
pub const TRAILER_SIZE: usize = 1;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Largest possible frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD + TRAILER_SIZE;

/// An addressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The logical stream this payload belongs to.
    pub address: u8,
    /// The payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(address: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    /// The checksum this frame carries on the wire.
    pub fn checksum(&self) -> u8 {
        frame_checksum(self.address, &self.payload)
    }

    /// The total wire size of this frame (header + payload + trailer).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }
}

/// CRC-8 over `address ‖ length ‖ payload`.
///
/// `payload` must already satisfy the length bound; only the low byte of the
/// length is folded in.
pub fn frame_checksum(address: u8, payload: &[u8]) -> u8 {
    let mut crc = Crc8::new();
    crc.push(address);
    crc.push(payload.len() as u8);
    crc.update(payload);
    crc.finish()
}

fn check_payload(payload: &[u8]) -> Result<()> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return Err(FrameError::OversizedPayload {
            size: payload.len(),
        });
    }
    Ok(())
}

/// Encode one frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬──────────┬─────────────────┬──────────┐
/// │ Start    │ Address  │ Length   │ Payload         │ Checksum │
/// │ 0xAA     │ (1B)     │ (1B)     │ (Length bytes)  │ CRC-8    │
/// └──────────┴──────────┴──────────┴─────────────────┴──────────┘
/// ```
///
/// Fails with [`FrameError::OversizedPayload`] for an empty payload or one
/// longer than [`MAX_PAYLOAD`]; `dst` is untouched in that case.
pub fn encode_frame(address: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    check_payload(payload)?;
    dst.reserve(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    dst.put_u8(START);
    dst.put_u8(address);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    dst.put_u8(frame_checksum(address, payload));
    Ok(())
}

/// Encode a single frame into a fresh buffer.
pub fn encode(address: u8, payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    encode_frame(address, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode `data` as consecutive frames of at most [`MAX_PAYLOAD`] bytes.
///
/// Chunks keep the original byte order. Returns the number of frames
/// written.
pub fn encode_chunked(address: u8, data: &[u8], dst: &mut BytesMut) -> Result<usize> {
    if data.is_empty() {
        return Err(FrameError::OversizedPayload { size: 0 });
    }

    let frames = data.len().div_ceil(MAX_PAYLOAD);
    dst.reserve(data.len() + frames * (HEADER_SIZE + TRAILER_SIZE));
    for chunk in data.chunks(MAX_PAYLOAD) {
        encode_frame(address, chunk, dst)?;
    }
    Ok(frames)
}
