//! Addressed, checksummed framing for a multiplexed serial link.
//!
//! Every message on the wire is framed as:
//! - a 1-byte start marker (`0xAA`) for resynchronization
//! - a 1-byte destination address
//! - a 1-byte payload length (1-255)
//! - the payload
//! - a 1-byte CRC-8 over address, length and payload
//!
//! The decoder is resumable and drops garbage until the next start marker,
//! so one corrupted frame never takes the link down.

pub mod checksum;
pub mod codec;
pub mod decoder;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::MuxCodec;
pub use checksum::{crc8, Crc8};
pub use codec::{
    encode, encode_chunked, encode_frame, frame_checksum, Frame, HEADER_SIZE, MAX_FRAME_SIZE,
    MAX_PAYLOAD, START, TRAILER_SIZE,
};
pub use decoder::{DecodeState, Decoded, Decoder};
pub use error::{FrameError, Malformed, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
