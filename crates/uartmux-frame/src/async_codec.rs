//! `tokio_util` codec over the uartmux wire format.

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame};
use crate::decoder::{Decoded, Decoder};
use crate::error::{FrameError, Malformed};

/// Codec for `FramedRead`/`FramedWrite`.
///
/// Rejected frames are yielded as `Err(Malformed)` items rather than stream
/// errors, so a single corrupted frame never ends the stream.
#[derive(Debug, Default)]
pub struct MuxCodec {
    decoder: Decoder,
}

impl MuxCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The decoder driving this codec.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }
}

impl tokio_util::codec::Decoder for MuxCodec {
    type Item = Result<Frame, Malformed>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decoder.decode_next(src) {
            Decoded::Frame(frame) => Ok(Some(Ok(frame))),
            Decoded::Invalid(malformed) => Ok(Some(Err(malformed))),
            Decoded::Incomplete => Ok(None),
        }
    }
}

impl tokio_util::codec::Encoder<Frame> for MuxCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(item.address, &item.payload, dst)
    }
}
