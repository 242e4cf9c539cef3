use crate::codec::MAX_PAYLOAD;

/// Why a received frame was rejected.
///
/// Always recoverable: the decoder has already reset and the next frame on
/// the wire can be parsed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Malformed {
    /// The length byte was zero; every frame carries at least one byte.
    #[error("zero-length frame for address {address}")]
    ZeroLength { address: u8 },

    /// The trailing checksum does not match the received bytes.
    #[error(
        "checksum mismatch for address {address} (computed {expected:#04x}, received {actual:#04x})"
    )]
    ChecksumMismatch { address: u8, expected: u8, actual: u8 },
}

impl Malformed {
    /// The address byte of the rejected frame.
    pub fn address(&self) -> u8 {
        match self {
            Malformed::ZeroLength { address } | Malformed::ChecksumMismatch { address, .. } => {
                *address
            }
        }
    }
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload is empty or does not fit in a single frame.
    #[error("payload must be 1..={max} bytes (got {size})", max = MAX_PAYLOAD)]
    OversizedPayload { size: usize },

    /// A frame was received but rejected.
    #[error("malformed frame: {0}")]
    Malformed(#[from] Malformed),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte source reached end-of-file.
    #[error("link closed")]
    LinkClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
