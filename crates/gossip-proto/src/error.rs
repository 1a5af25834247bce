//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding packets.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// Unknown packet discriminant.
    #[error("Unknown packet discriminant: {0}")]
    UnknownDiscriminant(u8),

    /// Input ended before the packet was complete.
    #[error("Truncated packet while reading {0}")]
    Truncated(&'static str),

    /// Packet exceeds the maximum allowed size.
    #[error("Packet too large: {size} bytes, max {max} bytes")]
    PacketTooLarge { size: usize, max: usize },

    /// A string field was not valid UTF-8.
    #[error("Invalid UTF-8 in field {0}")]
    InvalidUtf8(&'static str),
}

/// Result type for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;
