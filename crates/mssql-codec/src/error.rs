//! Codec error types.

use thiserror::Error;

/// Errors from the packet framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying transport failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet header failed validation.
    #[error("invalid packet header: {0}")]
    InvalidHeader(#[from] tds_protocol::ProtocolError),

    /// Packet length exceeds the negotiated maximum.
    #[error("packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge {
        /// Claimed packet size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// The peer closed the stream in the middle of a message.
    #[error("connection closed mid-message")]
    ClosedMidMessage,
}
