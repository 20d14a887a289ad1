//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding TDS protocol data.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Packet type byte is not a known TDS packet type.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet status byte contains undefined bits.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Packet header length field is out of range.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(usize),

    /// Buffer ended before a complete structure could be read.
    #[error("incomplete data: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Bytes required to continue.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Buffer ended unexpectedly.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Token type byte is not a known TDS token.
    #[error("unknown token type: 0x{0:02X}")]
    UnknownToken(u8),

    /// A known token carried data that cannot be interpreted.
    #[error("malformed {token} token: {detail}")]
    MalformedToken {
        /// Token name.
        token: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// TYPE_INFO referenced a type this engine does not support.
    #[error("unsupported column type: 0x{0:02X}")]
    UnsupportedType(u8),

    /// PRELOGIN option byte is not defined.
    #[error("invalid prelogin option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Text on the wire was not valid UTF-16LE.
    #[error("invalid UTF-16 string: {0}")]
    StringEncoding(String),
}

impl ProtocolError {
    /// True when more bytes may turn this error into a successful parse.
    ///
    /// The incremental token reader uses this to distinguish "wait for the
    /// next packet" from a genuinely corrupt stream.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. } | Self::UnexpectedEof)
    }
}
