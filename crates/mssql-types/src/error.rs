//! Type codec error types.

use thiserror::Error;

/// Errors from encoding or decoding SQL values.
#[derive(Debug, Clone, Error)]
pub enum TypeError {
    /// Buffer ended before a complete value could be read.
    #[error("buffer too small: needed {needed}, available {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A length prefix or payload was inconsistent with the declared type.
    #[error("invalid {what} value: {detail}")]
    InvalidValue {
        /// Type being decoded.
        what: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// Text payload was not valid for its declared encoding.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// A value cannot be represented in the target column type.
    #[error("cannot encode {value} as {target}")]
    Conversion {
        /// Source value description.
        value: String,
        /// Target column type description.
        target: String,
    },

    /// NaN or infinite floats have no SQL Server representation.
    #[error("non-finite float values cannot be sent to SQL Server")]
    NonFiniteFloat,
}

impl TypeError {
    /// True when more bytes may turn this error into a successful decode.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::BufferTooSmall { .. })
    }
}
