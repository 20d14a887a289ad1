//! SQL Server collation words.
//!
//! Character columns carry a 5-byte collation in TYPE_INFO: a 4-byte little
//! endian word packing LCID and comparison flags, plus a sort id. The engine
//! only needs the LCID (to pick a code page for single-byte data) and the
//! case-sensitivity flag (exposed through catalog metadata).

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Bit set in the collation word for UTF-8 collations (SQL Server 2019+).
const UTF8_FLAG: u32 = 0x0800_0000;

/// Case-insensitive comparison flag inside the collation word.
const IGNORE_CASE_FLAG: u32 = 0x0010_0000;

/// A 5-byte SQL Server collation as carried in TYPE_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// Packed LCID + flags word.
    pub info: u32,
    /// Sort id (non-zero selects a legacy SQL sort order).
    pub sort_id: u8,
}

impl Collation {
    /// Wire size of a collation.
    pub const SIZE: usize = 5;

    /// Decode a collation from TYPE_INFO bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::Incomplete {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            info: src.get_u32_le(),
            sort_id: src.get_u8(),
        })
    }

    /// Encode the collation into TYPE_INFO bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }

    /// Locale id (lower 20 bits of the collation word).
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & 0x000F_FFFF
    }

    /// Whether this collation stores single-byte data as UTF-8.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        (self.info & UTF8_FLAG) != 0
    }

    /// Whether comparisons under this collation are case-sensitive.
    #[must_use]
    pub const fn is_case_sensitive(&self) -> bool {
        (self.info & IGNORE_CASE_FLAG) == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn roundtrip() {
        // Latin1_General_CI_AS: LCID 0x409, ignore-case + ignore-kana flags.
        let collation = Collation {
            info: 0x0009_0409 | 0x0010_0000,
            sort_id: 0,
        };
        let mut buf = BytesMut::new();
        collation.encode(&mut buf);
        assert_eq!(buf.len(), Collation::SIZE);

        let mut cursor = buf.freeze();
        let decoded = Collation::decode(&mut cursor).unwrap();
        assert_eq!(decoded, collation);
        assert_eq!(decoded.lcid(), 0x0009_0409 & 0x000F_FFFF);
        assert!(!decoded.is_case_sensitive());
    }

    #[test]
    fn utf8_flag() {
        let collation = Collation {
            info: 0x0409 | 0x0800_0000,
            sort_id: 0,
        };
        assert!(collation.is_utf8());
    }
}
