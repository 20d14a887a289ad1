//! SQL batch request encoding.
//!
//! A SQL batch payload (packet type 0x01) is the ALL_HEADERS section required
//! by TDS 7.2+ followed by the statement text in UTF-16LE. The transaction
//! descriptor header ties the batch to an explicit transaction; zero means
//! auto-commit.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;

/// Encode a SQL batch payload.
///
/// `transaction_descriptor` must be the 8-byte value captured from the
/// BeginTransaction ENVCHANGE when the batch runs inside an explicit
/// transaction, and 0 otherwise.
#[must_use]
pub fn encode_sql_batch(sql: &str, transaction_descriptor: u64) -> Bytes {
    // ALL_HEADERS (22 bytes) + UTF-16LE SQL.
    let mut buf = BytesMut::with_capacity(22 + sql.len() * 2);

    // ALL_HEADERS: total length, then one transaction-descriptor header:
    // HeaderLength(4) + HeaderType(2) + Descriptor(8) + OutstandingRequests(4).
    buf.put_u32_le(22);
    buf.put_u32_le(18);
    buf.put_u16_le(0x0002);
    buf.put_u64_le(transaction_descriptor);
    buf.put_u32_le(1);

    write_utf16_string(&mut buf, sql);

    buf.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn headers_then_utf16_sql() {
        let payload = encode_sql_batch("SELECT 1", 0);

        // ALL_HEADERS total length.
        assert_eq!(u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]), 22);
        // Header type at offset 8.
        assert_eq!(u16::from_le_bytes([payload[8], payload[9]]), 0x0002);
        // SQL text follows as UTF-16LE.
        assert_eq!(&payload[22..26], &[b'S', 0, b'E', 0]);
        assert_eq!(payload.len(), 22 + "SELECT 1".len() * 2);
    }

    #[test]
    fn transaction_descriptor_embedded() {
        let payload = encode_sql_batch("COMMIT", 0x0102_0304_0506_0708);
        let descriptor = u64::from_le_bytes([
            payload[10], payload[11], payload[12], payload[13],
            payload[14], payload[15], payload[16], payload[17],
        ]);
        assert_eq!(descriptor, 0x0102_0304_0506_0708);
    }
}
