//! TDS wire format decoding for SQL values.
//!
//! Values are decoded against the column's TYPE_INFO from COLMETADATA. The
//! decoders never read past declared lengths; a short buffer yields
//! [`TypeError::BufferTooSmall`] so the incremental token reader can retry
//! once more packet data arrives.

use bytes::{Buf, Bytes};
use tds_protocol::token::Column;
use tds_protocol::typeinfo::{TypeId, TypeInfo};

use crate::error::TypeError;
use crate::value::SqlValue;

/// PLP total-length sentinel: NULL value.
const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFE;
/// PLP total-length sentinel: length unknown until the terminator chunk.
const PLP_UNKNOWN: u64 = 0xFFFF_FFFF_FFFF_FFFF;
/// USHORT charbin length sentinel for NULL.
const CHARBIN_NULL: u16 = 0xFFFF;

/// Decode a full ROW token body (token byte already consumed).
pub fn decode_row(buf: &mut Bytes, columns: &[Column]) -> Result<Vec<SqlValue>, TypeError> {
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        values.push(decode_value(buf, &column.type_info)?);
    }
    Ok(values)
}

/// Decode an NBCROW token body: a null bitmap followed by non-null values.
pub fn decode_nbc_row(buf: &mut Bytes, columns: &[Column]) -> Result<Vec<SqlValue>, TypeError> {
    let bitmap_len = columns.len().div_ceil(8);
    if buf.remaining() < bitmap_len {
        return Err(TypeError::BufferTooSmall {
            needed: bitmap_len,
            available: buf.remaining(),
        });
    }
    let bitmap = buf.copy_to_bytes(bitmap_len);

    let mut values = Vec::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let is_null = bitmap[index / 8] & (1 << (index % 8)) != 0;
        if is_null {
            values.push(SqlValue::Null);
        } else {
            values.push(decode_value(buf, &column.type_info)?);
        }
    }
    Ok(values)
}

/// Decode a single value according to its TYPE_INFO.
pub fn decode_value(buf: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    match info.type_id {
        TypeId::Bit => Ok(SqlValue::Bool(get_u8(buf)? != 0)),
        TypeId::TinyInt => Ok(SqlValue::TinyInt(get_u8(buf)?)),
        TypeId::SmallInt => {
            need(buf, 2)?;
            Ok(SqlValue::SmallInt(buf.get_i16_le()))
        }
        TypeId::Int => {
            need(buf, 4)?;
            Ok(SqlValue::Int(buf.get_i32_le()))
        }
        TypeId::BigInt => {
            need(buf, 8)?;
            Ok(SqlValue::BigInt(buf.get_i64_le()))
        }
        TypeId::Real => {
            need(buf, 4)?;
            Ok(SqlValue::Float(buf.get_f32_le()))
        }
        TypeId::Float => {
            need(buf, 8)?;
            Ok(SqlValue::Double(buf.get_f64_le()))
        }
        TypeId::Money => decode_money(buf, 8),
        TypeId::SmallMoney => decode_money(buf, 4),
        TypeId::DateTime => decode_datetime(buf),
        TypeId::SmallDateTime => decode_smalldatetime(buf),
        TypeId::IntN => decode_intn(buf),
        TypeId::BitN => decode_bitn(buf),
        TypeId::FloatN => decode_floatn(buf),
        TypeId::MoneyN => {
            let len = get_u8(buf)? as usize;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            decode_money(buf, len)
        }
        TypeId::DateTimeN => {
            let len = get_u8(buf)? as usize;
            match len {
                0 => Ok(SqlValue::Null),
                4 => decode_smalldatetime(buf),
                8 => decode_datetime(buf),
                other => Err(TypeError::InvalidValue {
                    what: "DATETIMEN",
                    detail: format!("length {other}"),
                }),
            }
        }
        TypeId::DecimalN | TypeId::NumericN => decode_decimal(buf, info),
        TypeId::Guid => decode_guid(buf),
        TypeId::Date => {
            let len = get_u8(buf)? as usize;
            match len {
                0 => Ok(SqlValue::Null),
                3 => Ok(SqlValue::Date(read_date(buf)?)),
                other => Err(TypeError::InvalidValue {
                    what: "DATE",
                    detail: format!("length {other}"),
                }),
            }
        }
        TypeId::Time => {
            let len = get_u8(buf)? as usize;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            let scale = info.scale.unwrap_or(7);
            Ok(SqlValue::Time(read_time(buf, scale)?))
        }
        TypeId::DateTime2 => {
            let len = get_u8(buf)? as usize;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            let scale = info.scale.unwrap_or(7);
            let time = read_time(buf, scale)?;
            let date = read_date(buf)?;
            Ok(SqlValue::DateTime(date.and_time(time)))
        }
        TypeId::DateTimeOffset => {
            let len = get_u8(buf)? as usize;
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            let scale = info.scale.unwrap_or(7);
            let time = read_time(buf, scale)?;
            let date = read_date(buf)?;
            need(buf, 2)?;
            let offset_minutes = buf.get_i16_le();
            let offset = chrono::FixedOffset::east_opt(i32::from(offset_minutes) * 60)
                .ok_or_else(|| TypeError::InvalidValue {
                    what: "DATETIMEOFFSET",
                    detail: format!("offset {offset_minutes} minutes"),
                })?;
            // The wire carries UTC; the offset shifts it to local.
            use chrono::TimeZone;
            let utc = date.and_time(time);
            Ok(SqlValue::DateTimeOffset(
                offset.from_utc_datetime(&utc),
            ))
        }
        TypeId::NVarChar | TypeId::NChar => decode_nchar(buf, info),
        TypeId::BigVarChar | TypeId::BigChar => decode_char(buf, info),
        TypeId::BigVarBinary | TypeId::BigBinary => decode_binary(buf, info),
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), TypeError> {
    if buf.remaining() < n {
        Err(TypeError::BufferTooSmall {
            needed: n,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

fn get_u8(buf: &mut Bytes) -> Result<u8, TypeError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn decode_intn(buf: &mut Bytes) -> Result<SqlValue, TypeError> {
    let len = get_u8(buf)? as usize;
    if len == 0 {
        return Ok(SqlValue::Null);
    }
    need(buf, len)?;
    match len {
        1 => Ok(SqlValue::TinyInt(buf.get_u8())),
        2 => Ok(SqlValue::SmallInt(buf.get_i16_le())),
        4 => Ok(SqlValue::Int(buf.get_i32_le())),
        8 => Ok(SqlValue::BigInt(buf.get_i64_le())),
        other => Err(TypeError::InvalidValue {
            what: "INTN",
            detail: format!("length {other}"),
        }),
    }
}

fn decode_bitn(buf: &mut Bytes) -> Result<SqlValue, TypeError> {
    let len = get_u8(buf)? as usize;
    match len {
        0 => Ok(SqlValue::Null),
        1 => Ok(SqlValue::Bool(get_u8(buf)? != 0)),
        other => Err(TypeError::InvalidValue {
            what: "BITN",
            detail: format!("length {other}"),
        }),
    }
}

fn decode_floatn(buf: &mut Bytes) -> Result<SqlValue, TypeError> {
    let len = get_u8(buf)? as usize;
    if len == 0 {
        return Ok(SqlValue::Null);
    }
    need(buf, len)?;
    match len {
        4 => Ok(SqlValue::Float(buf.get_f32_le())),
        8 => Ok(SqlValue::Double(buf.get_f64_le())),
        other => Err(TypeError::InvalidValue {
            what: "FLOATN",
            detail: format!("length {other}"),
        }),
    }
}

/// MONEY is a scaled integer with 4 decimal digits. The 8-byte form puts the
/// high 32 bits first, then the low 32 bits.
fn decode_money(buf: &mut Bytes, len: usize) -> Result<SqlValue, TypeError> {
    need(buf, len)?;
    let raw = match len {
        4 => i64::from(buf.get_i32_le()),
        8 => {
            let hi = buf.get_i32_le();
            let lo = buf.get_u32_le();
            (i64::from(hi) << 32) | i64::from(lo)
        }
        other => {
            return Err(TypeError::InvalidValue {
                what: "MONEY",
                detail: format!("length {other}"),
            });
        }
    };
    Ok(SqlValue::Decimal(rust_decimal::Decimal::new(raw, 4)))
}

/// Legacy DATETIME: days since 1900-01-01 + 300ths of a second since midnight.
fn decode_datetime(buf: &mut Bytes) -> Result<SqlValue, TypeError> {
    need(buf, 8)?;
    let days = buf.get_i32_le();
    let ticks = buf.get_u32_le();

    let date = epoch_1900()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| TypeError::InvalidValue {
            what: "DATETIME",
            detail: format!("day offset {days}"),
        })?;

    let total_ns = u64::from(ticks) * 10_000_000 / 3;
    let secs = (total_ns / 1_000_000_000) as u32;
    let nanos = (total_ns % 1_000_000_000) as u32;
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or_else(
        || TypeError::InvalidValue {
            what: "DATETIME",
            detail: format!("tick value {ticks}"),
        },
    )?;

    Ok(SqlValue::DateTime(date.and_time(time)))
}

/// SMALLDATETIME: days since 1900-01-01 + minutes since midnight.
fn decode_smalldatetime(buf: &mut Bytes) -> Result<SqlValue, TypeError> {
    need(buf, 4)?;
    let days = buf.get_u16_le();
    let minutes = buf.get_u16_le();

    let date = epoch_1900()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| TypeError::InvalidValue {
            what: "SMALLDATETIME",
            detail: format!("day offset {days}"),
        })?;
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or_else(|| TypeError::InvalidValue {
            what: "SMALLDATETIME",
            detail: format!("minute value {minutes}"),
        })?;

    Ok(SqlValue::DateTime(date.and_time(time)))
}

fn decode_decimal(buf: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    let len = get_u8(buf)? as usize;
    if len == 0 {
        return Ok(SqlValue::Null);
    }
    need(buf, len)?;

    // Sign byte: 1 = positive, 0 = negative. Magnitude follows little-endian.
    let sign = buf.get_u8();
    let magnitude_len = len - 1;
    if magnitude_len > 16 {
        return Err(TypeError::InvalidValue {
            what: "DECIMAL",
            detail: format!("magnitude of {magnitude_len} bytes"),
        });
    }
    let mut magnitude = [0u8; 16];
    for slot in magnitude.iter_mut().take(magnitude_len) {
        *slot = buf.get_u8();
    }
    let mantissa = u128::from_le_bytes(magnitude);
    let scale = u32::from(info.scale.unwrap_or(0));

    let mut decimal = rust_decimal::Decimal::try_from_i128_with_scale(mantissa as i128, scale)
        .map_err(|e| TypeError::InvalidValue {
            what: "DECIMAL",
            detail: e.to_string(),
        })?;
    if sign == 0 {
        decimal.set_sign_negative(true);
    }

    Ok(SqlValue::Decimal(decimal))
}

/// UNIQUEIDENTIFIER is stored mixed-endian: the first three groups are
/// little-endian, the final eight bytes big-endian.
fn decode_guid(buf: &mut Bytes) -> Result<SqlValue, TypeError> {
    let len = get_u8(buf)? as usize;
    if len == 0 {
        return Ok(SqlValue::Null);
    }
    if len != 16 {
        return Err(TypeError::InvalidValue {
            what: "UNIQUEIDENTIFIER",
            detail: format!("length {len}"),
        });
    }
    need(buf, 16)?;

    let mut bytes = [0u8; 16];
    bytes[3] = buf.get_u8();
    bytes[2] = buf.get_u8();
    bytes[1] = buf.get_u8();
    bytes[0] = buf.get_u8();
    bytes[5] = buf.get_u8();
    bytes[4] = buf.get_u8();
    bytes[7] = buf.get_u8();
    bytes[6] = buf.get_u8();
    for slot in &mut bytes[8..] {
        *slot = buf.get_u8();
    }

    Ok(SqlValue::Uuid(uuid::Uuid::from_bytes(bytes)))
}

fn decode_nchar(buf: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    let data = if info.is_plp() {
        match read_plp(buf)? {
            None => return Ok(SqlValue::Null),
            Some(data) => data,
        }
    } else {
        need(buf, 2)?;
        let byte_len = buf.get_u16_le();
        if byte_len == CHARBIN_NULL {
            return Ok(SqlValue::Null);
        }
        need(buf, byte_len as usize)?;
        buf.copy_to_bytes(byte_len as usize)
    };

    let text = decode_utf16le(&data)?;
    Ok(SqlValue::String(text))
}

fn decode_char(buf: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    need(buf, 2)?;
    let byte_len = buf.get_u16_le();
    if byte_len == CHARBIN_NULL {
        return Ok(SqlValue::Null);
    }
    need(buf, byte_len as usize)?;
    let data = buf.copy_to_bytes(byte_len as usize);

    // UTF-8 collations and plain ASCII take the fast path; anything else
    // goes through the collation's code page.
    if let Ok(text) = std::str::from_utf8(&data) {
        return Ok(SqlValue::String(text.to_owned()));
    }
    if let Some(collation) = info.collation {
        if let Some(encoding) = encoding_for_lcid(collation.lcid()) {
            let (text, _, had_errors) = encoding.decode(&data);
            if !had_errors {
                return Ok(SqlValue::String(text.into_owned()));
            }
        }
    }
    Ok(SqlValue::String(String::from_utf8_lossy(&data).into_owned()))
}

fn decode_binary(buf: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    if info.is_plp() {
        return match read_plp(buf)? {
            None => Ok(SqlValue::Null),
            Some(data) => Ok(SqlValue::Binary(data)),
        };
    }
    need(buf, 2)?;
    let byte_len = buf.get_u16_le();
    if byte_len == CHARBIN_NULL {
        return Ok(SqlValue::Null);
    }
    need(buf, byte_len as usize)?;
    Ok(SqlValue::Binary(buf.copy_to_bytes(byte_len as usize)))
}

/// Read a partially-length-prefixed value: u64 total length (or NULL/unknown
/// sentinel), then chunks of u32 length terminated by a zero-length chunk.
///
/// Returns `None` for the NULL sentinel.
fn read_plp(buf: &mut Bytes) -> Result<Option<Bytes>, TypeError> {
    need(buf, 8)?;
    let total = {
        let mut peek = buf.clone();
        peek.get_u64_le()
    };
    if total == PLP_NULL {
        buf.advance(8);
        return Ok(None);
    }

    // Parse chunks against a peek cursor so a short buffer leaves the
    // original untouched for a retry.
    let mut peek = buf.clone();
    peek.advance(8);
    let expected = if total == PLP_UNKNOWN {
        None
    } else {
        Some(total as usize)
    };

    let mut data = Vec::with_capacity(expected.unwrap_or(0).min(1 << 20));
    loop {
        if peek.remaining() < 4 {
            return Err(TypeError::BufferTooSmall {
                needed: 4,
                available: peek.remaining(),
            });
        }
        let chunk_len = peek.get_u32_le() as usize;
        if chunk_len == 0 {
            break;
        }
        if peek.remaining() < chunk_len {
            return Err(TypeError::BufferTooSmall {
                needed: chunk_len,
                available: peek.remaining(),
            });
        }
        data.extend_from_slice(&peek.copy_to_bytes(chunk_len));
    }

    if let Some(expected) = expected {
        if data.len() != expected {
            return Err(TypeError::InvalidValue {
                what: "PLP",
                detail: format!("declared {expected} bytes, chunks carried {}", data.len()),
            });
        }
    }

    let consumed = buf.remaining() - peek.remaining();
    buf.advance(consumed);
    Ok(Some(Bytes::from(data)))
}

fn decode_utf16le(data: &[u8]) -> Result<String, TypeError> {
    if data.len() % 2 != 0 {
        return Err(TypeError::InvalidEncoding(
            "UTF-16 payload has odd length".into(),
        ));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| TypeError::InvalidEncoding(e.to_string()))
}

fn epoch_1900() -> chrono::NaiveDate {
    // 1900-01-01 is always a valid date.
    chrono::NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

fn epoch_0001() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default()
}

/// DATE payload: 3 bytes little-endian, days since 0001-01-01.
fn read_date(buf: &mut Bytes) -> Result<chrono::NaiveDate, TypeError> {
    need(buf, 3)?;
    let days = u32::from(buf.get_u8())
        | (u32::from(buf.get_u8()) << 8)
        | (u32::from(buf.get_u8()) << 16);
    epoch_0001()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| TypeError::InvalidValue {
            what: "DATE",
            detail: format!("day offset {days}"),
        })
}

/// TIME payload width depends on scale: 3 bytes up to scale 2, 4 bytes up to
/// scale 4, 5 bytes up to scale 7. The value counts 10^-scale increments
/// since midnight.
fn read_time(buf: &mut Bytes, scale: u8) -> Result<chrono::NaiveTime, TypeError> {
    let width = time_width(scale);
    need(buf, width)?;

    let mut raw = [0u8; 8];
    for slot in raw.iter_mut().take(width) {
        *slot = buf.get_u8();
    }
    let increments = u64::from_le_bytes(raw);

    let nanos_per_increment = 10u64.pow(9 - u32::from(scale.min(7)));
    let total_ns = increments * nanos_per_increment;
    let secs = (total_ns / 1_000_000_000) as u32;
    let nanos = (total_ns % 1_000_000_000) as u32;

    chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or_else(|| {
        TypeError::InvalidValue {
            what: "TIME",
            detail: format!("value {increments} at scale {scale}"),
        }
    })
}

/// Byte width of a TIME payload at a given scale.
pub(crate) fn time_width(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// Map a collation LCID to its single-byte code page encoding.
pub(crate) fn encoding_for_lcid(lcid: u32) -> Option<&'static encoding_rs::Encoding> {
    let language = lcid & 0xFFFF;
    match language {
        0x0411 => Some(encoding_rs::SHIFT_JIS),
        0x0804 | 0x1004 => Some(encoding_rs::GB18030),
        0x0404 | 0x0C04 | 0x1404 => Some(encoding_rs::BIG5),
        0x0412 => Some(encoding_rs::EUC_KR),
        0x041E => Some(encoding_rs::WINDOWS_874),
        0x042A => Some(encoding_rs::WINDOWS_1258),
        // Central European
        0x0405 | 0x040E | 0x0415 | 0x0418 | 0x041A | 0x041B | 0x041C | 0x0424 => {
            Some(encoding_rs::WINDOWS_1250)
        }
        // Cyrillic
        0x0402 | 0x0419 | 0x0422 | 0x0423 | 0x042F | 0x0444 | 0x0450 => {
            Some(encoding_rs::WINDOWS_1251)
        }
        0x0408 => Some(encoding_rs::WINDOWS_1253),
        0x041F | 0x042C => Some(encoding_rs::WINDOWS_1254),
        0x040D => Some(encoding_rs::WINDOWS_1255),
        0x0401 | 0x0420 | 0x0429 => Some(encoding_rs::WINDOWS_1256),
        0x0425..=0x0427 => Some(encoding_rs::WINDOWS_1257),
        // Western European and everything unrecognized
        _ => Some(encoding_rs::WINDOWS_1252),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tds_protocol::typeinfo::PLP_MARKER;

    fn bytes_of(raw: &[u8]) -> Bytes {
        Bytes::copy_from_slice(raw)
    }

    #[test]
    fn intn_variants() {
        let mut buf = bytes_of(&[4, 0x2A, 0, 0, 0]);
        let info = TypeInfo::byte_len(TypeId::IntN, 4);
        assert_eq!(decode_value(&mut buf, &info).unwrap(), SqlValue::Int(42));

        let mut null = bytes_of(&[0]);
        assert_eq!(decode_value(&mut null, &info).unwrap(), SqlValue::Null);
    }

    #[test]
    fn money_is_scaled_10000() {
        // 12.3456 → raw 123456; hi word first.
        let raw: i64 = 123_456;
        let mut buf = BytesMut::new();
        buf.put_i32_le((raw >> 32) as i32);
        buf.put_u32_le(raw as u32);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::fixed(TypeId::Money)).unwrap();
        assert_eq!(
            value,
            SqlValue::Decimal(rust_decimal::Decimal::new(123_456, 4))
        );
    }

    #[test]
    fn negative_money_roundtrips_sign() {
        let raw: i64 = -98_765;
        let mut buf = BytesMut::new();
        buf.put_i32_le((raw >> 32) as i32);
        buf.put_u32_le(raw as u32);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::fixed(TypeId::Money)).unwrap();
        assert_eq!(
            value,
            SqlValue::Decimal(rust_decimal::Decimal::new(-98_765, 4))
        );
    }

    #[test]
    fn smallmoney() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(50_000); // 5.0000
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::fixed(TypeId::SmallMoney)).unwrap();
        assert_eq!(value, SqlValue::Decimal(rust_decimal::Decimal::new(50_000, 4)));
    }

    #[test]
    fn decimal_sign_and_scale() {
        // -123.45 at (18,2): len 5 (sign + 4 bytes magnitude), sign 0.
        let mut buf = BytesMut::new();
        buf.put_u8(5);
        buf.put_u8(0);
        buf.put_u32_le(12_345);
        let mut cursor = buf.freeze();
        let info = TypeInfo::decimal(18, 2);
        let value = decode_value(&mut cursor, &info).unwrap();
        assert_eq!(
            value,
            SqlValue::Decimal(rust_decimal::Decimal::new(-12_345, 2))
        );
    }

    #[test]
    fn guid_mixed_endianness() {
        let mut buf = BytesMut::new();
        buf.put_u8(16);
        buf.put_slice(&[
            0x78, 0x56, 0x34, 0x12, // data1 LE
            0x34, 0x12, // data2 LE
            0x78, 0x56, // data3 LE
            0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78, // data4 BE
        ]);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::byte_len(TypeId::Guid, 16)).unwrap();
        assert_eq!(
            value,
            SqlValue::Uuid(uuid::Uuid::parse_str("12345678-1234-5678-1234-567812345678").unwrap())
        );
    }

    #[test]
    fn date_epoch() {
        // 2024-01-15 is 738 899 days after 0001-01-01.
        let days: u32 = 738_899;
        let mut buf = BytesMut::new();
        buf.put_u8(3);
        buf.put_u8((days & 0xFF) as u8);
        buf.put_u8(((days >> 8) & 0xFF) as u8);
        buf.put_u8(((days >> 16) & 0xFF) as u8);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::fixed(TypeId::Date)).unwrap();
        assert_eq!(
            value,
            SqlValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
    }

    #[test]
    fn time_scale_widths() {
        assert_eq!(time_width(0), 3);
        assert_eq!(time_width(2), 3);
        assert_eq!(time_width(3), 4);
        assert_eq!(time_width(4), 4);
        assert_eq!(time_width(5), 5);
        assert_eq!(time_width(7), 5);
    }

    #[test]
    fn time_scale_7() {
        // 01:02:03.5 at scale 7 = 37235000000 hundred-ns units.
        let increments: u64 = 37_235_000_000;
        let mut buf = BytesMut::new();
        buf.put_u8(5);
        buf.put_slice(&increments.to_le_bytes()[..5]);
        let mut cursor = buf.freeze();
        let info = TypeInfo::with_scale(TypeId::Time, 7);
        let value = decode_value(&mut cursor, &info).unwrap();
        assert_eq!(
            value,
            SqlValue::Time(
                chrono::NaiveTime::from_hms_milli_opt(1, 2, 3, 500).unwrap()
            )
        );
    }

    #[test]
    fn nvarchar_null_sentinel() {
        let mut buf = bytes_of(&[0xFF, 0xFF]);
        let value = decode_value(&mut buf, &TypeInfo::nvarchar(100)).unwrap();
        assert_eq!(value, SqlValue::Null);
    }

    #[test]
    fn nvarchar_text() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(4);
        buf.put_slice(&[0x41, 0x00, 0x42, 0x00]);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::nvarchar(100)).unwrap();
        assert_eq!(value, SqlValue::String("AB".into()));
    }

    #[test]
    fn nvarchar_max_plp_chunks() {
        let text = "chunked";
        let utf16: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut buf = BytesMut::new();
        buf.put_u64_le(utf16.len() as u64);
        // two chunks
        buf.put_u32_le(4);
        buf.put_slice(&utf16[..4]);
        buf.put_u32_le((utf16.len() - 4) as u32);
        buf.put_slice(&utf16[4..]);
        buf.put_u32_le(0);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::nvarchar(PLP_MARKER)).unwrap();
        assert_eq!(value, SqlValue::String(text.into()));
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn plp_null_sentinel() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(PLP_NULL);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::nvarchar(PLP_MARKER)).unwrap();
        assert_eq!(value, SqlValue::Null);
    }

    #[test]
    fn plp_unknown_length_terminated_by_empty_chunk() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(PLP_UNKNOWN);
        buf.put_u32_le(2);
        buf.put_slice(&[0xAA, 0xBB]);
        buf.put_u32_le(0);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, &TypeInfo::varbinary(PLP_MARKER)).unwrap();
        assert_eq!(value, SqlValue::Binary(Bytes::from_static(&[0xAA, 0xBB])));
    }

    #[test]
    fn truncated_plp_is_incomplete_not_corrupt() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(10);
        buf.put_u32_le(10);
        buf.put_slice(&[1, 2, 3]); // 7 bytes short
        let mut cursor = buf.freeze();
        let before = cursor.clone();
        let err = decode_value(&mut cursor, &TypeInfo::varbinary(PLP_MARKER)).unwrap_err();
        assert!(err.is_incomplete());
        // Buffer untouched for retry.
        assert_eq!(cursor, before);
    }

    #[test]
    fn nbc_row_nulls_skip_payload() {
        use tds_protocol::token::Column;
        use tds_protocol::typeinfo::ColumnFlags;

        let columns = vec![
            Column {
                name: "a".into(),
                user_type: 0,
                flags: ColumnFlags::default(),
                type_info: TypeInfo::byte_len(TypeId::IntN, 4),
            },
            Column {
                name: "b".into(),
                user_type: 0,
                flags: ColumnFlags::default(),
                type_info: TypeInfo::byte_len(TypeId::IntN, 4),
            },
        ];

        // Bitmap 0b01: column a NULL, column b = 7.
        let mut buf = BytesMut::new();
        buf.put_u8(0b01);
        buf.put_u8(4);
        buf.put_i32_le(7);
        let mut cursor = buf.freeze();
        let row = decode_nbc_row(&mut cursor, &columns).unwrap();
        assert_eq!(row, vec![SqlValue::Null, SqlValue::Int(7)]);
    }

    #[test]
    fn varchar_code_page_decoding() {
        // 0xE9 is 'é' in Windows-1252.
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u8(0xE9);
        let mut cursor = buf.freeze();
        let mut info = TypeInfo::nvarchar(100);
        info.type_id = TypeId::BigVarChar;
        info.collation = Some(tds_protocol::Collation {
            info: 0x0409,
            sort_id: 52,
        });
        let value = decode_value(&mut cursor, &info).unwrap();
        assert_eq!(value, SqlValue::String("é".into()));
    }
}
