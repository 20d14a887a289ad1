//! TDS wire format encoding for SQL values.
//!
//! The bulk-load writer replays the server's own row format: each value is
//! encoded exactly as it would appear in a ROW token for the column's
//! TYPE_INFO, length prefixes included. Encoding is the strict inverse of
//! [`crate::decode::decode_value`] for every supported type.

use bytes::{BufMut, BytesMut};
use tds_protocol::typeinfo::{TypeId, TypeInfo};

use crate::decode::time_width;
use crate::error::TypeError;
use crate::value::SqlValue;

/// PLP total-length sentinel for NULL.
const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFE;
/// USHORT charbin length sentinel for NULL.
const CHARBIN_NULL: u16 = 0xFFFF;

/// Encode one value per the column's TYPE_INFO.
pub fn encode_value(
    value: &SqlValue,
    info: &TypeInfo,
    buf: &mut BytesMut,
) -> Result<(), TypeError> {
    if value.is_null() {
        return encode_null(info, buf);
    }

    match (info.type_id, value) {
        (TypeId::BitN, SqlValue::Bool(v)) => {
            buf.put_u8(1);
            buf.put_u8(u8::from(*v));
        }
        (TypeId::Bit, SqlValue::Bool(v)) => buf.put_u8(u8::from(*v)),
        (TypeId::IntN, v) => {
            let width = info.max_length.unwrap_or(8);
            let raw = v.as_i64().ok_or_else(|| mismatch(v, "INTN"))?;
            buf.put_u8(width as u8);
            match width {
                1 => buf.put_u8(raw as u8),
                2 => buf.put_i16_le(raw as i16),
                4 => buf.put_i32_le(raw as i32),
                8 => buf.put_i64_le(raw),
                other => {
                    return Err(TypeError::InvalidValue {
                        what: "INTN",
                        detail: format!("width {other}"),
                    });
                }
            }
        }
        (TypeId::TinyInt, SqlValue::TinyInt(v)) => buf.put_u8(*v),
        (TypeId::SmallInt, SqlValue::SmallInt(v)) => buf.put_i16_le(*v),
        (TypeId::Int, SqlValue::Int(v)) => buf.put_i32_le(*v),
        (TypeId::BigInt, SqlValue::BigInt(v)) => buf.put_i64_le(*v),
        (TypeId::FloatN, v) => {
            let raw = v.as_f64().ok_or_else(|| mismatch(v, "FLOATN"))?;
            if !raw.is_finite() {
                return Err(TypeError::NonFiniteFloat);
            }
            match info.max_length.unwrap_or(8) {
                4 => {
                    buf.put_u8(4);
                    buf.put_f32_le(raw as f32);
                }
                _ => {
                    buf.put_u8(8);
                    buf.put_f64_le(raw);
                }
            }
        }
        (TypeId::Real, SqlValue::Float(v)) => {
            if !v.is_finite() {
                return Err(TypeError::NonFiniteFloat);
            }
            buf.put_f32_le(*v);
        }
        (TypeId::Float, SqlValue::Double(v)) => {
            if !v.is_finite() {
                return Err(TypeError::NonFiniteFloat);
            }
            buf.put_f64_le(*v);
        }
        (TypeId::MoneyN, SqlValue::Decimal(d)) => {
            let raw = money_raw(d)?;
            buf.put_u8(8);
            buf.put_i32_le((raw >> 32) as i32);
            buf.put_u32_le(raw as u32);
        }
        (TypeId::DecimalN | TypeId::NumericN, SqlValue::Decimal(d)) => {
            encode_decimal(d, info, buf)?;
        }
        (TypeId::Guid, SqlValue::Uuid(u)) => {
            buf.put_u8(16);
            let bytes = u.as_bytes();
            buf.put_u8(bytes[3]);
            buf.put_u8(bytes[2]);
            buf.put_u8(bytes[1]);
            buf.put_u8(bytes[0]);
            buf.put_u8(bytes[5]);
            buf.put_u8(bytes[4]);
            buf.put_u8(bytes[7]);
            buf.put_u8(bytes[6]);
            buf.put_slice(&bytes[8..]);
        }
        (TypeId::Date, SqlValue::Date(d)) => {
            buf.put_u8(3);
            put_date(*d, buf)?;
        }
        (TypeId::Time, SqlValue::Time(t)) => {
            let scale = info.scale.unwrap_or(7);
            buf.put_u8(time_width(scale) as u8);
            put_time(*t, scale, buf);
        }
        (TypeId::DateTime2, SqlValue::DateTime(dt)) => {
            let scale = info.scale.unwrap_or(7);
            buf.put_u8((time_width(scale) + 3) as u8);
            put_time(dt.time(), scale, buf);
            put_date(dt.date(), buf)?;
        }
        (TypeId::DateTimeOffset, SqlValue::DateTimeOffset(dto)) => {
            let scale = info.scale.unwrap_or(7);
            buf.put_u8((time_width(scale) + 5) as u8);
            let utc = dto.naive_utc();
            put_time(utc.time(), scale, buf);
            put_date(utc.date(), buf)?;
            let offset_minutes = (dto.offset().local_minus_utc() / 60) as i16;
            buf.put_i16_le(offset_minutes);
        }
        (TypeId::NVarChar | TypeId::NChar, SqlValue::String(s)) => {
            let utf16: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
            if info.is_plp() {
                put_plp(&utf16, buf);
            } else {
                if utf16.len() >= CHARBIN_NULL as usize {
                    return Err(TypeError::Conversion {
                        value: format!("string of {} UTF-16 bytes", utf16.len()),
                        target: "NVARCHAR(n)".into(),
                    });
                }
                buf.put_u16_le(utf16.len() as u16);
                buf.put_slice(&utf16);
            }
        }
        (TypeId::BigVarChar | TypeId::BigChar, SqlValue::String(s)) => {
            // Generated DDL only produces Unicode columns; plain char columns
            // appear when bulk-loading into an existing table. ASCII passes
            // through; anything else must target an N-type.
            if !s.is_ascii() {
                return Err(TypeError::Conversion {
                    value: "non-ASCII string".into(),
                    target: "VARCHAR".into(),
                });
            }
            buf.put_u16_le(s.len() as u16);
            buf.put_slice(s.as_bytes());
        }
        (TypeId::BigVarBinary | TypeId::BigBinary, SqlValue::Binary(b)) => {
            if info.is_plp() {
                put_plp(b, buf);
            } else {
                if b.len() >= CHARBIN_NULL as usize {
                    return Err(TypeError::Conversion {
                        value: format!("binary of {} bytes", b.len()),
                        target: "VARBINARY(n)".into(),
                    });
                }
                buf.put_u16_le(b.len() as u16);
                buf.put_slice(b);
            }
        }
        (_, v) => return Err(mismatch(v, type_label(info.type_id))),
    }

    Ok(())
}

/// Encode the NULL representation for a column type.
fn encode_null(info: &TypeInfo, buf: &mut BytesMut) -> Result<(), TypeError> {
    let type_id = info.type_id;
    if info.is_plp() {
        buf.put_u64_le(PLP_NULL);
        return Ok(());
    }
    if type_id.is_byte_len() || matches!(
        type_id,
        TypeId::BitN
            | TypeId::DecimalN
            | TypeId::NumericN
            | TypeId::Date
            | TypeId::Time
            | TypeId::DateTime2
            | TypeId::DateTimeOffset
    ) {
        buf.put_u8(0);
        return Ok(());
    }
    if type_id.is_ushort_len() {
        buf.put_u16_le(CHARBIN_NULL);
        return Ok(());
    }
    Err(TypeError::Conversion {
        value: "NULL".into(),
        target: type_label(type_id).into(),
    })
}

fn encode_decimal(
    d: &rust_decimal::Decimal,
    info: &TypeInfo,
    buf: &mut BytesMut,
) -> Result<(), TypeError> {
    let target_scale = u32::from(info.scale.unwrap_or(0));
    let mut normalized = *d;
    normalized.rescale(target_scale);
    if normalized.scale() != target_scale {
        return Err(TypeError::Conversion {
            value: d.to_string(),
            target: format!("DECIMAL({}, {target_scale})", info.precision.unwrap_or(38)),
        });
    }

    let magnitude_len = match info.precision.unwrap_or(38) {
        0..=9 => 4,
        10..=19 => 8,
        20..=28 => 12,
        _ => 16,
    };
    buf.put_u8(1 + magnitude_len as u8);
    buf.put_u8(u8::from(!normalized.is_sign_negative()));
    let mantissa = normalized.mantissa().unsigned_abs();
    buf.put_slice(&mantissa.to_le_bytes()[..magnitude_len]);
    Ok(())
}

/// MONEY raw value: the decimal scaled to 4 fractional digits.
fn money_raw(d: &rust_decimal::Decimal) -> Result<i64, TypeError> {
    let mut scaled = *d;
    scaled.rescale(4);
    i64::try_from(scaled.mantissa()).map_err(|_| TypeError::Conversion {
        value: d.to_string(),
        target: "MONEY".into(),
    })
}

fn put_date(date: chrono::NaiveDate, buf: &mut BytesMut) -> Result<(), TypeError> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default();
    let days = date.signed_duration_since(epoch).num_days();
    if !(0..=0x00FF_FFFF).contains(&days) {
        return Err(TypeError::Conversion {
            value: date.to_string(),
            target: "DATE".into(),
        });
    }
    let days = days as u32;
    buf.put_u8((days & 0xFF) as u8);
    buf.put_u8(((days >> 8) & 0xFF) as u8);
    buf.put_u8(((days >> 16) & 0xFF) as u8);
    Ok(())
}

fn put_time(time: chrono::NaiveTime, scale: u8, buf: &mut BytesMut) {
    use chrono::Timelike;

    let nanos =
        u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond());
    let increments = nanos / 10u64.pow(9 - u32::from(scale.min(7)));
    buf.put_slice(&increments.to_le_bytes()[..time_width(scale)]);
}

/// Write a PLP value as a single chunk with a known total length.
fn put_plp(data: &[u8], buf: &mut BytesMut) {
    buf.put_u64_le(data.len() as u64);
    if !data.is_empty() {
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(data);
    }
    buf.put_u32_le(0);
}

fn mismatch(value: &SqlValue, target: &'static str) -> TypeError {
    TypeError::Conversion {
        value: value.type_name().to_string(),
        target: target.into(),
    }
}

fn type_label(type_id: TypeId) -> &'static str {
    match type_id {
        TypeId::Bit | TypeId::BitN => "BIT",
        TypeId::TinyInt => "TINYINT",
        TypeId::SmallInt => "SMALLINT",
        TypeId::Int | TypeId::IntN => "INT",
        TypeId::BigInt => "BIGINT",
        TypeId::Real => "REAL",
        TypeId::Float | TypeId::FloatN => "FLOAT",
        TypeId::Money | TypeId::SmallMoney | TypeId::MoneyN => "MONEY",
        TypeId::DateTime | TypeId::SmallDateTime | TypeId::DateTimeN => "DATETIME",
        TypeId::DecimalN | TypeId::NumericN => "DECIMAL",
        TypeId::Guid => "UNIQUEIDENTIFIER",
        TypeId::Date => "DATE",
        TypeId::Time => "TIME",
        TypeId::DateTime2 => "DATETIME2",
        TypeId::DateTimeOffset => "DATETIMEOFFSET",
        TypeId::BigVarChar | TypeId::BigChar => "VARCHAR",
        TypeId::NVarChar | TypeId::NChar => "NVARCHAR",
        TypeId::BigVarBinary | TypeId::BigBinary => "VARBINARY",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Buf;
    use crate::decode::decode_value;
    use tds_protocol::typeinfo::PLP_MARKER;

    fn roundtrip(value: SqlValue, info: TypeInfo) -> SqlValue {
        let mut buf = BytesMut::new();
        encode_value(&value, &info, &mut buf).unwrap();
        let mut cursor = buf.freeze();
        let decoded = decode_value(&mut cursor, &info).unwrap();
        assert!(!cursor.has_remaining(), "trailing bytes after decode");
        decoded
    }

    #[test]
    fn intn_roundtrip() {
        let info = TypeInfo::byte_len(TypeId::IntN, 4);
        assert_eq!(roundtrip(SqlValue::Int(-7), info), SqlValue::Int(-7));
        assert_eq!(roundtrip(SqlValue::Null, info), SqlValue::Null);
    }

    #[test]
    fn decimal_roundtrip() {
        let info = TypeInfo::decimal(18, 2);
        let value = SqlValue::Decimal(rust_decimal::Decimal::new(-123_456, 2));
        assert_eq!(roundtrip(value.clone(), info), value);
    }

    #[test]
    fn guid_roundtrip() {
        let info = TypeInfo::byte_len(TypeId::Guid, 16);
        let value = SqlValue::Uuid(
            uuid::Uuid::parse_str("12345678-1234-5678-1234-567812345678").unwrap(),
        );
        assert_eq!(roundtrip(value.clone(), info), value);
    }

    #[test]
    fn datetime2_roundtrip() {
        let info = TypeInfo::with_scale(TypeId::DateTime2, 7);
        let value = SqlValue::DateTime(
            chrono::NaiveDate::from_ymd_opt(2024, 6, 30)
                .unwrap()
                .and_hms_milli_opt(23, 59, 59, 250)
                .unwrap(),
        );
        assert_eq!(roundtrip(value.clone(), info), value);
    }

    #[test]
    fn nvarchar_plp_roundtrip() {
        let info = TypeInfo::nvarchar(PLP_MARKER);
        let value = SqlValue::String("high plane: \u{10437}".into());
        assert_eq!(roundtrip(value.clone(), info), value);
    }

    #[test]
    fn varbinary_roundtrip() {
        let info = TypeInfo::varbinary(100);
        let value = SqlValue::Binary(bytes::Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(roundtrip(value.clone(), info), value);
    }

    #[test]
    fn nan_rejected() {
        let info = TypeInfo::byte_len(TypeId::FloatN, 8);
        let err = encode_value(&SqlValue::Double(f64::NAN), &info, &mut BytesMut::new());
        assert!(matches!(err, Err(TypeError::NonFiniteFloat)));

        let err = encode_value(
            &SqlValue::Double(f64::INFINITY),
            &info,
            &mut BytesMut::new(),
        );
        assert!(matches!(err, Err(TypeError::NonFiniteFloat)));
    }

    #[test]
    fn money_roundtrip() {
        let info = TypeInfo::byte_len(TypeId::MoneyN, 8);
        let value = SqlValue::Decimal(rust_decimal::Decimal::new(-1_234_567, 4));
        assert_eq!(roundtrip(value.clone(), info), value);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let info = TypeInfo::byte_len(TypeId::Guid, 16);
        let err = encode_value(&SqlValue::Int(1), &info, &mut BytesMut::new());
        assert!(matches!(err, Err(TypeError::Conversion { .. })));
    }
}
