//! TDS data type identifiers and TYPE_INFO handling.
//!
//! TYPE_INFO appears in two places in this engine: inbound in COLMETADATA
//! (describing a result set) and outbound in the COLMETADATA the bulk-load
//! writer replays to the server. Both directions share the encoding here.

use bytes::{Buf, BufMut};

use crate::collation::Collation;
use crate::error::ProtocolError;

/// Sentinel max-length marking a PLP (MAX) column.
pub const PLP_MARKER: u16 = 0xFFFF;

/// TDS data type identifiers used by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Bit (boolean), fixed 1 byte.
    Bit = 0x32,
    /// 8-bit unsigned integer.
    TinyInt = 0x30,
    /// 16-bit signed integer.
    SmallInt = 0x34,
    /// 32-bit signed integer.
    Int = 0x38,
    /// 64-bit signed integer.
    BigInt = 0x7F,
    /// 32-bit IEEE-754 float.
    Real = 0x3B,
    /// 64-bit IEEE-754 float.
    Float = 0x3E,
    /// 8-byte money (scaled int64 / 10000).
    Money = 0x3C,
    /// 4-byte money (scaled int32 / 10000).
    SmallMoney = 0x7A,
    /// Legacy 8-byte datetime.
    DateTime = 0x3D,
    /// Legacy 4-byte smalldatetime.
    SmallDateTime = 0x3A,
    /// Nullable integer, 1-byte length prefix.
    IntN = 0x26,
    /// Nullable bit, 1-byte length prefix.
    BitN = 0x68,
    /// Nullable float, 1-byte length prefix.
    FloatN = 0x6D,
    /// Nullable money, 1-byte length prefix.
    MoneyN = 0x6E,
    /// Nullable legacy datetime, 1-byte length prefix.
    DateTimeN = 0x6F,
    /// Decimal, length-prefixed sign + magnitude.
    DecimalN = 0x6A,
    /// Numeric, identical wire form to decimal.
    NumericN = 0x6C,
    /// Uniqueidentifier, mixed-endian 16 bytes.
    Guid = 0x24,
    /// Date, 3 bytes of days since 0001-01-01.
    Date = 0x28,
    /// Time with scale-dependent width.
    Time = 0x29,
    /// Datetime2: time payload then 3-byte date.
    DateTime2 = 0x2A,
    /// Datetimeoffset: datetime2 payload then minute offset.
    DateTimeOffset = 0x2B,
    /// Varchar with collation.
    BigVarChar = 0xA7,
    /// Fixed char with collation.
    BigChar = 0xAF,
    /// Nvarchar (UTF-16LE), PLP when MAX.
    NVarChar = 0xE7,
    /// Fixed nchar (UTF-16LE).
    NChar = 0xEF,
    /// Varbinary, PLP when MAX.
    BigVarBinary = 0xA5,
    /// Fixed binary.
    BigBinary = 0xAD,
}

impl TypeId {
    /// Create a type id from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x32 => Some(Self::Bit),
            0x30 => Some(Self::TinyInt),
            0x34 => Some(Self::SmallInt),
            0x38 => Some(Self::Int),
            0x7F => Some(Self::BigInt),
            0x3B => Some(Self::Real),
            0x3E => Some(Self::Float),
            0x3C => Some(Self::Money),
            0x7A => Some(Self::SmallMoney),
            0x3D => Some(Self::DateTime),
            0x3A => Some(Self::SmallDateTime),
            0x26 => Some(Self::IntN),
            0x68 => Some(Self::BitN),
            0x6D => Some(Self::FloatN),
            0x6E => Some(Self::MoneyN),
            0x6F => Some(Self::DateTimeN),
            0x6A => Some(Self::DecimalN),
            0x6C => Some(Self::NumericN),
            0x24 => Some(Self::Guid),
            0x28 => Some(Self::Date),
            0x29 => Some(Self::Time),
            0x2A => Some(Self::DateTime2),
            0x2B => Some(Self::DateTimeOffset),
            0xA7 => Some(Self::BigVarChar),
            0xAF => Some(Self::BigChar),
            0xE7 => Some(Self::NVarChar),
            0xEF => Some(Self::NChar),
            0xA5 => Some(Self::BigVarBinary),
            0xAD => Some(Self::BigBinary),
            _ => None,
        }
    }

    /// Fixed wire size in bytes, if this is a fixed-length type.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Bit | Self::TinyInt => Some(1),
            Self::SmallInt => Some(2),
            Self::Int | Self::Real | Self::SmallMoney | Self::SmallDateTime => Some(4),
            Self::BigInt | Self::Float | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Types carrying a 1-byte length prefix in TYPE_INFO and values.
    #[must_use]
    pub const fn is_byte_len(&self) -> bool {
        matches!(
            self,
            Self::IntN | Self::BitN | Self::FloatN | Self::MoneyN | Self::DateTimeN | Self::Guid
        )
    }

    /// Types carrying a 2-byte max length in TYPE_INFO.
    #[must_use]
    pub const fn is_ushort_len(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar
                | Self::BigChar
                | Self::NVarChar
                | Self::NChar
                | Self::BigVarBinary
                | Self::BigBinary
        )
    }

    /// Types carrying a collation in TYPE_INFO.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar
        )
    }

    /// UTF-16 string types.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NVarChar | Self::NChar)
    }
}

/// Type-specific metadata for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// The TDS type id.
    pub type_id: TypeId,
    /// Maximum length for length-prefixed types (0xFFFF = PLP).
    pub max_length: Option<u16>,
    /// Precision for decimal types.
    pub precision: Option<u8>,
    /// Scale for decimal and time-family types.
    pub scale: Option<u8>,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

impl TypeInfo {
    /// Type info for a fixed-size type.
    #[must_use]
    pub fn fixed(type_id: TypeId) -> Self {
        Self {
            type_id,
            max_length: None,
            precision: None,
            scale: None,
            collation: None,
        }
    }

    /// Type info for a byte-length type (INTN and friends).
    #[must_use]
    pub fn byte_len(type_id: TypeId, length: u16) -> Self {
        Self {
            max_length: Some(length),
            ..Self::fixed(type_id)
        }
    }

    /// Type info for a decimal/numeric column.
    #[must_use]
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            max_length: Some(17),
            precision: Some(precision),
            scale: Some(scale),
            ..Self::fixed(TypeId::NumericN)
        }
    }

    /// Type info for a time-family column with fractional scale.
    #[must_use]
    pub fn with_scale(type_id: TypeId, scale: u8) -> Self {
        Self {
            scale: Some(scale),
            ..Self::fixed(type_id)
        }
    }

    /// Type info for an nvarchar column (byte length; `PLP_MARKER` for MAX).
    #[must_use]
    pub fn nvarchar(max_byte_length: u16) -> Self {
        Self {
            max_length: Some(max_byte_length),
            collation: Some(Collation::default()),
            ..Self::fixed(TypeId::NVarChar)
        }
    }

    /// Type info for a varbinary column (`PLP_MARKER` for MAX).
    #[must_use]
    pub fn varbinary(max_byte_length: u16) -> Self {
        Self {
            max_length: Some(max_byte_length),
            ..Self::fixed(TypeId::BigVarBinary)
        }
    }

    /// Whether values of this column use PLP chunked encoding.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        matches!(self.type_id, TypeId::NVarChar | TypeId::BigVarBinary)
            && self.max_length == Some(PLP_MARKER)
    }

    /// Decode TYPE_INFO from a COLMETADATA column definition.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let raw = src.get_u8();
        let type_id = TypeId::from_u8(raw).ok_or(ProtocolError::UnsupportedType(raw))?;

        let mut info = Self::fixed(type_id);

        if type_id.fixed_size().is_some() {
            return Ok(info);
        }

        match type_id {
            TypeId::Date => {}
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                if !src.has_remaining() {
                    return Err(ProtocolError::UnexpectedEof);
                }
                info.scale = Some(src.get_u8());
            }
            TypeId::DecimalN | TypeId::NumericN => {
                if src.remaining() < 3 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                info.max_length = Some(src.get_u8() as u16);
                info.precision = Some(src.get_u8());
                info.scale = Some(src.get_u8());
            }
            t if t.is_byte_len() => {
                if !src.has_remaining() {
                    return Err(ProtocolError::UnexpectedEof);
                }
                info.max_length = Some(src.get_u8() as u16);
            }
            t if t.is_ushort_len() => {
                if src.remaining() < 2 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                info.max_length = Some(src.get_u16_le());
                if t.has_collation() {
                    info.collation = Some(Collation::decode(src)?);
                }
            }
            _ => return Err(ProtocolError::UnsupportedType(raw)),
        }

        Ok(info)
    }

    /// Encode TYPE_INFO the way the server does, for the bulk-load writer.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let type_id = self.type_id;
        dst.put_u8(type_id as u8);

        if type_id.fixed_size().is_some() {
            return Ok(());
        }

        match type_id {
            TypeId::Date => {}
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                dst.put_u8(self.scale.unwrap_or(7));
            }
            TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.max_length.unwrap_or(17) as u8);
                dst.put_u8(self.precision.unwrap_or(38));
                dst.put_u8(self.scale.unwrap_or(0));
            }
            t if t.is_byte_len() => {
                dst.put_u8(self.max_length.unwrap_or(0) as u8);
            }
            t if t.is_ushort_len() => {
                dst.put_u16_le(self.max_length.unwrap_or(0));
                if t.has_collation() {
                    self.collation.unwrap_or_default().encode(dst);
                }
            }
            _ => return Err(ProtocolError::UnsupportedType(type_id as u8)),
        }

        Ok(())
    }
}

/// Column flags from COLMETADATA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Column is nullable.
    pub nullable: bool,
    /// Column compares case-sensitively.
    pub case_sensitive: bool,
    /// Column is writable (updateable bits = ReadWrite).
    pub updatable: bool,
    /// Column is an identity column.
    pub identity: bool,
    /// Column is computed.
    pub computed: bool,
    /// Column belongs to a sparse column set.
    pub column_set: bool,
    /// Column is hidden from the select list.
    pub hidden: bool,
    /// Column is part of a key.
    pub key: bool,
}

impl ColumnFlags {
    /// Parse column flags from the 2-byte flags field.
    #[must_use]
    pub fn from_bits(flags: u16) -> Self {
        Self {
            nullable: (flags & 0x0001) != 0,
            case_sensitive: (flags & 0x0002) != 0,
            updatable: ((flags >> 2) & 0x03) == 1,
            identity: (flags & 0x0010) != 0,
            computed: (flags & 0x0020) != 0,
            column_set: (flags & 0x0200) != 0,
            hidden: (flags & 0x2000) != 0,
            key: (flags & 0x4000) != 0,
        }
    }

    /// Convert flags back to wire bits.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        let mut flags = 0u16;
        if self.nullable {
            flags |= 0x0001;
        }
        if self.case_sensitive {
            flags |= 0x0002;
        }
        if self.updatable {
            flags |= 1 << 2;
        }
        if self.identity {
            flags |= 0x0010;
        }
        if self.computed {
            flags |= 0x0020;
        }
        if self.column_set {
            flags |= 0x0200;
        }
        if self.hidden {
            flags |= 0x2000;
        }
        if self.key {
            flags |= 0x4000;
        }
        flags
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(info: TypeInfo) -> TypeInfo {
        let mut buf = BytesMut::new();
        info.encode(&mut buf).unwrap();
        let mut cursor = buf.freeze();
        TypeInfo::decode(&mut cursor).unwrap()
    }

    #[test]
    fn fixed_type_roundtrip() {
        let info = TypeInfo::fixed(TypeId::Int);
        assert_eq!(roundtrip(info), info);
    }

    #[test]
    fn decimal_roundtrip() {
        let info = TypeInfo::decimal(18, 2);
        let decoded = roundtrip(info);
        assert_eq!(decoded.precision, Some(18));
        assert_eq!(decoded.scale, Some(2));
    }

    #[test]
    fn nvarchar_roundtrip() {
        let info = TypeInfo::nvarchar(200);
        let decoded = roundtrip(info);
        assert_eq!(decoded.max_length, Some(200));
        assert!(decoded.collation.is_some());
        assert!(!decoded.is_plp());
    }

    #[test]
    fn nvarchar_max_is_plp() {
        let info = TypeInfo::nvarchar(PLP_MARKER);
        assert!(info.is_plp());
        assert!(roundtrip(info).is_plp());
    }

    #[test]
    fn unknown_type_rejected() {
        let raw = [0x99u8];
        let mut cursor = &raw[..];
        assert!(matches!(
            TypeInfo::decode(&mut cursor),
            Err(ProtocolError::UnsupportedType(0x99))
        ));
    }

    #[test]
    fn column_flags_roundtrip() {
        let flags = ColumnFlags {
            nullable: true,
            identity: true,
            key: true,
            ..Default::default()
        };
        let restored = ColumnFlags::from_bits(flags.to_bits());
        assert_eq!(flags, restored);
    }
}
