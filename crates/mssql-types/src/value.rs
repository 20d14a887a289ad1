//! SQL value representation.

use bytes::Bytes;

/// A typed SQL scalar or NULL.
///
/// Values decode from result rows and encode into the bulk-load row stream
/// and generated DML literals.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,
    /// BIT.
    Bool(bool),
    /// TINYINT (unsigned in SQL Server).
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Float(f32),
    /// FLOAT.
    Double(f64),
    /// CHAR, VARCHAR, NCHAR, NVARCHAR (host-side UTF-8).
    String(String),
    /// BINARY, VARBINARY.
    Binary(Bytes),
    /// DECIMAL, NUMERIC, MONEY, SMALLMONEY.
    Decimal(rust_decimal::Decimal),
    /// UNIQUEIDENTIFIER.
    Uuid(uuid::Uuid),
    /// DATE.
    Date(chrono::NaiveDate),
    /// TIME.
    Time(chrono::NaiveTime),
    /// DATETIME, SMALLDATETIME, DATETIME2.
    DateTime(chrono::NaiveDateTime),
    /// DATETIMEOFFSET.
    DateTimeOffset(chrono::DateTime<chrono::FixedOffset>),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an i64 if it is any integer width.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::TinyInt(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as an f64 if it is a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a string slice if it is textual.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// SQL Server type name, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INT",
            Self::BigInt(_) => "BIGINT",
            Self::Float(_) => "REAL",
            Self::Double(_) => "FLOAT",
            Self::String(_) => "NVARCHAR",
            Self::Binary(_) => "VARBINARY",
            Self::Decimal(_) => "DECIMAL",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeOffset(_) => "DATETIMEOFFSET",
        }
    }
}

impl Default for SqlValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<rust_decimal::Decimal> for SqlValue {
    fn from(v: rust_decimal::Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<uuid::Uuid> for SqlValue {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
