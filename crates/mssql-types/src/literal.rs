//! T-SQL literal rendering for generated DML.
//!
//! The DML layer builds multi-row `INSERT ... VALUES` and `VALUES`-join
//! statements from host values. Rendering rules:
//!
//! - strings double embedded quotes and take an `N` prefix when the target
//!   column is a Unicode type,
//! - binary renders as `0x...` hex,
//! - floats reject NaN and infinities (SQL Server has no literal for them),
//! - decimals keep their scale,
//! - date/time values render as ISO strings in single quotes.

use std::fmt::Write as _;

use crate::error::TypeError;
use crate::value::SqlValue;

/// Render a value as a T-SQL literal.
///
/// `unicode` selects the `N''` prefix for string literals; pass true whenever
/// the target column is NCHAR/NVARCHAR.
pub fn render_literal(value: &SqlValue, unicode: bool) -> Result<String, TypeError> {
    let rendered = match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        SqlValue::TinyInt(v) => v.to_string(),
        SqlValue::SmallInt(v) => v.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::BigInt(v) => v.to_string(),
        SqlValue::Float(v) => render_float(f64::from(*v))?,
        SqlValue::Double(v) => render_float(*v)?,
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::String(v) => {
            let mut out = String::with_capacity(v.len() + 4);
            if unicode {
                out.push('N');
            }
            out.push('\'');
            for c in v.chars() {
                if c == '\'' {
                    out.push('\'');
                }
                out.push(c);
            }
            out.push('\'');
            out
        }
        SqlValue::Binary(v) => {
            if v.is_empty() {
                "0x".to_string()
            } else {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("0x");
                for b in v.iter() {
                    let _ = write!(out, "{b:02X}");
                }
                out
            }
        }
        SqlValue::Uuid(v) => format!("'{v}'"),
        SqlValue::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
        SqlValue::Time(v) => format!("'{}'", v.format("%H:%M:%S%.f")),
        SqlValue::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.7f")),
        SqlValue::DateTimeOffset(v) => {
            format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.7f %:z"))
        }
    };
    Ok(rendered)
}

fn render_float(v: f64) -> Result<String, TypeError> {
    if !v.is_finite() {
        return Err(TypeError::NonFiniteFloat);
    }
    // An integral float still needs a decimal point to stay a float literal.
    if v == v.trunc() && v.abs() < 1e15 {
        Ok(format!("{v:.1}"))
    } else {
        Ok(format!("{v}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn strings_escape_quotes() {
        let value = SqlValue::String("O'Brien".into());
        assert_eq!(render_literal(&value, false).unwrap(), "'O''Brien'");
        assert_eq!(render_literal(&value, true).unwrap(), "N'O''Brien'");
    }

    #[test]
    fn binary_hex() {
        let value = SqlValue::Binary(bytes::Bytes::from_static(&[0x01, 0xAB]));
        assert_eq!(render_literal(&value, false).unwrap(), "0x01AB");
    }

    #[test]
    fn floats_keep_point() {
        assert_eq!(render_literal(&SqlValue::Double(3.0), false).unwrap(), "3.0");
        assert_eq!(
            render_literal(&SqlValue::Double(3.25), false).unwrap(),
            "3.25"
        );
    }

    #[test]
    fn nan_and_inf_rejected() {
        assert!(render_literal(&SqlValue::Double(f64::NAN), false).is_err());
        assert!(render_literal(&SqlValue::Float(f32::NEG_INFINITY), false).is_err());
    }

    #[test]
    fn decimal_preserves_scale() {
        let value = SqlValue::Decimal(rust_decimal::Decimal::new(1200, 2));
        assert_eq!(render_literal(&value, false).unwrap(), "12.00");
    }

    #[test]
    fn uuid_standard_form() {
        let value = SqlValue::Uuid(
            uuid::Uuid::parse_str("12345678-1234-5678-1234-567812345678").unwrap(),
        );
        assert_eq!(
            render_literal(&value, false).unwrap(),
            "'12345678-1234-5678-1234-567812345678'"
        );
    }

    #[test]
    fn null_renders_bare() {
        assert_eq!(render_literal(&SqlValue::Null, true).unwrap(), "NULL");
    }
}
