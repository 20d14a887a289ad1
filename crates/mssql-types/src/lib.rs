//! # mssql-types
//!
//! SQL Server value representation and the binary codecs that move values
//! across the TDS wire: per-type decode for result rows, per-type encode for
//! the bulk-load row stream, and T-SQL literal rendering for generated DML.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod literal;
pub mod value;

pub use decode::{decode_nbc_row, decode_row, decode_value};
pub use encode::encode_value;
pub use error::TypeError;
pub use literal::render_literal;
pub use value::SqlValue;
