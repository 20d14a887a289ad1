//! T-SQL generation for INSERT, rowid UPDATE/DELETE, and CTAS DDL.
//!
//! Rows arrive from the host engine as values; statements leave as batched
//! T-SQL. Batchers flush on a row/parameter cap or a byte cap, whichever
//! hits first. Identifiers are bracket-quoted with `]` doubled; string
//! literals take the `N` prefix when the target column is Unicode.

use mssql_types::{SqlValue, render_literal};
use tds_protocol::typeinfo::{PLP_MARKER, TypeId, TypeInfo};

use crate::catalog::TableDetails;
use crate::error::{Error, Result};

/// Quote an identifier in brackets, doubling any closing bracket.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `[schema].[table]`.
#[must_use]
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// A column targeted by generated DML.
#[derive(Debug, Clone)]
pub struct TargetColumn {
    /// Column name.
    pub name: String,
    /// Whether string literals for this column take the `N` prefix.
    pub unicode: bool,
}

impl TargetColumn {
    /// Build from catalog metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, unicode: bool) -> Self {
        Self {
            name: name.into(),
            unicode,
        }
    }
}

/// Derive the rowid columns (primary key) for UPDATE/DELETE targeting.
pub fn rowid_columns(details: &TableDetails) -> Result<Vec<TargetColumn>> {
    if details.primary_key.is_empty() {
        return Err(Error::SchemaMismatch(
            "UPDATE/DELETE requires a declared primary key".into(),
        ));
    }
    details
        .primary_key
        .iter()
        .map(|key| {
            details
                .columns
                .iter()
                .find(|c| &c.name == key)
                .map(|c| TargetColumn::new(c.name.clone(), c.is_unicode))
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!("primary key column {key} not in column list"))
                })
        })
        .collect()
}

fn render_tuple(values: &[SqlValue], columns: &[TargetColumn]) -> Result<String> {
    if values.len() != columns.len() {
        return Err(Error::SchemaMismatch(format!(
            "expected {} values, got {}",
            columns.len(),
            values.len()
        )));
    }
    let mut parts = Vec::with_capacity(values.len());
    for (value, column) in values.iter().zip(columns) {
        parts.push(render_literal(value, column.unicode)?);
    }
    Ok(format!("({})", parts.join(", ")))
}

/// Accumulates rows into batched multi-row INSERT statements.
#[derive(Debug)]
pub struct InsertBatcher {
    target: String,
    columns: Vec<TargetColumn>,
    output: Option<Vec<String>>,
    max_rows: usize,
    max_bytes: usize,
    tuples: Vec<String>,
    pending_bytes: usize,
}

impl InsertBatcher {
    /// Create a batcher for `[schema].[table]`.
    #[must_use]
    pub fn new(
        schema: &str,
        table: &str,
        columns: Vec<TargetColumn>,
        max_rows: usize,
        max_bytes: usize,
    ) -> Self {
        Self {
            target: qualified_name(schema, table),
            columns,
            output: None,
            max_rows: max_rows.max(1),
            max_bytes: max_bytes.max(1),
            tuples: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Add an `OUTPUT INSERTED` clause (RETURNING translation).
    #[must_use]
    pub fn with_output(mut self, columns: Vec<String>) -> Self {
        self.output = Some(columns);
        self
    }

    /// Push a row; returns a flushed statement when a cap is reached.
    pub fn push(&mut self, values: &[SqlValue]) -> Result<Option<String>> {
        let tuple = render_tuple(values, &self.columns)?;
        self.pending_bytes += tuple.len() + 2;
        self.tuples.push(tuple);

        if self.tuples.len() >= self.max_rows || self.pending_bytes >= self.max_bytes {
            return Ok(self.flush());
        }
        Ok(None)
    }

    /// Flush any buffered rows into a statement.
    pub fn flush(&mut self) -> Option<String> {
        if self.tuples.is_empty() {
            return None;
        }
        let tuples = std::mem::take(&mut self.tuples);
        self.pending_bytes = 0;

        let column_list = self
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let output = match &self.output {
            Some(columns) if !columns.is_empty() => {
                let list = columns
                    .iter()
                    .map(|c| format!("INSERTED.{}", quote_identifier(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" OUTPUT {list}")
            }
            _ => String::new(),
        };

        Some(format!(
            "INSERT INTO {} ({column_list}){output} VALUES {}",
            self.target,
            tuples.join(", ")
        ))
    }

    /// Buffered row count.
    #[must_use]
    pub fn pending_rows(&self) -> usize {
        self.tuples.len()
    }
}

/// UPDATE or DELETE by row identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIdDml {
    /// `UPDATE ... FROM ... JOIN (VALUES ...)`.
    Update,
    /// `DELETE ... FROM ... JOIN (VALUES ...)`.
    Delete,
}

/// Accumulates rowid-targeted changes into VALUES-join statements.
///
/// Each buffered row carries the key values followed (for UPDATE) by the new
/// column values. Batching is by total parameter count and bytes.
#[derive(Debug)]
pub struct RowIdBatcher {
    kind: RowIdDml,
    target: String,
    key_columns: Vec<TargetColumn>,
    value_columns: Vec<TargetColumn>,
    max_params: usize,
    max_bytes: usize,
    tuples: Vec<String>,
    pending_bytes: usize,
}

impl RowIdBatcher {
    /// Create a batcher. `value_columns` must be empty for DELETE.
    pub fn new(
        kind: RowIdDml,
        schema: &str,
        table: &str,
        key_columns: Vec<TargetColumn>,
        value_columns: Vec<TargetColumn>,
        max_params: usize,
        max_bytes: usize,
    ) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(Error::SchemaMismatch(
                "rowid DML requires at least one key column".into(),
            ));
        }
        if kind == RowIdDml::Delete && !value_columns.is_empty() {
            return Err(Error::SchemaMismatch(
                "DELETE carries no value columns".into(),
            ));
        }
        Ok(Self {
            kind,
            target: qualified_name(schema, table),
            key_columns,
            value_columns,
            max_params: max_params.max(1),
            max_bytes: max_bytes.max(1),
            tuples: Vec::new(),
            pending_bytes: 0,
        })
    }

    fn params_per_row(&self) -> usize {
        self.key_columns.len() + self.value_columns.len()
    }

    /// Push one row's key and (for UPDATE) new values.
    pub fn push(&mut self, keys: &[SqlValue], values: &[SqlValue]) -> Result<Option<String>> {
        if keys.len() != self.key_columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "expected {} key values, got {}",
                self.key_columns.len(),
                keys.len()
            )));
        }
        if values.len() != self.value_columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "expected {} new values, got {}",
                self.value_columns.len(),
                values.len()
            )));
        }

        let mut parts = Vec::with_capacity(self.params_per_row());
        for (value, column) in keys.iter().zip(&self.key_columns) {
            parts.push(render_literal(value, column.unicode)?);
        }
        for (value, column) in values.iter().zip(&self.value_columns) {
            parts.push(render_literal(value, column.unicode)?);
        }
        let tuple = format!("({})", parts.join(", "));
        self.pending_bytes += tuple.len() + 2;
        self.tuples.push(tuple);

        let params = (self.tuples.len() + 1) * self.params_per_row();
        if params > self.max_params || self.pending_bytes >= self.max_bytes {
            return Ok(self.flush());
        }
        Ok(None)
    }

    /// Flush buffered rows into a statement.
    pub fn flush(&mut self) -> Option<String> {
        if self.tuples.is_empty() {
            return None;
        }
        let tuples = std::mem::take(&mut self.tuples);
        self.pending_bytes = 0;

        let mut src_columns: Vec<String> = self
            .key_columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect();
        src_columns.extend(
            self.value_columns
                .iter()
                .map(|c| format!("[src_{}]", c.name.replace(']', "]]"))),
        );

        let join = self
            .key_columns
            .iter()
            .map(|c| {
                let id = quote_identifier(&c.name);
                format!("t.{id} = src.{id}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        let statement = match self.kind {
            RowIdDml::Update => {
                let assignments = self
                    .value_columns
                    .iter()
                    .map(|c| {
                        format!(
                            "{} = src.[src_{}]",
                            quote_identifier(&c.name),
                            c.name.replace(']', "]]")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE t SET {assignments} FROM {} AS t JOIN (VALUES {}) AS src({}) ON {join}",
                    self.target,
                    tuples.join(", "),
                    src_columns.join(", ")
                )
            }
            RowIdDml::Delete => format!(
                "DELETE t FROM {} AS t JOIN (VALUES {}) AS src({}) ON {join}",
                self.target,
                tuples.join(", "),
                src_columns.join(", ")
            ),
        };
        Some(statement)
    }

    /// Buffered row count.
    #[must_use]
    pub fn pending_rows(&self) -> usize {
        self.tuples.len()
    }
}

// =============================================================================
// CTAS type mapping
// =============================================================================

/// Logical column types handed across from the host planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    /// Boolean.
    Boolean,
    /// 8-bit integer.
    TinyInt,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// 32-bit float.
    Real,
    /// 64-bit float.
    Double,
    /// Decimal with precision and scale.
    Decimal(u8, u8),
    /// Variable-length string; `None` means unbounded.
    Varchar(Option<u32>),
    /// Variable-length binary.
    Blob,
    /// UUID.
    Uuid,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Timestamp without timezone.
    Timestamp,
    /// Timestamp with timezone offset.
    TimestampTz,
}

impl LogicalType {
    /// T-SQL column type for generated DDL.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Boolean => "bit".into(),
            Self::TinyInt => "tinyint".into(),
            Self::SmallInt => "smallint".into(),
            Self::Integer => "int".into(),
            Self::BigInt => "bigint".into(),
            Self::Real => "real".into(),
            Self::Double => "float".into(),
            Self::Decimal(precision, scale) => {
                let precision = (*precision).clamp(1, 38);
                let scale = (*scale).min(precision).min(38);
                format!("decimal({precision}, {scale})")
            }
            // Unbounded strings default to nvarchar(max); bounded ones keep
            // their limit when it fits the 4000-character nvarchar cap.
            Self::Varchar(None) => "nvarchar(max)".into(),
            Self::Varchar(Some(len)) if *len == 0 || *len > 4000 => "nvarchar(max)".into(),
            Self::Varchar(Some(len)) => format!("nvarchar({len})"),
            Self::Blob => "varbinary(max)".into(),
            Self::Uuid => "uniqueidentifier".into(),
            Self::Date => "date".into(),
            Self::Time => "time(7)".into(),
            Self::Timestamp => "datetime2(7)".into(),
            Self::TimestampTz => "datetimeoffset(7)".into(),
        }
    }

    /// Wire TYPE_INFO for the bulk-load COLMETADATA. Nullable wire forms are
    /// used throughout so NULLs encode as zero-length values.
    #[must_use]
    pub fn type_info(&self) -> TypeInfo {
        match self {
            Self::Boolean => TypeInfo::byte_len(TypeId::BitN, 1),
            Self::TinyInt => TypeInfo::byte_len(TypeId::IntN, 1),
            Self::SmallInt => TypeInfo::byte_len(TypeId::IntN, 2),
            Self::Integer => TypeInfo::byte_len(TypeId::IntN, 4),
            Self::BigInt => TypeInfo::byte_len(TypeId::IntN, 8),
            Self::Real => TypeInfo::byte_len(TypeId::FloatN, 4),
            Self::Double => TypeInfo::byte_len(TypeId::FloatN, 8),
            Self::Decimal(precision, scale) => {
                TypeInfo::decimal((*precision).clamp(1, 38), (*scale).min(38))
            }
            Self::Varchar(Some(len)) if *len > 0 && *len <= 4000 => {
                TypeInfo::nvarchar((*len * 2) as u16)
            }
            Self::Varchar(_) => TypeInfo::nvarchar(PLP_MARKER),
            Self::Blob => TypeInfo::varbinary(PLP_MARKER),
            Self::Uuid => TypeInfo::byte_len(TypeId::Guid, 16),
            Self::Date => TypeInfo::fixed(TypeId::Date),
            Self::Time => TypeInfo::with_scale(TypeId::Time, 7),
            Self::Timestamp => TypeInfo::with_scale(TypeId::DateTime2, 7),
            Self::TimestampTz => TypeInfo::with_scale(TypeId::DateTimeOffset, 7),
        }
    }

    /// Whether literals for this type take the `N` prefix.
    #[must_use]
    pub fn is_unicode(&self) -> bool {
        matches!(self, Self::Varchar(_))
    }
}

/// A CTAS output column.
#[derive(Debug, Clone)]
pub struct CtasColumn {
    /// Column name.
    pub name: String,
    /// Logical type from the planner.
    pub logical_type: LogicalType,
    /// Whether NULLs are allowed.
    pub nullable: bool,
}

/// `CREATE TABLE` DDL for a CTAS target.
#[must_use]
pub fn create_table_sql(schema: &str, table: &str, columns: &[CtasColumn]) -> String {
    let column_defs = columns
        .iter()
        .map(|c| {
            format!(
                "{} {}{}",
                quote_identifier(&c.name),
                c.logical_type.to_sql(),
                if c.nullable { " NULL" } else { " NOT NULL" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {} ({column_defs})",
        qualified_name(schema, table)
    )
}

/// `DROP TABLE` for `OR REPLACE` and drop-on-failure.
#[must_use]
pub fn drop_table_sql(schema: &str, table: &str, if_exists: bool) -> String {
    if if_exists {
        format!("DROP TABLE IF EXISTS {}", qualified_name(schema, table))
    } else {
        format!("DROP TABLE {}", qualified_name(schema, table))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identifier_escaping_doubles_bracket() {
        assert_eq!(quote_identifier("simple"), "[simple]");
        assert_eq!(quote_identifier("odd]name"), "[odd]]name]");
        assert_eq!(qualified_name("dbo", "Orders"), "[dbo].[Orders]");
    }

    #[test]
    fn insert_batches_by_rows() {
        let mut batcher = InsertBatcher::new(
            "dbo",
            "T",
            vec![
                TargetColumn::new("id", false),
                TargetColumn::new("name", true),
            ],
            2,
            1 << 20,
        );

        let first = batcher
            .push(&[SqlValue::Int(1), SqlValue::String("a".into())])
            .unwrap();
        assert!(first.is_none());

        let flushed = batcher
            .push(&[SqlValue::Int(2), SqlValue::String("b".into())])
            .unwrap()
            .unwrap();
        assert_eq!(
            flushed,
            "INSERT INTO [dbo].[T] ([id], [name]) VALUES (1, N'a'), (2, N'b')"
        );
        assert_eq!(batcher.pending_rows(), 0);
    }

    #[test]
    fn insert_batches_by_bytes() {
        let mut batcher = InsertBatcher::new(
            "dbo",
            "T",
            vec![TargetColumn::new("v", true)],
            1000,
            32,
        );
        let long = SqlValue::String("x".repeat(40));
        let flushed = batcher.push(std::slice::from_ref(&long)).unwrap();
        assert!(flushed.is_some());
    }

    #[test]
    fn insert_output_clause() {
        let mut batcher = InsertBatcher::new(
            "dbo",
            "T",
            vec![TargetColumn::new("name", true)],
            1,
            1 << 20,
        )
        .with_output(vec!["id".into()]);

        let statement = batcher
            .push(&[SqlValue::String("a".into())])
            .unwrap()
            .unwrap();
        assert_eq!(
            statement,
            "INSERT INTO [dbo].[T] ([name]) OUTPUT INSERTED.[id] VALUES (N'a')"
        );
    }

    #[test]
    fn insert_rejects_arity_mismatch() {
        let mut batcher =
            InsertBatcher::new("dbo", "T", vec![TargetColumn::new("a", false)], 10, 1024);
        let err = batcher.push(&[SqlValue::Int(1), SqlValue::Int(2)]);
        assert!(matches!(err, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn update_values_join_shape() {
        let mut batcher = RowIdBatcher::new(
            RowIdDml::Update,
            "dbo",
            "T",
            vec![TargetColumn::new("id", false)],
            vec![TargetColumn::new("name", true)],
            2000,
            1 << 20,
        )
        .unwrap();

        batcher
            .push(&[SqlValue::Int(1)], &[SqlValue::String("x".into())])
            .unwrap();
        let statement = batcher.flush().unwrap();
        assert_eq!(
            statement,
            "UPDATE t SET [name] = src.[src_name] FROM [dbo].[T] AS t \
             JOIN (VALUES (1, N'x')) AS src([id], [src_name]) ON t.[id] = src.[id]"
        );
    }

    #[test]
    fn delete_composite_key() {
        let mut batcher = RowIdBatcher::new(
            RowIdDml::Delete,
            "dbo",
            "T",
            vec![
                TargetColumn::new("a", false),
                TargetColumn::new("b", false),
            ],
            vec![],
            2000,
            1 << 20,
        )
        .unwrap();

        batcher
            .push(&[SqlValue::Int(1), SqlValue::Int(2)], &[])
            .unwrap();
        batcher
            .push(&[SqlValue::Int(3), SqlValue::Int(4)], &[])
            .unwrap();
        let statement = batcher.flush().unwrap();
        assert_eq!(
            statement,
            "DELETE t FROM [dbo].[T] AS t JOIN (VALUES (1, 2), (3, 4)) AS src([a], [b]) \
             ON t.[a] = src.[a] AND t.[b] = src.[b]"
        );
    }

    #[test]
    fn rowid_batcher_flushes_at_param_cap() {
        // 2 params per row, cap 6: flushes when a 4th row would exceed.
        let mut batcher = RowIdBatcher::new(
            RowIdDml::Delete,
            "dbo",
            "T",
            vec![
                TargetColumn::new("a", false),
                TargetColumn::new("b", false),
            ],
            vec![],
            6,
            1 << 20,
        )
        .unwrap();

        assert!(batcher.push(&[SqlValue::Int(1), SqlValue::Int(1)], &[]).unwrap().is_none());
        assert!(batcher.push(&[SqlValue::Int(2), SqlValue::Int(2)], &[]).unwrap().is_none());
        let flushed = batcher.push(&[SqlValue::Int(3), SqlValue::Int(3)], &[]).unwrap();
        assert!(flushed.is_some());
        assert_eq!(batcher.pending_rows(), 0);
    }

    #[test]
    fn nan_rejected_in_dml() {
        let mut batcher =
            InsertBatcher::new("dbo", "T", vec![TargetColumn::new("f", false)], 10, 1024);
        let err = batcher.push(&[SqlValue::Double(f64::NAN)]);
        assert!(err.is_err());
    }

    #[test]
    fn ctas_type_map() {
        assert_eq!(LogicalType::Boolean.to_sql(), "bit");
        assert_eq!(LogicalType::Varchar(None).to_sql(), "nvarchar(max)");
        assert_eq!(LogicalType::Varchar(Some(100)).to_sql(), "nvarchar(100)");
        assert_eq!(LogicalType::Varchar(Some(8000)).to_sql(), "nvarchar(max)");
        assert_eq!(LogicalType::Decimal(18, 2).to_sql(), "decimal(18, 2)");
        assert_eq!(LogicalType::Decimal(60, 45).to_sql(), "decimal(38, 38)");
        assert_eq!(LogicalType::Timestamp.to_sql(), "datetime2(7)");
        assert_eq!(LogicalType::Blob.to_sql(), "varbinary(max)");
    }

    #[test]
    fn create_table_ddl() {
        let sql = create_table_sql(
            "dbo",
            "X",
            &[
                CtasColumn {
                    name: "id".into(),
                    logical_type: LogicalType::Integer,
                    nullable: false,
                },
                CtasColumn {
                    name: "name".into(),
                    logical_type: LogicalType::Varchar(None),
                    nullable: true,
                },
            ],
        );
        assert_eq!(
            sql,
            "CREATE TABLE [dbo].[X] ([id] int NOT NULL, [name] nvarchar(max) NULL)"
        );
    }

    #[test]
    fn rowid_from_details() {
        use crate::catalog::ColumnInfo;

        let details = TableDetails {
            columns: vec![ColumnInfo {
                name: "id".into(),
                ordinal: 1,
                type_name: "int".into(),
                max_length: 4,
                precision: 10,
                scale: 0,
                is_nullable: false,
                collation: None,
                is_case_sensitive: false,
                is_unicode: false,
            }],
            primary_key: vec!["id".into()],
        };
        let columns = rowid_columns(&details).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "id");

        let no_pk = TableDetails {
            primary_key: vec![],
            ..details
        };
        assert!(matches!(
            rowid_columns(&no_pk),
            Err(Error::SchemaMismatch(_))
        ));
    }
}
