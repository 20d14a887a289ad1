//! Incremental metadata cache.
//!
//! Three lazily loaded levels: schema names, per-schema table lists,
//! per-table column lists (with primary keys). Every level carries its own
//! load state, refresh timestamp and loader lock; readers on a loaded node
//! never take a lock beyond an atomic check and a read guard. DDL
//! invalidates exactly one level and the next access reloads it.
//!
//! Lock hierarchy: a loader lock is only ever held for its own node, never
//! while touching a higher level.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

const STATE_NOT_LOADED: u8 = 0;
const STATE_LOADING: u8 = 1;
const STATE_LOADED: u8 = 2;

/// A table or view as discovered from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Object name.
    pub name: String,
    /// Table or view.
    pub kind: RelationKind,
    /// Row count estimate from partition statistics.
    pub approx_row_count: i64,
}

/// Relation kinds surfaced to the host catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// User table.
    Table,
    /// View.
    View,
}

/// A column as discovered from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// 1-based ordinal.
    pub ordinal: i32,
    /// SQL Server type name.
    pub type_name: String,
    /// Declared max length in bytes (-1 for MAX).
    pub max_length: i32,
    /// Precision for numeric types.
    pub precision: u8,
    /// Scale for numeric and time types.
    pub scale: u8,
    /// Whether NULLs are allowed.
    pub is_nullable: bool,
    /// Collation name, when the type has one.
    pub collation: Option<String>,
    /// Whether comparisons are case-sensitive.
    pub is_case_sensitive: bool,
    /// Whether the type stores UTF-16 data.
    pub is_unicode: bool,
}

/// Column list and primary key of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDetails {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnInfo>,
    /// Primary key column names in key order; empty when undeclared.
    pub primary_key: Vec<String>,
}

/// Where the cache reads catalog data from. Implemented by the connection
/// over `sys.*` queries; tests substitute a scripted source.
#[async_trait]
pub trait CatalogSource: Send {
    /// One row per schema name.
    async fn schema_names(&mut self) -> Result<Vec<String>>;
    /// Tables and views of one schema with row-count estimates.
    async fn tables(&mut self, schema: &str) -> Result<Vec<TableInfo>>;
    /// Columns and primary key of one table.
    async fn table_details(&mut self, schema: &str, table: &str) -> Result<TableDetails>;
}

/// One cache level: load state, refresh stamp, loader lock, value.
struct Node<T> {
    state: AtomicU8,
    last_refresh: Mutex<Option<Instant>>,
    loader: tokio::sync::Mutex<()>,
    value: RwLock<T>,
}

impl<T: Clone> Node<T> {
    fn new(initial: T) -> Self {
        Self {
            state: AtomicU8::new(STATE_NOT_LOADED),
            last_refresh: Mutex::new(None),
            loader: tokio::sync::Mutex::new(()),
            value: RwLock::new(initial),
        }
    }

    /// Lock-free read path: loaded and not expired.
    fn fast_read(&self, ttl: Duration) -> Option<T> {
        if self.state.load(Ordering::Acquire) != STATE_LOADED {
            return None;
        }
        if !ttl.is_zero() {
            let expired = self
                .last_refresh
                .lock()
                .is_some_and(|at| at.elapsed() >= ttl);
            if expired {
                // Expiry resets to NotLoaded; the caller reloads lazily.
                let _ = self.state.compare_exchange(
                    STATE_LOADED,
                    STATE_NOT_LOADED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                return None;
            }
        }
        Some(self.value.read().clone())
    }

    fn commit(&self, value: T) {
        *self.value.write() = value;
        *self.last_refresh.lock() = Some(Instant::now());
        self.state.store(STATE_LOADED, Ordering::Release);
    }

    fn invalidate(&self) {
        self.state.store(STATE_NOT_LOADED, Ordering::Release);
    }

    fn refreshed_at(&self) -> Option<Instant> {
        *self.last_refresh.lock()
    }
}

struct TableEntry {
    info: TableInfo,
    details: Node<TableDetails>,
}

struct SchemaEntry {
    tables: Node<BTreeMap<String, Arc<TableEntry>>>,
}

impl SchemaEntry {
    fn new() -> Self {
        Self {
            tables: Node::new(BTreeMap::new()),
        }
    }
}

/// The metadata cache of one attached context.
pub struct MetadataCache {
    ttl: Duration,
    schema_filter: Option<Regex>,
    table_filter: Option<Regex>,
    schemas: Node<BTreeMap<String, Arc<SchemaEntry>>>,
}

impl MetadataCache {
    /// Create a cache.
    ///
    /// `ttl` of zero never expires. The filters are case-insensitive
    /// partial-match regexes; patterns were validated at attach time, an
    /// unparseable one here degrades to no filtering.
    #[must_use]
    pub fn new(ttl: Duration, schema_filter: Option<&str>, table_filter: Option<&str>) -> Self {
        let compile = |pattern: Option<&str>| {
            pattern.and_then(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
        };
        Self {
            ttl,
            schema_filter: compile(schema_filter),
            table_filter: compile(table_filter),
            schemas: Node::new(BTreeMap::new()),
        }
    }

    /// Schema names, loading lazily on first access.
    pub async fn schema_names(&self, source: &mut dyn CatalogSource) -> Result<Vec<String>> {
        let map = self.schema_map(source).await?;
        Ok(map.keys().cloned().collect())
    }

    /// Tables of one schema.
    pub async fn table_names(
        &self,
        source: &mut dyn CatalogSource,
        schema: &str,
    ) -> Result<Vec<TableInfo>> {
        let entry = self.schema_entry(source, schema).await?;
        let map = self.table_map(source, schema, &entry).await?;
        Ok(map.values().map(|t| t.info.clone()).collect())
    }

    /// Columns and primary key of one table.
    pub async fn columns(
        &self,
        source: &mut dyn CatalogSource,
        schema: &str,
        table: &str,
    ) -> Result<TableDetails> {
        let entry = self.schema_entry(source, schema).await?;
        let tables = self.table_map(source, schema, &entry).await?;
        let table_entry = tables.get(table).ok_or_else(|| {
            Error::SchemaMismatch(format!("table {schema}.{table} not found"))
        })?;

        if let Some(details) = table_entry.details.fast_read(self.ttl) {
            return Ok(details);
        }
        let _guard = table_entry.details.loader.lock().await;
        if let Some(details) = table_entry.details.fast_read(self.ttl) {
            return Ok(details);
        }
        table_entry
            .details
            .state
            .store(STATE_LOADING, Ordering::Release);
        match source.table_details(schema, table).await {
            Ok(details) => {
                table_entry.details.commit(details.clone());
                Ok(details)
            }
            Err(e) => {
                table_entry
                    .details
                    .state
                    .store(STATE_NOT_LOADED, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Drop the schema list (level one only); table and column nodes stay
    /// attached to their entries and reload independently.
    pub fn invalidate_all(&self) {
        tracing::debug!("invalidating schema list");
        self.schemas.invalidate();
    }

    /// Drop one schema's table list.
    pub fn invalidate_schema(&self, schema: &str) {
        if let Some(entry) = self.schemas.value.read().get(schema) {
            tracing::debug!(schema, "invalidating table list");
            entry.tables.invalidate();
        }
    }

    /// Drop one table's column list.
    pub fn invalidate_table(&self, schema: &str, table: &str) {
        let schemas = self.schemas.value.read();
        let Some(entry) = schemas.get(schema) else {
            return;
        };
        if let Some(table_entry) = entry.tables.value.read().get(table) {
            tracing::debug!(schema, table, "invalidating column list");
            table_entry.details.invalidate();
        }
    }

    /// When the table list of a schema was last loaded. Diagnostic surface
    /// used by tests and `pool_stats`-adjacent introspection.
    #[must_use]
    pub fn table_list_refreshed_at(&self, schema: &str) -> Option<Instant> {
        self.schemas
            .value
            .read()
            .get(schema)
            .and_then(|entry| entry.tables.refreshed_at())
    }

    async fn schema_map(
        &self,
        source: &mut dyn CatalogSource,
    ) -> Result<BTreeMap<String, Arc<SchemaEntry>>> {
        if let Some(map) = self.schemas.fast_read(self.ttl) {
            return Ok(map);
        }
        let _guard = self.schemas.loader.lock().await;
        if let Some(map) = self.schemas.fast_read(self.ttl) {
            return Ok(map);
        }
        self.schemas.state.store(STATE_LOADING, Ordering::Release);

        match source.schema_names().await {
            Ok(names) => {
                // Keep existing entries so table/column caches survive a
                // schema-list reload.
                let previous = self.schemas.value.read().clone();
                let mut map = BTreeMap::new();
                for name in names {
                    if let Some(ref filter) = self.schema_filter {
                        if !filter.is_match(&name) {
                            continue;
                        }
                    }
                    let entry = previous
                        .get(&name)
                        .cloned()
                        .unwrap_or_else(|| Arc::new(SchemaEntry::new()));
                    map.insert(name, entry);
                }
                self.schemas.commit(map.clone());
                Ok(map)
            }
            Err(e) => {
                self.schemas.state.store(STATE_NOT_LOADED, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn schema_entry(
        &self,
        source: &mut dyn CatalogSource,
        schema: &str,
    ) -> Result<Arc<SchemaEntry>> {
        let map = self.schema_map(source).await?;
        map.get(schema)
            .cloned()
            .ok_or_else(|| Error::SchemaMismatch(format!("schema {schema} not found")))
    }

    async fn table_map(
        &self,
        source: &mut dyn CatalogSource,
        schema: &str,
        entry: &Arc<SchemaEntry>,
    ) -> Result<BTreeMap<String, Arc<TableEntry>>> {
        if let Some(map) = entry.tables.fast_read(self.ttl) {
            return Ok(map);
        }
        let _guard = entry.tables.loader.lock().await;
        if let Some(map) = entry.tables.fast_read(self.ttl) {
            return Ok(map);
        }
        entry.tables.state.store(STATE_LOADING, Ordering::Release);

        match source.tables(schema).await {
            Ok(tables) => {
                let previous = entry.tables.value.read().clone();
                let mut map = BTreeMap::new();
                for info in tables {
                    if let Some(ref filter) = self.table_filter {
                        if !filter.is_match(&info.name) {
                            continue;
                        }
                    }
                    // Reuse the column node when the table is unchanged.
                    let table_entry = match previous.get(&info.name) {
                        Some(existing) if existing.info == info => Arc::clone(existing),
                        _ => Arc::new(TableEntry {
                            info: info.clone(),
                            details: Node::new(TableDetails::default()),
                        }),
                    };
                    map.insert(info.name.clone(), table_entry);
                }
                entry.tables.commit(map.clone());
                Ok(map)
            }
            Err(e) => {
                entry.tables.state.store(STATE_NOT_LOADED, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Discovery queries
// =============================================================================

use mssql_types::SqlValue;

use crate::connection::Connection;
use crate::stream::QueryStream;

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

async fn query_rows(conn: &mut Connection, sql: &str) -> Result<Vec<Vec<SqlValue>>> {
    let stream = QueryStream::start(conn, sql, 1024, std::time::Duration::ZERO).await?;
    let chunks = stream.collect_all().await?;

    let mut rows = Vec::new();
    for chunk in chunks {
        for row_index in 0..chunk.row_count() {
            rows.push(
                chunk
                    .data
                    .iter()
                    .map(|column| column[row_index].clone())
                    .collect(),
            );
        }
    }
    Ok(rows)
}

fn field_str(row: &[SqlValue], index: usize) -> String {
    row.get(index)
        .and_then(SqlValue::as_str)
        .map(str::trim_end)
        .unwrap_or_default()
        .to_string()
}

fn field_i64(row: &[SqlValue], index: usize) -> i64 {
    row.get(index).and_then(SqlValue::as_i64).unwrap_or_default()
}

fn field_bool(row: &[SqlValue], index: usize) -> bool {
    match row.get(index) {
        Some(SqlValue::Bool(v)) => *v,
        Some(other) => other.as_i64().unwrap_or_default() != 0,
        None => false,
    }
}

#[async_trait]
impl CatalogSource for Connection {
    async fn schema_names(&mut self) -> Result<Vec<String>> {
        let rows = query_rows(self, "SELECT name FROM sys.schemas ORDER BY name").await?;
        Ok(rows.iter().map(|row| field_str(row, 0)).collect())
    }

    async fn tables(&mut self, schema: &str) -> Result<Vec<TableInfo>> {
        let sql = format!(
            "SELECT o.name, o.type, ISNULL(SUM(p.rows), 0) \
             FROM sys.objects o \
             JOIN sys.schemas s ON s.schema_id = o.schema_id \
             LEFT JOIN sys.partitions p \
               ON p.object_id = o.object_id AND p.index_id IN (0, 1) \
             WHERE o.type IN ('U', 'V') AND s.name = N'{}' \
             GROUP BY o.name, o.type \
             ORDER BY o.name",
            escape_literal(schema)
        );
        let rows = query_rows(self, &sql).await?;
        Ok(rows
            .iter()
            .map(|row| TableInfo {
                name: field_str(row, 0),
                kind: if field_str(row, 1) == "V" {
                    RelationKind::View
                } else {
                    RelationKind::Table
                },
                approx_row_count: field_i64(row, 2),
            })
            .collect())
    }

    async fn table_details(&mut self, schema: &str, table: &str) -> Result<TableDetails> {
        let schema_lit = escape_literal(schema);
        let table_lit = escape_literal(table);

        let sql = format!(
            "SELECT c.name, c.column_id, t.name, c.max_length, c.precision, c.scale, \
                    c.is_nullable, c.collation_name \
             FROM sys.columns c \
             JOIN sys.types t ON t.user_type_id = c.user_type_id \
             JOIN sys.objects o ON o.object_id = c.object_id \
             JOIN sys.schemas s ON s.schema_id = o.schema_id \
             WHERE s.name = N'{schema_lit}' AND o.name = N'{table_lit}' \
             ORDER BY c.column_id"
        );
        let rows = query_rows(self, &sql).await?;
        let columns: Vec<ColumnInfo> = rows
            .iter()
            .map(|row| {
                let type_name = field_str(row, 2);
                let collation = match field_str(row, 7) {
                    s if s.is_empty() => None,
                    s => Some(s),
                };
                ColumnInfo {
                    name: field_str(row, 0),
                    ordinal: field_i64(row, 1) as i32,
                    max_length: field_i64(row, 3) as i32,
                    precision: field_i64(row, 4) as u8,
                    scale: field_i64(row, 5) as u8,
                    is_nullable: field_bool(row, 6),
                    is_case_sensitive: collation
                        .as_deref()
                        .is_some_and(|c| c.contains("_CS")),
                    is_unicode: matches!(type_name.as_str(), "nchar" | "nvarchar" | "ntext"),
                    collation,
                    type_name,
                }
            })
            .collect();

        if columns.is_empty() {
            return Err(Error::SchemaMismatch(format!(
                "table {schema}.{table} has no columns or does not exist"
            )));
        }

        let pk_sql = format!(
            "SELECT c.name \
             FROM sys.indexes i \
             JOIN sys.index_columns ic \
               ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             JOIN sys.columns c \
               ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
             JOIN sys.objects o ON o.object_id = i.object_id \
             JOIN sys.schemas s ON s.schema_id = o.schema_id \
             WHERE i.is_primary_key = 1 \
               AND s.name = N'{schema_lit}' AND o.name = N'{table_lit}' \
             ORDER BY ic.key_ordinal"
        );
        let pk_rows = query_rows(self, &pk_sql).await?;
        let primary_key = pk_rows.iter().map(|row| field_str(row, 0)).collect();

        Ok(TableDetails {
            columns,
            primary_key,
        })
    }
}
