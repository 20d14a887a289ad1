//! Attach/detach registry and the host-facing functions.
//!
//! One [`Extension`] instance lives for the process. `attach` builds the
//! pool (whose factory dials and authenticates connections) and the metadata
//! cache; `detach` removes and drains them. `scan`/`exec` route through the
//! pool; explicit transactions pin a connection via
//! [`crate::transaction::Transaction`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mssql_pool::{Pool, PoolConfig, PoolError, PoolManager, PoolStats, PooledConnection};
use mssql_types::SqlValue;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::bulk::{BulkColumn, BulkLoadWriter};
use crate::catalog::{MetadataCache, TableDetails, TableInfo};
use crate::config::{AttachConfig, SecretResolver, strategy_from_secret};
use crate::connection::Connection;
use crate::dml::{
    CtasColumn, InsertBatcher, RowIdBatcher, RowIdDml, TargetColumn, create_table_sql,
    drop_table_sql, rowid_columns,
};
use crate::error::{Error, Result};
use crate::settings::{EngineSettings, FabricBulkPolicy};
use crate::stream::QueryStream;
use crate::transaction::Transaction;

static GLOBAL: Lazy<Extension> = Lazy::new(Extension::new);

/// CTAS behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct CtasOptions {
    /// Drop an existing table first.
    pub or_replace: bool,
    /// Best-effort `DROP TABLE` when the data load fails.
    pub drop_on_failure: bool,
    /// Load via the bulk path when the endpoint supports it.
    pub use_bulk: bool,
}

impl Default for CtasOptions {
    fn default() -> Self {
        Self {
            or_replace: false,
            drop_on_failure: false,
            use_bulk: true,
        }
    }
}

/// One attached SQL Server context.
pub struct AttachedContext {
    name: String,
    config: AttachConfig,
    pool: Arc<Pool<Connection>>,
    catalog: Option<Arc<MetadataCache>>,
}

impl AttachedContext {
    async fn acquire(&self) -> Result<PooledConnection<Connection>> {
        Ok(self.pool.acquire().await?)
    }

    /// Context name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach configuration.
    #[must_use]
    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    /// Pool statistics.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stream a query, borrowing a pooled connection for the stream's life.
    pub async fn scan(&self, sql: &str) -> Result<QueryStream<PooledConnection<Connection>>> {
        let settings = EngineSettings::global();
        let conn = self.acquire().await?;
        QueryStream::start(conn, sql, settings.chunk_rows, self.config.query_timeout).await
    }

    /// Execute a statement, returning affected rows.
    pub async fn exec(&self, sql: &str) -> Result<u64> {
        let mut conn = self.acquire().await?;
        let query_timeout = self.config.query_timeout;
        if query_timeout.is_zero() {
            return conn.execute(sql).await;
        }
        match tokio::time::timeout(query_timeout, conn.execute(sql)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = conn.cancel().await;
                Err(Error::QueryTimeout)
            }
        }
    }

    /// Begin an explicit transaction with a pinned connection.
    pub async fn begin_transaction(&self) -> Result<Transaction> {
        let conn = self.acquire().await?;
        Transaction::begin(conn).await
    }

    /// The metadata cache; `None` when attached with `catalog = false`.
    #[must_use]
    pub fn catalog(&self) -> Option<&Arc<MetadataCache>> {
        self.catalog.as_ref()
    }

    fn require_catalog(&self) -> Result<&Arc<MetadataCache>> {
        self.catalog
            .as_ref()
            .ok_or_else(|| Error::Config("catalog browsing is disabled for this context".into()))
    }

    /// Schema names from the cache, loading lazily.
    pub async fn schema_names(&self) -> Result<Vec<String>> {
        let catalog = self.require_catalog()?;
        let mut conn = self.acquire().await?;
        catalog.schema_names(&mut *conn).await
    }

    /// Tables of a schema from the cache.
    pub async fn table_names(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let catalog = self.require_catalog()?;
        let mut conn = self.acquire().await?;
        catalog.table_names(&mut *conn, schema).await
    }

    /// Columns and primary key of a table from the cache.
    pub async fn columns(&self, schema: &str, table: &str) -> Result<TableDetails> {
        let catalog = self.require_catalog()?;
        let mut conn = self.acquire().await?;
        catalog.columns(&mut *conn, schema, table).await
    }

    /// Drop every cached level; the next access reloads lazily.
    pub fn refresh_cache(&self) {
        if let Some(catalog) = &self.catalog {
            catalog.invalidate_all();
        }
    }

    /// Batched INSERT of host rows. Returns affected rows; with `returning`,
    /// OUTPUT result sets are drained (the host re-reads via scan when it
    /// needs them).
    pub async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: Vec<TargetColumn>,
        rows: impl IntoIterator<Item = Vec<SqlValue>>,
        returning: Option<Vec<String>>,
    ) -> Result<u64> {
        let settings = EngineSettings::global();
        let mut batcher = InsertBatcher::new(
            schema,
            table,
            columns,
            settings.insert_batch_rows,
            settings.insert_batch_bytes,
        );
        if let Some(output) = returning {
            batcher = batcher.with_output(output);
        }

        let mut affected = 0;
        for row in rows {
            if let Some(statement) = batcher.push(&row)? {
                affected += self.exec(&statement).await?;
            }
        }
        if let Some(statement) = batcher.flush() {
            affected += self.exec(&statement).await?;
        }
        Ok(affected)
    }

    /// Rowid-targeted UPDATE: each element carries the key values and the
    /// new values for `set_columns`.
    pub async fn update_rows(
        &self,
        schema: &str,
        table: &str,
        set_columns: Vec<TargetColumn>,
        rows: impl IntoIterator<Item = (Vec<SqlValue>, Vec<SqlValue>)>,
    ) -> Result<u64> {
        let details = self.columns(schema, table).await?;
        let keys = rowid_columns(&details)?;
        let settings = EngineSettings::global();
        let mut batcher = RowIdBatcher::new(
            RowIdDml::Update,
            schema,
            table,
            keys,
            set_columns,
            settings.dml_max_params,
            settings.insert_batch_bytes,
        )?;

        let mut affected = 0;
        for (key_values, new_values) in rows {
            if let Some(statement) = batcher.push(&key_values, &new_values)? {
                affected += self.exec(&statement).await?;
            }
        }
        if let Some(statement) = batcher.flush() {
            affected += self.exec(&statement).await?;
        }
        Ok(affected)
    }

    /// Rowid-targeted DELETE.
    pub async fn delete_rows(
        &self,
        schema: &str,
        table: &str,
        rows: impl IntoIterator<Item = Vec<SqlValue>>,
    ) -> Result<u64> {
        let details = self.columns(schema, table).await?;
        let keys = rowid_columns(&details)?;
        let settings = EngineSettings::global();
        let mut batcher = RowIdBatcher::new(
            RowIdDml::Delete,
            schema,
            table,
            keys,
            Vec::new(),
            settings.dml_max_params,
            settings.insert_batch_bytes,
        )?;

        let mut affected = 0;
        for key_values in rows {
            if let Some(statement) = batcher.push(&key_values, &[])? {
                affected += self.exec(&statement).await?;
            }
        }
        if let Some(statement) = batcher.flush() {
            affected += self.exec(&statement).await?;
        }
        Ok(affected)
    }

    /// CREATE TABLE AS SELECT: deterministic DDL phase, then data load via
    /// the bulk path or batched INSERT.
    pub async fn create_table_as(
        &self,
        schema: &str,
        table: &str,
        columns: Vec<CtasColumn>,
        rows: Vec<Vec<SqlValue>>,
        options: CtasOptions,
    ) -> Result<u64> {
        let settings = EngineSettings::global();

        if options.or_replace {
            self.exec(&drop_table_sql(schema, table, true)).await?;
        }
        self.exec(&create_table_sql(schema, table, &columns))
            .await
            .map_err(|e| match e {
                // A failure after OR REPLACE dropped the old table must say so.
                Error::Server { message, number, state, class, line } if options.or_replace => {
                    Error::Server {
                        number,
                        state,
                        class,
                        line,
                        message: format!(
                            "CREATE TABLE failed after the previous table was dropped: {message}"
                        ),
                    }
                }
                other => other,
            })?;
        if let Some(catalog) = &self.catalog {
            catalog.invalidate_schema(schema);
        }

        let use_bulk = if options.use_bulk && self.config.is_fabric_endpoint() {
            match settings.fabric_bulk_policy {
                FabricBulkPolicy::Fallback => {
                    tracing::warn!(
                        host = %self.config.host,
                        "Fabric endpoint: falling back from bulk load to batched INSERT"
                    );
                    false
                }
                FabricBulkPolicy::Error => {
                    return Err(Error::FabricUnsupported {
                        host: self.config.host.clone(),
                    });
                }
            }
        } else {
            options.use_bulk
        };

        let load = if use_bulk {
            self.bulk_load(schema, table, &columns, rows, settings.bulk_flush_rows)
                .await
        } else {
            let targets = columns
                .iter()
                .map(|c| TargetColumn::new(c.name.clone(), c.logical_type.is_unicode()))
                .collect();
            self.insert_rows(schema, table, targets, rows, None).await
        };

        match load {
            Ok(count) => Ok(count),
            Err(e) => {
                if options.drop_on_failure {
                    if let Err(drop_err) = self.exec(&drop_table_sql(schema, table, true)).await {
                        tracing::warn!(error = %drop_err, "drop-on-failure cleanup failed");
                    }
                    if let Some(catalog) = &self.catalog {
                        catalog.invalidate_schema(schema);
                    }
                }
                Err(e)
            }
        }
    }

    async fn bulk_load(
        &self,
        schema: &str,
        table: &str,
        columns: &[CtasColumn],
        rows: Vec<Vec<SqlValue>>,
        flush_rows: usize,
    ) -> Result<u64> {
        let bulk_columns: Vec<BulkColumn> = columns.iter().map(BulkColumn::from_ctas).collect();

        let mut conn = self.acquire().await?;
        let result = async {
            let mut writer =
                BulkLoadWriter::begin(&mut conn, schema, table, bulk_columns, flush_rows).await?;
            for row in &rows {
                writer.send_row(row).await?;
            }
            writer.finish().await
        }
        .await;

        // The writer already disconnected on failure; poison makes the drop
        // path close it even if the failure was on our side of the writer.
        if result.is_err() {
            conn.poison();
        }
        result
    }
}

impl std::fmt::Debug for AttachedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedContext")
            .field("name", &self.name)
            .field("host", &self.config.host)
            .finish_non_exhaustive()
    }
}

/// The process-wide attach registry.
pub struct Extension {
    manager: PoolManager<Connection>,
    contexts: Mutex<HashMap<String, Arc<AttachedContext>>>,
    handles: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<Connection>>>>,
    next_handle: AtomicU64,
}

impl Extension {
    fn new() -> Self {
        Self {
            manager: PoolManager::new(),
            contexts: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// The process-wide instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Attach a context under `name`.
    pub async fn attach(
        &self,
        name: &str,
        options: &BTreeMap<String, String>,
        resolver: Option<&SecretResolver>,
    ) -> Result<Arc<AttachedContext>> {
        let config = AttachConfig::from_options(options, resolver)?;
        let http = reqwest::Client::new();

        let pool_config = PoolConfig::new()
            .limit(config.pool_limit)
            .min(config.pool_min)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.acquire_timeout)
            .connection_timeout(config.connection_timeout);

        let factory = {
            let config = config.clone();
            let http = http.clone();
            Arc::new(move || {
                let config = config.clone();
                let http = http.clone();
                Box::pin(async move {
                    match Connection::connect(&config, &http).await {
                        Ok(conn) => Ok(conn),
                        // A stale cached token gets one silent refresh.
                        Err(Error::Auth(auth)) if auth.is_token_expiry() => {
                            tracing::debug!("cached token expired; re-acquiring");
                            config.auth.invalidate_cached();
                            Connection::connect(&config, &http)
                                .await
                                .map_err(|e| PoolError::Connect(Box::new(e)))
                        }
                        Err(e) => Err(PoolError::Connect(Box::new(e))),
                    }
                }) as mssql_pool::ConnectFuture<Connection>
            })
        };

        let pool = Arc::new(Pool::new(pool_config, factory)?);
        if let Err(e) = self.manager.register(name, Arc::clone(&pool)) {
            pool.shutdown().await;
            return Err(e.into());
        }

        let catalog = config.catalog_enabled.then(|| {
            Arc::new(MetadataCache::new(
                EngineSettings::global().catalog_cache_ttl,
                config.schema_filter.as_deref(),
                config.table_filter.as_deref(),
            ))
        });

        let context = Arc::new(AttachedContext {
            name: name.to_string(),
            config,
            pool,
            catalog,
        });
        self.contexts
            .lock()
            .insert(name.to_string(), Arc::clone(&context));

        tracing::info!(context = name, host = %context.config.host, "attached");
        Ok(context)
    }

    /// Detach a context: drop its cache, drain its pool.
    pub async fn detach(&self, name: &str) -> Result<()> {
        let context = self.contexts.lock().remove(name);
        if context.is_none() {
            return Err(Error::UnknownContext(name.to_string()));
        }
        let pool = self.manager.remove(name)?;
        pool.shutdown().await;
        tracing::info!(context = name, "detached");
        Ok(())
    }

    /// Look up an attached context.
    pub fn context(&self, name: &str) -> Result<Arc<AttachedContext>> {
        self.contexts
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownContext(name.to_string()))
    }

    /// Pool statistics for one context or all of them.
    pub fn pool_stats(&self, name: Option<&str>) -> Result<Vec<(String, PoolStats)>> {
        match name {
            Some(name) => {
                let context = self.context(name)?;
                Ok(vec![(name.to_string(), context.pool_stats())])
            }
            None => {
                let contexts = self.contexts.lock();
                Ok(contexts
                    .iter()
                    .map(|(name, ctx)| (name.clone(), ctx.pool_stats()))
                    .collect())
            }
        }
    }

    /// Acquire a token for a secret and return a redacted summary:
    /// first ten characters, ellipsis, last three, and the length.
    pub async fn azure_auth_test(
        &self,
        secret_id: &str,
        tenant: Option<String>,
        resolver: &SecretResolver,
    ) -> Result<String> {
        let secret = resolver(secret_id)
            .ok_or_else(|| Error::Config(format!("secret {secret_id:?} not found")))?;
        let strategy = strategy_from_secret(secret_id, secret, tenant);
        let http = reqwest::Client::new();
        let token = strategy.federated_token(&http).await?;
        Ok(token.redacted_summary())
    }

    /// Open a standalone connection outside any pool; returns a handle.
    pub async fn open(
        &self,
        options: &BTreeMap<String, String>,
        resolver: Option<&SecretResolver>,
    ) -> Result<u64> {
        let config = AttachConfig::from_options(options, resolver)?;
        let http = reqwest::Client::new();
        let conn = Connection::connect(&config, &http).await?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles
            .lock()
            .insert(handle, Arc::new(tokio::sync::Mutex::new(conn)));
        Ok(handle)
    }

    /// Ping a raw handle.
    pub async fn ping(&self, handle: u64) -> Result<bool> {
        let conn = self
            .handles
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::UnknownContext(format!("handle {handle}")))?;
        let mut conn = conn.lock().await;
        Ok(conn.ping_server().await)
    }

    /// Close and forget a raw handle.
    pub async fn close(&self, handle: u64) -> Result<()> {
        let conn = self
            .handles
            .lock()
            .remove(&handle)
            .ok_or_else(|| Error::UnknownContext(format!("handle {handle}")))?;
        conn.lock().await.disconnect();
        Ok(())
    }

    /// Names of all attached contexts.
    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.contexts.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("contexts", &self.context_names())
            .finish_non_exhaustive()
    }
}
