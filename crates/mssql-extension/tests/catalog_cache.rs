//! Metadata cache semantics against a scripted catalog source.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mssql_extension::catalog::{
    CatalogSource, ColumnInfo, MetadataCache, RelationKind, TableDetails, TableInfo,
};
use mssql_extension::error::Result;

#[derive(Clone, Default)]
struct Counters {
    schema_loads: Arc<AtomicUsize>,
    table_loads: Arc<AtomicUsize>,
    column_loads: Arc<AtomicUsize>,
}

struct ScriptedSource {
    counters: Counters,
}

fn column(name: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        ordinal: 1,
        type_name: "int".into(),
        max_length: 4,
        precision: 10,
        scale: 0,
        is_nullable: false,
        collation: None,
        is_case_sensitive: false,
        is_unicode: false,
    }
}

#[async_trait]
impl CatalogSource for ScriptedSource {
    async fn schema_names(&mut self) -> Result<Vec<String>> {
        self.counters.schema_loads.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["dbo".into(), "sales".into(), "audit".into()])
    }

    async fn tables(&mut self, schema: &str) -> Result<Vec<TableInfo>> {
        self.counters.table_loads.fetch_add(1, Ordering::SeqCst);
        Ok(vec![TableInfo {
            name: format!("{schema}_orders"),
            kind: RelationKind::Table,
            approx_row_count: 100,
        }])
    }

    async fn table_details(&mut self, _schema: &str, _table: &str) -> Result<TableDetails> {
        self.counters.column_loads.fetch_add(1, Ordering::SeqCst);
        Ok(TableDetails {
            columns: vec![column("id")],
            primary_key: vec!["id".into()],
        })
    }
}

fn setup() -> (MetadataCache, ScriptedSource, Counters) {
    let counters = Counters::default();
    let source = ScriptedSource {
        counters: counters.clone(),
    };
    (
        MetadataCache::new(Duration::ZERO, None, None),
        source,
        counters,
    )
}

#[tokio::test]
async fn loaded_levels_are_not_reloaded() {
    let (cache, mut source, counters) = setup();

    let schemas = cache.schema_names(&mut source).await.unwrap();
    assert_eq!(schemas, vec!["audit", "dbo", "sales"]);

    // Further reads touch no source I/O.
    for _ in 0..5 {
        cache.schema_names(&mut source).await.unwrap();
    }
    assert_eq!(counters.schema_loads.load(Ordering::SeqCst), 1);

    let tables = cache.table_names(&mut source, "dbo").await.unwrap();
    assert_eq!(tables[0].name, "dbo_orders");
    cache.table_names(&mut source, "dbo").await.unwrap();
    assert_eq!(counters.table_loads.load(Ordering::SeqCst), 1);

    let details = cache.columns(&mut source, "dbo", "dbo_orders").await.unwrap();
    assert_eq!(details.primary_key, vec!["id"]);
    cache.columns(&mut source, "dbo", "dbo_orders").await.unwrap();
    assert_eq!(counters.column_loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn levels_load_independently() {
    let (cache, mut source, counters) = setup();

    // Asking for one schema's tables loads schemas once and only that
    // schema's table list.
    cache.table_names(&mut source, "sales").await.unwrap();
    assert_eq!(counters.schema_loads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.table_loads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.column_loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn point_invalidation_reloads_only_affected_schema() {
    let (cache, mut source, counters) = setup();

    cache.table_names(&mut source, "dbo").await.unwrap();
    cache.table_names(&mut source, "sales").await.unwrap();
    assert_eq!(counters.table_loads.load(Ordering::SeqCst), 2);

    let sales_refreshed = cache.table_list_refreshed_at("sales").unwrap();

    // DDL in dbo invalidates dbo's table list only.
    cache.invalidate_schema("dbo");

    cache.table_names(&mut source, "dbo").await.unwrap();
    cache.table_names(&mut source, "sales").await.unwrap();

    assert_eq!(counters.table_loads.load(Ordering::SeqCst), 3);
    assert_eq!(cache.table_list_refreshed_at("sales").unwrap(), sales_refreshed);
}

#[tokio::test]
async fn invalidate_table_drops_columns_only() {
    let (cache, mut source, counters) = setup();

    cache.columns(&mut source, "dbo", "dbo_orders").await.unwrap();
    assert_eq!(counters.column_loads.load(Ordering::SeqCst), 1);

    cache.invalidate_table("dbo", "dbo_orders");
    cache.columns(&mut source, "dbo", "dbo_orders").await.unwrap();

    assert_eq!(counters.column_loads.load(Ordering::SeqCst), 2);
    // Neither upper level reloaded.
    assert_eq!(counters.schema_loads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.table_loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidate_all_is_schema_level() {
    let (cache, mut source, counters) = setup();

    cache.columns(&mut source, "dbo", "dbo_orders").await.unwrap();
    cache.invalidate_all();

    // Schema list reloads; surviving schema entries keep their loaded
    // table and column nodes.
    cache.columns(&mut source, "dbo", "dbo_orders").await.unwrap();
    assert_eq!(counters.schema_loads.load(Ordering::SeqCst), 2);
    assert_eq!(counters.table_loads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.column_loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ttl_expiry_triggers_lazy_reload() {
    let counters = Counters::default();
    let mut source = ScriptedSource {
        counters: counters.clone(),
    };
    let cache = MetadataCache::new(Duration::from_millis(20), None, None);

    cache.schema_names(&mut source).await.unwrap();
    assert_eq!(counters.schema_loads.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    cache.schema_names(&mut source).await.unwrap();
    assert_eq!(counters.schema_loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn filters_apply_case_insensitively() {
    let counters = Counters::default();
    let mut source = ScriptedSource {
        counters: counters.clone(),
    };
    let cache = MetadataCache::new(Duration::ZERO, Some("^(DBO|sales)$"), Some("orders"));

    let schemas = cache.schema_names(&mut source).await.unwrap();
    assert_eq!(schemas, vec!["dbo", "sales"]);

    // Partial match on table names.
    let tables = cache.table_names(&mut source, "dbo").await.unwrap();
    assert_eq!(tables.len(), 1);
}

#[tokio::test]
async fn unknown_schema_is_a_schema_mismatch() {
    let (cache, mut source, _) = setup();
    let err = cache.table_names(&mut source, "missing").await;
    assert!(matches!(
        err,
        Err(mssql_extension::Error::SchemaMismatch(_))
    ));
}
