//! Pool behavior tests against a fake connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mssql_pool::pool::ConnectionFactory;
use mssql_pool::{ManagedConnection, Pool, PoolConfig, PoolError, PoolManager};

struct FakeConn {
    open: bool,
    idle: bool,
    ping_ok: Arc<AtomicBool>,
    reset_count: Arc<AtomicU64>,
}

#[async_trait]
impl ManagedConnection for FakeConn {
    fn is_reusable(&self) -> bool {
        self.open && self.idle
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn ping(&mut self) -> bool {
        self.ping_ok.load(Ordering::SeqCst)
    }

    fn prepare_for_reuse(&mut self) {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.open = false;
    }
}

fn factory(
    ping_ok: Arc<AtomicBool>,
    reset_count: Arc<AtomicU64>,
) -> ConnectionFactory<FakeConn> {
    Arc::new(move || {
        let ping_ok = Arc::clone(&ping_ok);
        let reset_count = Arc::clone(&reset_count);
        Box::pin(async move {
            Ok(FakeConn {
                open: true,
                idle: true,
                ping_ok,
                reset_count,
            })
        })
    })
}

fn pool_with(config: PoolConfig) -> (Pool<FakeConn>, Arc<AtomicU64>) {
    let ping_ok = Arc::new(AtomicBool::new(true));
    let reset_count = Arc::new(AtomicU64::new(0));
    let pool = Pool::new(config, factory(ping_ok, Arc::clone(&reset_count))).unwrap();
    (pool, reset_count)
}

#[tokio::test]
async fn acquire_release_reuses_connection() {
    let (pool, reset_count) = pool_with(PoolConfig::new().limit(2));

    let conn = pool.acquire().await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.active, 1);
    drop(conn);

    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);

    // Reuse sets the reset flag exactly once per release.
    assert_eq!(reset_count.load(Ordering::SeqCst), 1);

    let _again = pool.acquire().await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.total, 1, "idle connection reused, not rebuilt");
    assert_eq!(stats.created, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn acquire_times_out_at_limit() {
    let (pool, _) = pool_with(
        PoolConfig::new()
            .limit(1)
            .acquire_timeout(Duration::from_millis(50)),
    );

    let held = pool.acquire().await.unwrap();
    let result = pool.acquire().await;
    assert!(matches!(result, Err(PoolError::AcquireTimeout)));
    assert_eq!(pool.stats().acquire_timeout_count, 1);

    drop(held);
    assert!(pool.acquire().await.is_ok());
    pool.shutdown().await;
}

#[tokio::test]
async fn waiter_wakes_on_release() {
    let (pool, _) = pool_with(
        PoolConfig::new()
            .limit(1)
            .acquire_timeout(Duration::from_secs(5)),
    );
    let pool = Arc::new(pool);

    let held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter woke")
        .unwrap()
        .unwrap();
    pool.shutdown().await;
}

#[tokio::test]
async fn stats_invariants_under_churn() {
    let (pool, _) = pool_with(PoolConfig::new().limit(4));
    let pool = Arc::new(pool);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                let conn = pool.acquire().await.unwrap();
                tokio::task::yield_now().await;
                drop(conn);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = pool.stats();
    assert_eq!(u64::from(stats.total), stats.created - stats.closed);
    assert!(stats.active + stats.idle <= stats.total);
    assert!(stats.pinned <= stats.active);
    assert_eq!(stats.active, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn pinned_counts_tracked() {
    let (pool, _) = pool_with(PoolConfig::new().limit(2));

    let mut conn = pool.acquire().await.unwrap();
    conn.pin();
    assert_eq!(pool.stats().pinned, 1);
    assert!(conn.is_pinned());

    conn.unpin();
    assert_eq!(pool.stats().pinned, 0);

    // Dropping while pinned also clears the counter.
    let mut conn2 = pool.acquire().await.unwrap();
    conn2.pin();
    drop(conn2);
    assert_eq!(pool.stats().pinned, 0);

    drop(conn);
    pool.shutdown().await;
}

#[tokio::test]
async fn broken_connection_not_requeued() {
    let (pool, _) = pool_with(PoolConfig::new().limit(2));

    let pre = pool.stats();
    let mut conn = pool.acquire().await.unwrap();
    conn.poison();
    drop(conn);

    let stats = pool.stats();
    assert_eq!(stats.idle, 0, "poisoned connection must not reach idle");
    assert_eq!(stats.total, pre.total);
    assert_eq!(stats.active, pre.active);
    assert_eq!(u64::from(stats.total), stats.created - stats.closed);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_rejects_new_acquires() {
    let (pool, _) = pool_with(PoolConfig::new().limit(2));
    pool.shutdown().await;
    assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn manager_registry_lifecycle() {
    let manager: PoolManager<FakeConn> = PoolManager::new();
    let (pool, _) = pool_with(PoolConfig::new().limit(1));
    let pool = Arc::new(pool);

    manager.register("crm", Arc::clone(&pool)).unwrap();
    assert!(manager.register("crm", pool).is_err());
    assert!(manager.get("crm").is_some());

    let removed = manager.remove("crm").unwrap();
    removed.shutdown().await;
    assert!(manager.get("crm").is_none());
    assert!(manager.remove("crm").is_err());
}
