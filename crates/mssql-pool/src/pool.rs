//! Connection pool implementation.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::conn::ManagedConnection;
use crate::error::PoolError;

/// Future returned by a connection factory.
pub type ConnectFuture<C> = Pin<Box<dyn Future<Output = Result<C, PoolError>> + Send>>;

/// Factory closure building a fully authenticated connection.
pub type ConnectionFactory<C> = Arc<dyn Fn() -> ConnectFuture<C> + Send + Sync>;

/// Point-in-time pool statistics.
///
/// Invariants at steady state: `total == created - closed`,
/// `active + idle <= total`, `pinned <= active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections in existence (idle + loaned out).
    pub total: u32,
    /// Connections sitting in the idle queue.
    pub idle: u32,
    /// Connections loaned to callers (including pinned).
    pub active: u32,
    /// Connections pinned to transactions.
    pub pinned: u32,
    /// Connections ever created.
    pub created: u64,
    /// Connections ever closed.
    pub closed: u64,
    /// Successful and failed acquire attempts.
    pub acquire_count: u64,
    /// Acquires that hit the timeout.
    pub acquire_timeout_count: u64,
}

struct IdleEntry<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleEntry<C>>,
    stats: PoolStats,
}

struct PoolInner<C: ManagedConnection> {
    config: PoolConfig,
    factory: ConnectionFactory<C>,
    state: Mutex<PoolState<C>>,
    available: Notify,
    shutdown: AtomicBool,
}

/// A bounded pool of connections.
pub struct Pool<C: ManagedConnection> {
    inner: Arc<PoolInner<C>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: ManagedConnection> Pool<C> {
    /// Create a pool and start its background cleanup task.
    pub fn new(config: PoolConfig, factory: ConnectionFactory<C>) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config,
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                stats: PoolStats::default(),
            }),
            available: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let sweeper = tokio::spawn(Self::sweep_loop(Arc::clone(&inner)));

        tracing::info!(limit = inner.config.limit, "connection pool created");
        Ok(Self {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Acquire a connection, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        self.acquire_within(self.inner.config.acquire_timeout).await
    }

    /// Acquire a connection with an explicit timeout.
    pub async fn acquire_within(
        &self,
        timeout: std::time::Duration,
    ) -> Result<PooledConnection<C>, PoolError> {
        let deadline = Instant::now() + timeout;
        self.inner.state.lock().stats.acquire_count += 1;

        loop {
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::PoolClosed);
            }

            // Head of the idle queue first.
            let candidate = {
                let mut state = self.inner.state.lock();
                let entry = state.idle.pop_front();
                state.stats.idle = state.idle.len() as u32;
                entry
            };

            if let Some(entry) = candidate {
                match self.validate(entry).await {
                    Some(conn) => {
                        self.inner.state.lock().stats.active += 1;
                        return Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
                    }
                    // Dead connection dropped; try the next idle one.
                    None => continue,
                }
            }

            // Nothing idle: build a new connection if below the cap.
            let reserved = {
                let mut state = self.inner.state.lock();
                if state.stats.total < self.inner.config.limit {
                    state.stats.total += 1;
                    state.stats.created += 1;
                    true
                } else {
                    false
                }
            };

            if reserved {
                match (self.inner.factory)().await {
                    Ok(conn) => {
                        self.inner.state.lock().stats.active += 1;
                        return Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
                    }
                    Err(e) => {
                        // The reservation never became a connection.
                        let mut state = self.inner.state.lock();
                        state.stats.total -= 1;
                        state.stats.created -= 1;
                        drop(state);
                        self.inner.available.notify_one();
                        return Err(e);
                    }
                }
            }

            // At the cap: wait for a release, bounded by the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.inner.state.lock().stats.acquire_timeout_count += 1;
                return Err(PoolError::AcquireTimeout);
            }
            let notified = self.inner.available.notified();
            if tokio::time::timeout(remaining, notified).await.is_err() {
                self.inner.state.lock().stats.acquire_timeout_count += 1;
                return Err(PoolError::AcquireTimeout);
            }
        }
    }

    /// Tiered idle validation: socket-level only inside the fast window, a
    /// server ping beyond it. Returns `None` when the connection is dead.
    async fn validate(&self, mut entry: IdleEntry<C>) -> Option<C> {
        let idle_for = entry.since.elapsed();
        let healthy = if idle_for < self.inner.config.fast_validation_window {
            entry.conn.is_open()
        } else {
            tracing::debug!(idle_secs = idle_for.as_secs(), "pinging idle connection");
            entry.conn.ping().await
        };

        if healthy {
            Some(entry.conn)
        } else {
            tracing::warn!("dropping dead idle connection");
            entry.conn.close();
            let mut state = self.inner.state.lock();
            state.stats.total -= 1;
            state.stats.closed += 1;
            None
        }
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Whether the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Shut the pool down: close idle connections, wake waiters, stop the
    /// cleanup task.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.available.notify_waiters();

        let drained: Vec<IdleEntry<C>> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.stats.idle = 0;
            state.stats.total -= drained.len() as u32;
            state.stats.closed += drained.len() as u64;
            drained
        };
        for mut entry in drained {
            entry.conn.close();
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("connection pool shut down");
    }

    /// Background sweep: every second, evict connections idle beyond the
    /// timeout while preserving the configured floor.
    async fn sweep_loop(inner: Arc<PoolInner<C>>) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            if inner.shutdown.load(Ordering::Acquire) {
                return;
            }

            let mut expired = Vec::new();
            {
                let mut state = inner.state.lock();
                while let Some(entry) = state.idle.front() {
                    let over_floor = state.stats.total > inner.config.min;
                    if over_floor && entry.since.elapsed() >= inner.config.idle_timeout {
                        if let Some(entry) = state.idle.pop_front() {
                            state.stats.total -= 1;
                            state.stats.closed += 1;
                            expired.push(entry);
                        }
                    } else {
                        break;
                    }
                }
                state.stats.idle = state.idle.len() as u32;
            }

            for mut entry in expired {
                tracing::debug!("evicting idle connection past idle_timeout");
                entry.conn.close();
            }
        }
    }
}

impl<C: ManagedConnection> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// A connection loaned from the pool.
///
/// Dropping the guard returns the connection: reusable connections are
/// reset-flagged and enqueued idle, anything else is closed.
pub struct PooledConnection<C: ManagedConnection> {
    conn: Option<C>,
    inner: Arc<PoolInner<C>>,
    pinned: bool,
}

impl<C: ManagedConnection> PooledConnection<C> {
    fn new(conn: C, inner: Arc<PoolInner<C>>) -> Self {
        Self {
            conn: Some(conn),
            inner,
            pinned: false,
        }
    }

    /// Pin this connection to a transaction. Pinned connections stay loaned
    /// out across statements until [`Self::unpin`] or drop.
    pub fn pin(&mut self) {
        if !self.pinned {
            self.pinned = true;
            self.inner.state.lock().stats.pinned += 1;
        }
    }

    /// Release the transaction pin.
    pub fn unpin(&mut self) {
        if self.pinned {
            self.pinned = false;
            self.inner.state.lock().stats.pinned -= 1;
        }
    }

    /// Whether the guard is currently pinned.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Mark the connection broken: it will be closed on drop regardless of
    /// its own opinion. Used after bulk-load failures to keep the pool
    /// clean.
    pub fn poison(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close();
        }
    }
}

impl<C: ManagedConnection> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // The option is only vacated in drop.
        #[allow(clippy::expect_used)]
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: ManagedConnection> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        #[allow(clippy::expect_used)]
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: ManagedConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        let mut state = self.inner.state.lock();
        state.stats.active -= 1;
        if self.pinned {
            state.stats.pinned -= 1;
        }

        let reusable =
            !self.inner.shutdown.load(Ordering::Acquire) && conn.is_reusable();
        if reusable {
            conn.prepare_for_reuse();
            state.idle.push_back(IdleEntry {
                conn,
                since: Instant::now(),
            });
            state.stats.idle = state.idle.len() as u32;
        } else {
            conn.close();
            state.stats.total -= 1;
            state.stats.closed += 1;
            tracing::debug!("closed connection on release");
        }
        drop(state);

        self.inner.available.notify_one();
    }
}
