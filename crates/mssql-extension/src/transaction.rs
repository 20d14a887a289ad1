//! Explicit transactions with connection pinning.
//!
//! The first write (or catalog read) inside a host transaction acquires a
//! connection, runs `BEGIN TRANSACTION`, captures the 8-byte descriptor from
//! the BeginTransaction ENVCHANGE, and pins the connection. Every later
//! statement of the transaction reuses the pinned connection; the pool never
//! sees it until commit or rollback. Releasing schedules a session reset so
//! the next borrower starts clean.
//!
//! DML arriving before the first read may be queued and is flushed in order
//! ahead of any statement that needs its effects.

use mssql_pool::PooledConnection;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::stream::QueryStream;

/// An open transaction holding its pinned connection.
pub struct Transaction {
    conn: Option<PooledConnection<Connection>>,
    pending: Vec<String>,
    active: bool,
}

impl Transaction {
    /// Begin a transaction on a freshly acquired connection.
    pub(crate) async fn begin(mut guard: PooledConnection<Connection>) -> Result<Self> {
        guard.pin();
        guard.execute("BEGIN TRANSACTION").await?;

        let descriptor = guard.transaction_descriptor();
        if descriptor == 0 {
            guard.poison();
            return Err(Error::Transaction(
                "BEGIN TRANSACTION returned no descriptor".into(),
            ));
        }
        tracing::debug!(descriptor = format_args!("{descriptor:#018x}"), "transaction begun");

        Ok(Self {
            conn: Some(guard),
            pending: Vec::new(),
            active: true,
        })
    }

    /// The transaction descriptor carried by every batch on this connection.
    #[must_use]
    pub fn descriptor(&self) -> u64 {
        self.conn
            .as_ref()
            .map_or(0, |c| c.transaction_descriptor())
    }

    /// Whether commit/rollback has not yet happened.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Queue a DML statement for execution before the next read or commit.
    pub fn queue_dml(&mut self, sql: impl Into<String>) {
        self.pending.push(sql.into());
    }

    fn guard(&mut self) -> Result<&mut PooledConnection<Connection>> {
        if !self.active {
            return Err(Error::Transaction("transaction already completed".into()));
        }
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Transaction("transaction has no connection".into()))
    }

    async fn flush_pending(&mut self) -> Result<u64> {
        let statements = std::mem::take(&mut self.pending);
        let mut rows = 0;
        for sql in statements {
            let guard = self.guard()?;
            rows += guard.execute(&sql).await?;
        }
        Ok(rows)
    }

    /// Execute a statement on the pinned connection.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.flush_pending().await?;
        let guard = self.guard()?;
        guard.execute(sql).await
    }

    /// Stream a query on the pinned connection.
    pub async fn scan(
        &mut self,
        sql: &str,
        chunk_rows: usize,
        query_timeout: std::time::Duration,
    ) -> Result<QueryStream<&mut Connection>> {
        self.flush_pending().await?;
        let guard = self.guard()?;
        QueryStream::start(&mut **guard, sql, chunk_rows, query_timeout).await
    }

    /// Commit and release the connection back to the pool.
    pub async fn commit(mut self) -> Result<()> {
        self.flush_pending().await?;
        let guard = self.guard()?;
        guard.execute("COMMIT TRANSACTION").await?;
        self.finish();
        Ok(())
    }

    /// Roll back and release the connection back to the pool.
    pub async fn rollback(mut self) -> Result<()> {
        // Anything still queued is abandoned with the transaction.
        self.pending.clear();
        let guard = self.guard()?;
        guard.execute("ROLLBACK TRANSACTION").await?;
        self.finish();
        Ok(())
    }

    /// Mark completed and hand the connection back: reset scheduled first,
    /// pin dropped with the guard.
    fn finish(&mut self) {
        self.active = false;
        if let Some(mut guard) = self.conn.take() {
            guard.schedule_reset();
            drop(guard);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A transaction dropped without commit/rollback must not leak an
        // open server transaction into the idle queue.
        if self.active {
            if let Some(mut guard) = self.conn.take() {
                tracing::warn!("transaction dropped without commit; closing its connection");
                guard.poison();
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.active)
            .field("pending", &self.pending.len())
            .finish()
    }
}
