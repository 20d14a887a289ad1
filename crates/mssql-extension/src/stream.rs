//! Lazy result streaming.
//!
//! A scan produces column-major [`DataChunk`]s. The stream pulls exactly as
//! many tokens as the next chunk needs, so a slow consumer backpressures the
//! socket instead of buffering the whole result set.
//!
//! A batch may hold several statements. The stream hands out the first
//! result set that carries COLMETADATA; everything before it (DDL, DML
//! without OUTPUT) is drained, everything after it is drained and discarded.
//! Errors from any statement surface even when a later statement would have
//! produced rows.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mssql_types::SqlValue;
use tds_protocol::token::{Column, Token};

use crate::connection::{Connection, ResponseEvent};
use crate::error::{Error, Result};

/// A column-major batch of rows.
#[derive(Debug, Clone)]
pub struct DataChunk {
    /// Column metadata shared across chunks of one result set.
    pub columns: Arc<Vec<Column>>,
    /// One value vector per column, all the same length.
    pub data: Vec<Vec<SqlValue>>,
}

impl DataChunk {
    fn with_capacity(columns: Arc<Vec<Column>>, rows: usize) -> Self {
        let data = columns
            .iter()
            .map(|_| Vec::with_capacity(rows))
            .collect();
        Self { columns, data }
    }

    fn push_row(&mut self, row: Vec<SqlValue>) {
        for (column, value) in self.data.iter_mut().zip(row) {
            column.push(value);
        }
    }

    /// Number of rows in the chunk.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Whether the chunk holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A streaming scan over one SQL batch.
///
/// Generic over the connection holder so both pool-borrowed and
/// transaction-pinned connections stream the same way.
pub struct QueryStream<C>
where
    C: DerefMut<Target = Connection>,
{
    conn: C,
    columns: Option<Arc<Vec<Column>>>,
    chunk_rows: usize,
    deadline: Option<Instant>,
    /// Rows currently belong to the surfaced result set.
    capturing: bool,
    finished: bool,
}

impl<C> QueryStream<C>
where
    C: DerefMut<Target = Connection>,
{
    /// Send the batch and position the stream at its first result set.
    pub async fn start(
        mut conn: C,
        sql: &str,
        chunk_rows: usize,
        query_timeout: Duration,
    ) -> Result<Self> {
        conn.send_batch(sql).await?;
        let mut stream = Self {
            conn,
            columns: None,
            chunk_rows,
            deadline: (!query_timeout.is_zero()).then(|| Instant::now() + query_timeout),
            capturing: false,
            finished: false,
        };
        stream.seek_first_result().await?;
        Ok(stream)
    }

    /// Column metadata of the surfaced result set; `None` when no statement
    /// produced rows.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<Vec<Column>>> {
        self.columns.as_ref()
    }

    /// Pull the next chunk. `None` after the final DONE.
    pub async fn next_chunk(&mut self) -> Result<Option<DataChunk>> {
        let Some(columns) = self.columns.clone() else {
            return Ok(None);
        };
        if self.finished {
            return Ok(None);
        }

        let mut chunk = DataChunk::with_capacity(columns, self.chunk_rows);
        loop {
            match self.next_event().await? {
                ResponseEvent::Row(row) => {
                    if self.capturing {
                        chunk.push_row(row);
                        if chunk.row_count() >= self.chunk_rows {
                            return Ok(Some(chunk));
                        }
                    }
                }
                ResponseEvent::Token(Token::ColMetaData(_)) => {
                    // A later statement's result set; drained, not surfaced.
                    self.capturing = false;
                }
                ResponseEvent::Token(Token::Error(msg)) => {
                    let err = Error::from_server_message(&msg);
                    self.drain_after_error().await;
                    return Err(err);
                }
                ResponseEvent::Token(Token::Done(done)) if done.status.is_final() => {
                    self.finished = true;
                    if chunk.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(chunk));
                }
                _ => {}
            }
        }
    }

    /// Collect every remaining chunk. Convenience for small results.
    pub async fn collect_all(mut self) -> Result<Vec<DataChunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    async fn seek_first_result(&mut self) -> Result<()> {
        loop {
            match self.next_event().await? {
                ResponseEvent::Token(Token::ColMetaData(meta)) if !meta.columns.is_empty() => {
                    self.columns = self.conn.columns();
                    self.capturing = true;
                    return Ok(());
                }
                ResponseEvent::Token(Token::Error(msg)) => {
                    let err = Error::from_server_message(&msg);
                    self.drain_after_error().await;
                    return Err(err);
                }
                ResponseEvent::Token(Token::Done(done)) if done.status.is_final() => {
                    self.finished = true;
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    /// After an error token the rest of the response is drained so the
    /// connection lands back in Idle and stays poolable.
    async fn drain_after_error(&mut self) {
        loop {
            match self.conn.next_event().await {
                Ok(ResponseEvent::Token(Token::Done(done))) if done.status.is_final() => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        self.finished = true;
    }

    async fn next_event(&mut self) -> Result<ResponseEvent> {
        match self.deadline {
            None => self.conn.next_event().await,
            Some(deadline) => {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    return self.timed_out().await;
                };
                match tokio::time::timeout(remaining, self.conn.next_event()).await {
                    Ok(result) => result,
                    Err(_) => self.timed_out().await,
                }
            }
        }
    }

    async fn timed_out(&mut self) -> Result<ResponseEvent> {
        tracing::warn!("query exceeded its timeout; cancelling");
        let _ = self.conn.cancel().await;
        self.finished = true;
        Err(Error::QueryTimeout)
    }

    /// Access the underlying connection holder (used by transactions to
    /// recover the pinned guard).
    pub(crate) fn into_connection(self) -> C {
        self.conn
    }
}

impl<C> std::fmt::Debug for QueryStream<C>
where
    C: DerefMut<Target = Connection>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("columns", &self.columns.as_ref().map(|c| c.len()))
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

// Deref so callers can check connection state mid-stream.
impl<C> Deref for QueryStream<C>
where
    C: DerefMut<Target = Connection>,
{
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}
