//! Bulk-load writer.
//!
//! Loads rows through the TDS BULK_LOAD path: an `INSERT BULK` statement
//! announces the column layout, then a BULK_LOAD message replays the
//! server's own row format (COLMETADATA + ROW tokens + DONE). Every
//! `flush_rows` rows the batch is closed with a DONE and a fresh
//! `INSERT BULK` + COLMETADATA starts the next one.
//!
//! Any failure mid-load disconnects the connection outright: a half-written
//! bulk stream leaves the session unusable, and a poisoned connection must
//! never reach the idle queue.

use bytes::{BufMut, BytesMut};
use mssql_types::{SqlValue, encode_value};
use tds_protocol::packet::PacketType;
use tds_protocol::token::{ColMetaData, Column, Done, DoneStatus, TokenType};
use tds_protocol::typeinfo::{ColumnFlags, TypeInfo};

use crate::connection::Connection;
use crate::dml::{CtasColumn, quote_identifier, qualified_name};
use crate::error::{Error, Result};

/// A column of the bulk target.
#[derive(Debug, Clone)]
pub struct BulkColumn {
    /// Column name.
    pub name: String,
    /// T-SQL type text for the `INSERT BULK` column list.
    pub sql_type: String,
    /// Wire type for the replayed COLMETADATA and row encoding.
    pub type_info: TypeInfo,
    /// Whether NULLs are allowed.
    pub nullable: bool,
}

impl BulkColumn {
    /// Build from a CTAS output column.
    #[must_use]
    pub fn from_ctas(column: &CtasColumn) -> Self {
        Self {
            name: column.name.clone(),
            sql_type: column.logical_type.to_sql(),
            type_info: column.logical_type.type_info(),
            nullable: column.nullable,
        }
    }
}

/// Streaming bulk writer bound to one connection.
pub struct BulkLoadWriter<'a> {
    conn: &'a mut Connection,
    schema: String,
    table: String,
    columns: Vec<BulkColumn>,
    metadata: ColMetaData,
    buffer: BytesMut,
    rows_in_batch: usize,
    flush_rows: usize,
    total_rows: u64,
}

impl<'a> BulkLoadWriter<'a> {
    /// Start a bulk load into `[schema].[table]`.
    pub async fn begin(
        conn: &'a mut Connection,
        schema: &str,
        table: &str,
        columns: Vec<BulkColumn>,
        flush_rows: usize,
    ) -> Result<BulkLoadWriter<'a>> {
        if columns.is_empty() {
            return Err(Error::SchemaMismatch("bulk load requires columns".into()));
        }

        let metadata = ColMetaData {
            columns: columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    user_type: 0,
                    flags: ColumnFlags {
                        nullable: c.nullable,
                        ..Default::default()
                    },
                    type_info: c.type_info,
                })
                .collect(),
        };

        let mut writer = Self {
            conn,
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            metadata,
            buffer: BytesMut::new(),
            rows_in_batch: 0,
            flush_rows: flush_rows.max(1),
            total_rows: 0,
        };
        writer.open_batch().await?;
        Ok(writer)
    }

    fn insert_bulk_sql(&self) -> String {
        let column_defs = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.sql_type))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT BULK {} ({column_defs}) WITH (TABLOCK)",
            qualified_name(&self.schema, &self.table)
        )
    }

    /// Announce the batch and stage its COLMETADATA.
    async fn open_batch(&mut self) -> Result<()> {
        let sql = self.insert_bulk_sql();
        if let Err(e) = self.conn.execute(&sql).await {
            self.conn.disconnect();
            return Err(e);
        }

        self.buffer.clear();
        self.metadata
            .encode(&mut self.buffer)
            .map_err(Error::from)?;
        self.rows_in_batch = 0;
        Ok(())
    }

    /// Append one row to the current batch, flushing at the threshold.
    pub async fn send_row(&mut self, values: &[SqlValue]) -> Result<()> {
        if values.len() != self.columns.len() {
            self.conn.disconnect();
            return Err(Error::SchemaMismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        self.buffer.put_u8(TokenType::Row as u8);
        for (value, column) in values.iter().zip(&self.columns) {
            if let Err(e) = encode_value(value, &column.type_info, &mut self.buffer) {
                self.conn.disconnect();
                return Err(e.into());
            }
        }
        self.rows_in_batch += 1;
        self.total_rows += 1;

        if self.rows_in_batch >= self.flush_rows {
            self.flush_batch().await?;
            self.open_batch().await?;
        }
        Ok(())
    }

    /// Close the current batch with a DONE and ship it.
    async fn flush_batch(&mut self) -> Result<()> {
        Done {
            status: DoneStatus {
                count: true,
                ..Default::default()
            },
            cur_cmd: 0,
            row_count: self.rows_in_batch as u64,
        }
        .encode(&mut self.buffer);

        let payload = self.buffer.split().freeze();
        tracing::debug!(
            rows = self.rows_in_batch,
            bytes = payload.len(),
            "shipping bulk batch"
        );

        let send = async {
            self.conn.send_request(PacketType::BulkLoad, payload).await?;
            self.conn.drain_response().await
        };
        match send.await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.conn.disconnect();
                Err(e)
            }
        }
    }

    /// Finish the load, shipping any partial batch. Returns total rows sent.
    pub async fn finish(mut self) -> Result<u64> {
        if self.rows_in_batch > 0 {
            self.flush_batch().await?;
        }
        Ok(self.total_rows)
    }

    /// Rows accepted so far.
    #[must_use]
    pub fn rows_sent(&self) -> u64 {
        self.total_rows
    }
}
