//! SQLite metric sink.
//!
//! Persists metric points to a single SQLite file via `sqlx` with WAL mode.
//! A series point is unique on `(name, labels, ts)`; rewriting an existing
//! point fails that row.
//!
//! # Usage
//! ```rust,no_run
//! use chainmetrics_storage::sqlite::SqliteSink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let sink = SqliteSink::open("./metrics.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let sink = SqliteSink::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::ops::Range;
use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use chainmetrics_core::{Metric, MetricSink, WriteFailure};

use crate::StorageError;

/// SQLite-backed metric storage.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./metrics.db"`) or a full
    /// SQLite URL (`"sqlite:./metrics.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let sink = Self { pool };
        sink.init_schema().await?;
        Ok(sink)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `:memory:` is its own database, so the pool is
    /// capped at one connection.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let sink = Self { pool };
        sink.init_schema().await?;
        Ok(sink)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metrics (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT    NOT NULL,
                labels_json  TEXT    NOT NULL,
                value        TEXT    NOT NULL,
                ts           INTEGER NOT NULL,
                block_number INTEGER,
                UNIQUE (name, labels_json, ts)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_name_ts ON metrics (name, ts);")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    /// Inserts `rows` in one transaction; any failure rolls back all of them.
    async fn insert_batch(&self, rows: &[Metric]) -> Result<(), String> {
        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;
        for m in rows {
            let labels = serde_json::to_string(&m.labels).map_err(|e| e.to_string())?;
            sqlx::query(
                "INSERT INTO metrics (name, labels_json, value, ts, block_number)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&m.name)
            .bind(&labels)
            .bind(m.value.to_string())
            .bind(m.timestamp.timestamp_millis())
            .bind(m.block_number.map(|b| b as i64))
            .execute(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;
        }
        tx.commit().await.map_err(|e| e.to_string())
    }

    /// All points for `name`, oldest first.
    pub async fn series(&self, name: &str) -> Result<Vec<Metric>, StorageError> {
        let rows = sqlx::query(
            "SELECT name, labels_json, value, ts, block_number
             FROM metrics WHERE name = ? ORDER BY ts, id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut metrics = Vec::with_capacity(rows.len());
        for row in rows {
            let labels_str: String = row.get("labels_json");
            let labels: BTreeMap<String, String> =
                serde_json::from_str(&labels_str).map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let value_str: String = row.get("value");
            let value = BigDecimal::from_str(&value_str)
                .map_err(|e| StorageError::Corrupt(format!("value {value_str}: {e}")))?;
            let ts: i64 = row.get("ts");
            let timestamp = DateTime::<Utc>::from_timestamp_millis(ts)
                .ok_or_else(|| StorageError::Corrupt(format!("timestamp {ts}")))?;

            metrics.push(Metric {
                name: row.get("name"),
                labels,
                value,
                timestamp,
                block_number: row.get::<Option<i64>, _>("block_number").map(|b| b as u64),
            });
        }
        Ok(metrics)
    }

    /// Total number of stored points.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM metrics")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl MetricSink for SqliteSink {
    /// Writes the batch in one transaction. On failure the batch is split in
    /// halves until every failing row is isolated; the rest is committed.
    async fn write(&self, metrics: &[Metric]) -> Result<(), WriteFailure> {
        let mut failed = Vec::new();
        let mut reason = String::new();
        let mut pending: Vec<Range<usize>> = vec![0..metrics.len()];

        while let Some(range) = pending.pop() {
            if range.is_empty() {
                continue;
            }
            match self.insert_batch(&metrics[range.clone()]).await {
                Ok(()) => {}
                Err(e) if range.len() == 1 => {
                    warn!(index = range.start, name = %metrics[range.start].name, error = %e, "metric row rejected");
                    failed.push(range.start);
                    reason = e;
                }
                Err(_) => {
                    let mid = range.start + range.len() / 2;
                    pending.push(mid..range.end);
                    pending.push(range.start..mid);
                }
            }
        }

        if failed.is_empty() {
            debug!(rows = metrics.len(), "metrics stored");
            Ok(())
        } else {
            failed.sort_unstable();
            Err(WriteFailure {
                failed_indices: failed,
                reason,
            })
        }
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
