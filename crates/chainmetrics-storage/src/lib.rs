//! chainmetrics-storage: pluggable [`MetricSink`] backends.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! [`MetricSink`]: chainmetrics_core::MetricSink

use thiserror::Error;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemorySink;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSink;

/// Errors opening or reading a backend. Write failures are reported as
/// [`chainmetrics_core::WriteFailure`] instead.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
