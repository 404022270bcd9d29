// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Storage layer: repository contracts and the embedded SurrealDB backends.
//!
//! Two repositories with distinct shapes:
//! - [`MetricsRepository`]: append-only time-series writes plus analytical
//!   reads (metrics, logs, spans, SDK telemetry, baselines).
//! - [`OperationalRepository`]: row-oriented bookkeeping (conversations,
//!   audit log, alert history, suppressions, token usage).
//!
//! The rest of the core depends only on the traits; the SurrealDB
//! implementations live in [`surreal`].

pub mod metrics;
pub mod models;
pub mod operational;
pub mod surreal;
#[cfg(test)]
pub mod testing;

pub use metrics::{error_fingerprint, MetricsRepository, TimeWindow};
pub use operational::{estimate_cost, OperationalRepository, TokenUsageSummary};

use thiserror::Error;

/// Errors surfaced by the storage layer.
///
/// Callers on hot paths treat these as best-effort failures: log and
/// continue, never crash the pipeline.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection or query failure
    #[error("Database error: {0}")]
    Database(String),

    /// Row did not deserialize into the expected shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Write buffer is full; the sample was dropped
    #[error("Write buffer full, dropped {0} row(s)")]
    BufferFull(usize),

    /// Repository is shutting down
    #[error("Storage is shutting down")]
    ShuttingDown,
}

impl From<surrealdb::Error> for StorageError {
    fn from(e: surrealdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
