// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Time-series repository contract.
//!
//! The core consumes telemetry storage through this single narrow trait.
//! Writes are best-effort: implementations may buffer and flush
//! asynchronously, and callers must tolerate the last unflushed window being
//! lost on crash. Reads return empty vectors, never errors, when no data
//! matches.

use super::models::*;
use super::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Query window plus bucket width for time-bucketed aggregations.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Bucket width in seconds
    pub bucket_seconds: u64,
}

impl TimeWindow {
    /// Last `minutes` minutes, bucketed by `bucket_seconds`.
    pub fn last_minutes(minutes: i64, bucket_seconds: u64) -> Self {
        let until = Utc::now();
        Self {
            since: until - chrono::Duration::minutes(minutes),
            until,
            bucket_seconds,
        }
    }

    /// Last `hours` hours, bucketed by `bucket_seconds`.
    pub fn last_hours(hours: i64, bucket_seconds: u64) -> Self {
        let until = Utc::now();
        Self {
            since: until - chrono::Duration::hours(hours),
            until,
            bucket_seconds,
        }
    }
}

/// Append-only writes and analytical reads over the telemetry tables.
///
/// Every call is scoped to the ambient tenant (see [`crate::tenancy`]).
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    // --- Inserts (fire-and-forget, duplicate timestamps permitted) ---

    async fn insert_metric(&self, row: MetricRow) -> Result<(), StorageError>;
    async fn insert_metrics_batch(&self, rows: Vec<MetricRow>) -> Result<(), StorageError>;
    async fn insert_log_entry(&self, row: LogEntryRow) -> Result<(), StorageError>;
    async fn insert_sdk_event(&self, row: SdkEventRow) -> Result<(), StorageError>;
    async fn insert_span(&self, row: SpanRow) -> Result<(), StorageError>;
    async fn insert_sdk_metric(&self, row: SdkMetricRow) -> Result<(), StorageError>;
    async fn insert_dependency_call(&self, row: DependencyCallRow) -> Result<(), StorageError>;
    async fn insert_deploy_event(&self, row: DeployEventRow) -> Result<(), StorageError>;

    // --- Analytical reads ---

    /// Per-bucket invocation counts, error rates, latency percentiles and
    /// cold-start share for one service.
    async fn query_function_metrics(
        &self,
        service: &str,
        window: TimeWindow,
    ) -> Result<Vec<FunctionMetricsBucket>, StorageError>;

    /// Per-bucket request metrics, optionally filtered by path and method.
    async fn query_request_metrics(
        &self,
        service: &str,
        path: Option<&str>,
        method: Option<&str>,
        window: TimeWindow,
    ) -> Result<Vec<RequestMetricsBucket>, StorageError>;

    /// Recent root spans with per-trace span counts.
    async fn query_trace_summary(
        &self,
        service: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TraceSummaryRow>, StorageError>;

    /// Slowest spans above `min_duration_ms`.
    async fn query_slow_spans(
        &self,
        service: Option<&str>,
        min_duration_ms: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SlowSpanRow>, StorageError>;

    /// All spans of one trace, oldest first.
    async fn query_trace(&self, trace_id: &str) -> Result<Vec<SpanRow>, StorageError>;

    /// Errors grouped by normalized fingerprint.
    async fn query_error_groups(
        &self,
        service: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ErrorGroup>, StorageError>;

    /// Rollup per instrumented service.
    async fn query_service_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ServiceSummary>, StorageError>;

    /// Rollup per dependency target for one service.
    async fn query_dependency_summary(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DependencySummary>, StorageError>;

    /// Service → dependency edges across all services.
    async fn query_dependency_map(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<DependencyEdge>, StorageError>;

    /// Deploy markers, newest first.
    async fn query_deploy_history(
        &self,
        service: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DeployEventRow>, StorageError>;

    /// count/avg/min/max of one system metric over a window.
    async fn query_metrics_summary(
        &self,
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> Result<MetricsSummary, StorageError>;

    /// Raw samples of one system metric, newest first.
    async fn query_metric_series(
        &self,
        metric_name: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MetricPoint>, StorageError>;

    // --- Baselines ---

    /// Computes 7-day aggregates grouped by metric name. Only metrics with
    /// at least `min_samples` samples are returned.
    async fn compute_metric_baselines(
        &self,
        since: DateTime<Utc>,
        min_samples: u64,
    ) -> Result<Vec<BaselineRow>, StorageError>;

    /// SDK-derived baselines: runtime metrics keyed `sdk.<service>.<metric>`
    /// and span durations keyed `sdk.<service>.span.<name>`.
    async fn compute_sdk_baselines(
        &self,
        since: DateTime<Utc>,
        min_samples: u64,
    ) -> Result<Vec<BaselineRow>, StorageError>;

    /// Atomically replaces the persisted baseline table.
    async fn upsert_baselines(&self, rows: Vec<BaselineRow>) -> Result<(), StorageError>;

    /// Reads back the persisted baselines.
    async fn load_baselines(&self) -> Result<Vec<BaselineRow>, StorageError>;

    /// Flushes any buffered writes. Called on shutdown.
    async fn flush(&self) -> Result<(), StorageError>;
}

static LINE_NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(line\s+|:)\d+").unwrap());
static HEX_IDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b|\b[0-9a-f]{8,}\b").unwrap());
static PATHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(/[\w.\-]+)+/([\w.\-]+)").unwrap());

/// Produces a stable fingerprint for an error, ignoring the parts that churn
/// between occurrences: line numbers, absolute paths (reduced to their
/// basename), and hex/opaque ids.
pub fn error_fingerprint(error_type: &str, stack: &str) -> String {
    let normalized = PATHS.replace_all(stack, "$2");
    let normalized = LINE_NUMBERS.replace_all(&normalized, "${1}N");
    let normalized = HEX_IDS.replace_all(&normalized, "ID");

    let mut hasher = Sha256::new();
    hasher.update(error_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    // 16 hex chars is plenty for grouping
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_line_numbers() {
        let a = error_fingerprint("ValueError", "at handler, line 42, in process");
        let b = error_fingerprint("ValueError", "at handler, line 97, in process");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_absolute_paths() {
        let a = error_fingerprint("IOError", "open failed: /srv/app/releases/v1/config.yaml");
        let b = error_fingerprint("IOError", "open failed: /srv/app/releases/v2/config.yaml");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_hex_ids() {
        let a = error_fingerprint("Panic", "task 0xdeadbeef crashed");
        let b = error_fingerprint("Panic", "task 0xcafebabe crashed");
        assert_eq!(a, b);

        let c = error_fingerprint("Timeout", "request 9f86d081884c7d65 timed out");
        let d = error_fingerprint("Timeout", "request a591a6d40bf42040 timed out");
        assert_eq!(c, d);
    }

    #[test]
    fn test_fingerprint_distinguishes_error_types() {
        let a = error_fingerprint("ValueError", "same stack");
        let b = error_fingerprint("TypeError", "same stack");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_messages() {
        let a = error_fingerprint("E", "connection refused");
        let b = error_fingerprint("E", "permission denied");
        assert_ne!(a, b);
    }

    #[test]
    fn test_time_window_helpers() {
        let w = TimeWindow::last_minutes(60, 300);
        assert_eq!(w.bucket_seconds, 300);
        assert!((w.until - w.since).num_minutes() == 60);
    }
}
