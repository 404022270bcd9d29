// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! SurrealDB-backed time-series repository.
//!
//! Writes go through a bounded in-memory buffer drained by a background
//! flush task, so collectors never wait on the storage engine. Reads run
//! directly against the embedded database.

use crate::storage::metrics::{MetricsRepository, TimeWindow};
use crate::storage::models::*;
use crate::storage::StorageError;
use crate::tenancy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{schema::TIMESERIES_SCHEMA, SurrealClient};

/// Buffered rows before a forced flush.
const FLUSH_BATCH_SIZE: usize = 256;
/// Buffer channel capacity; sends beyond this are dropped, not blocked.
const BUFFER_CAPACITY: usize = 4096;
/// Periodic flush interval.
const FLUSH_INTERVAL_SECS: u64 = 2;

enum BufferMsg {
    Row { table: &'static str, row: Value },
    Flush(oneshot::Sender<()>),
}

/// Time-series repository on embedded SurrealDB.
pub struct SurrealMetricsRepository {
    client: Arc<SurrealClient>,
    buffer: mpsc::Sender<BufferMsg>,
}

impl SurrealMetricsRepository {
    /// Opens the database, applies the schema, and starts the flush task.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let client = Arc::new(SurrealClient::open(path, "argus", "timeseries").await?);
        client.execute(TIMESERIES_SCHEMA, vec![]).await?;

        let (tx, rx) = mpsc::channel(BUFFER_CAPACITY);
        tokio::spawn(flush_loop(client.clone(), rx));
        info!(path, "Time-series repository ready");

        Ok(Self { client, buffer: tx })
    }

    /// Enqueues one row for the flush task. Never blocks: a full buffer
    /// drops the row, which callers treat as a best-effort loss.
    fn enqueue(&self, table: &'static str, mut row: Value) -> Result<(), StorageError> {
        if let Value::Object(map) = &mut row {
            map.insert("tenant_id".to_string(), json!(tenancy::current_tenant()));
        }
        self.buffer
            .try_send(BufferMsg::Row { table, row })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(table, "Write buffer full, dropping row");
                    StorageError::BufferFull(1)
                }
                mpsc::error::TrySendError::Closed(_) => StorageError::ShuttingDown,
            })
    }

    fn to_value<T: serde::Serialize>(row: &T) -> Value {
        serde_json::to_value(row).unwrap_or(Value::Null)
    }
}

async fn flush_loop(client: Arc<SurrealClient>, mut rx: mpsc::Receiver<BufferMsg>) {
    let mut pending: HashMap<&'static str, Vec<Value>> = HashMap::new();
    let mut pending_count = 0usize;
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(FLUSH_INTERVAL_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(BufferMsg::Row { table, row }) => {
                        pending.entry(table).or_default().push(row);
                        pending_count += 1;
                        if pending_count >= FLUSH_BATCH_SIZE {
                            flush_pending(&client, &mut pending, &mut pending_count).await;
                        }
                    }
                    Some(BufferMsg::Flush(ack)) => {
                        flush_pending(&client, &mut pending, &mut pending_count).await;
                        let _ = ack.send(());
                    }
                    None => {
                        flush_pending(&client, &mut pending, &mut pending_count).await;
                        break;
                    }
                }
            }
            _ = tick.tick() => {
                flush_pending(&client, &mut pending, &mut pending_count).await;
            }
        }
    }
    debug!("Metrics flush task stopped");
}

async fn flush_pending(
    client: &SurrealClient,
    pending: &mut HashMap<&'static str, Vec<Value>>,
    pending_count: &mut usize,
) {
    for (table, rows) in pending.drain() {
        let count = rows.len();
        if let Err(e) = client.insert_rows(table, rows).await {
            // Best-effort: the unflushed window is lost, the pipeline lives on.
            warn!(table, count, error = %e, "Batch flush failed");
        }
    }
    *pending_count = 0;
}

// ---------------------------------------------------------------------------
// Raw query rows (aggregates come back nullable)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawFunctionBucket {
    bucket: DateTime<Utc>,
    invocation_count: Option<u64>,
    error_count: Option<u64>,
    avg_duration_ms: Option<f64>,
    p50_ms: Option<f64>,
    p95_ms: Option<f64>,
    p99_ms: Option<f64>,
    cold_start_count: Option<u64>,
}

#[derive(Deserialize)]
struct RawRequestBucket {
    bucket: DateTime<Utc>,
    request_count: Option<u64>,
    error_count: Option<u64>,
    avg_duration_ms: Option<f64>,
    p95_ms: Option<f64>,
}

#[derive(Deserialize)]
struct RawSummary {
    count: Option<u64>,
    avg: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Deserialize)]
struct RawBaseline {
    metric_key: String,
    mean: Option<f64>,
    stddev: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    p50: Option<f64>,
    p95: Option<f64>,
    p99: Option<f64>,
    sample_count: Option<u64>,
}

impl RawBaseline {
    fn into_row(self) -> BaselineRow {
        BaselineRow {
            metric_name: self.metric_key,
            mean: self.mean.unwrap_or(0.0),
            stddev: self.stddev.unwrap_or(0.0),
            min: self.min.unwrap_or(0.0),
            max: self.max.unwrap_or(0.0),
            p50: self.p50.unwrap_or(0.0),
            p95: self.p95.unwrap_or(0.0),
            p99: self.p99.unwrap_or(0.0),
            sample_count: self.sample_count.unwrap_or(0),
            as_of: Utc::now(),
        }
    }
}

#[derive(Deserialize)]
struct RawErrorGroup {
    fingerprint: String,
    error_type: Option<String>,
    sample_message: Option<String>,
    count: Option<u64>,
    services: Option<Vec<String>>,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn tenant_binding() -> (&'static str, Value) {
    ("tenant", json!(tenancy::current_tenant()))
}

fn since_binding(since: DateTime<Utc>) -> (&'static str, Value) {
    ("since", json!(since.to_rfc3339()))
}

#[async_trait]
impl MetricsRepository for SurrealMetricsRepository {
    async fn insert_metric(&self, row: MetricRow) -> Result<(), StorageError> {
        self.enqueue("system_metrics", Self::to_value(&row))
    }

    async fn insert_metrics_batch(&self, rows: Vec<MetricRow>) -> Result<(), StorageError> {
        let mut dropped = 0;
        for row in rows {
            if self.enqueue("system_metrics", Self::to_value(&row)).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            return Err(StorageError::BufferFull(dropped));
        }
        Ok(())
    }

    async fn insert_log_entry(&self, row: LogEntryRow) -> Result<(), StorageError> {
        self.enqueue("log_index", Self::to_value(&row))
    }

    async fn insert_sdk_event(&self, row: SdkEventRow) -> Result<(), StorageError> {
        self.enqueue("sdk_events", Self::to_value(&row))
    }

    async fn insert_span(&self, row: SpanRow) -> Result<(), StorageError> {
        self.enqueue("spans", Self::to_value(&row))
    }

    async fn insert_sdk_metric(&self, row: SdkMetricRow) -> Result<(), StorageError> {
        self.enqueue("sdk_metrics", Self::to_value(&row))
    }

    async fn insert_dependency_call(&self, row: DependencyCallRow) -> Result<(), StorageError> {
        self.enqueue("dependency_calls", Self::to_value(&row))
    }

    async fn insert_deploy_event(&self, row: DeployEventRow) -> Result<(), StorageError> {
        self.enqueue("deploy_events", Self::to_value(&row))
    }

    async fn query_function_metrics(
        &self,
        service: &str,
        window: TimeWindow,
    ) -> Result<Vec<FunctionMetricsBucket>, StorageError> {
        let query = format!(
            "SELECT time::floor(timestamp, {bucket}s) AS bucket, \
                    count() AS invocation_count, \
                    count(event_type = 'invocation_end' AND payload.error != NONE) AS error_count, \
                    math::mean(payload.duration_ms) AS avg_duration_ms, \
                    math::percentile(payload.duration_ms, 50) AS p50_ms, \
                    math::percentile(payload.duration_ms, 95) AS p95_ms, \
                    math::percentile(payload.duration_ms, 99) AS p99_ms, \
                    count(payload.cold_start = true) AS cold_start_count \
             FROM sdk_events \
             WHERE tenant_id = $tenant AND service = $service \
               AND event_type = 'invocation_end' \
               AND timestamp >= type::datetime($since) \
             GROUP BY bucket ORDER BY bucket ASC",
            bucket = window.bucket_seconds
        );
        let rows: Vec<RawFunctionBucket> = self
            .client
            .query(
                &query,
                vec![
                    tenant_binding(),
                    ("service", json!(service)),
                    since_binding(window.since),
                ],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let invocations = r.invocation_count.unwrap_or(0);
                let errors = r.error_count.unwrap_or(0);
                let cold_starts = r.cold_start_count.unwrap_or(0);
                FunctionMetricsBucket {
                    bucket: r.bucket,
                    invocation_count: invocations,
                    error_count: errors,
                    error_rate: pct(errors, invocations),
                    avg_duration_ms: r.avg_duration_ms.unwrap_or(0.0),
                    p50_ms: r.p50_ms.unwrap_or(0.0),
                    p95_ms: r.p95_ms.unwrap_or(0.0),
                    p99_ms: r.p99_ms.unwrap_or(0.0),
                    cold_start_count: cold_starts,
                    cold_start_pct: pct(cold_starts, invocations),
                }
            })
            .collect())
    }

    async fn query_request_metrics(
        &self,
        service: &str,
        path: Option<&str>,
        method: Option<&str>,
        window: TimeWindow,
    ) -> Result<Vec<RequestMetricsBucket>, StorageError> {
        let mut filters = String::new();
        let mut bindings = vec![
            tenant_binding(),
            ("service", json!(service)),
            since_binding(window.since),
        ];
        if let Some(path) = path {
            filters.push_str(" AND attributes.path = $path");
            bindings.push(("path", json!(path)));
        }
        if let Some(method) = method {
            filters.push_str(" AND attributes.method = $method");
            bindings.push(("method", json!(method)));
        }

        let query = format!(
            "SELECT time::floor(timestamp, {bucket}s) AS bucket, \
                    count() AS request_count, \
                    count(status = 'error') AS error_count, \
                    math::mean(duration_ms) AS avg_duration_ms, \
                    math::percentile(duration_ms, 95) AS p95_ms \
             FROM spans \
             WHERE tenant_id = $tenant AND service = $service AND kind = 'server' \
               AND timestamp >= type::datetime($since){filters} \
             GROUP BY bucket ORDER BY bucket ASC",
            bucket = window.bucket_seconds
        );
        let rows: Vec<RawRequestBucket> = self.client.query(&query, bindings).await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let requests = r.request_count.unwrap_or(0);
                let errors = r.error_count.unwrap_or(0);
                RequestMetricsBucket {
                    bucket: r.bucket,
                    request_count: requests,
                    error_count: errors,
                    error_rate: pct(errors, requests),
                    avg_duration_ms: r.avg_duration_ms.unwrap_or(0.0),
                    p95_ms: r.p95_ms.unwrap_or(0.0),
                }
            })
            .collect())
    }

    async fn query_trace_summary(
        &self,
        service: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TraceSummaryRow>, StorageError> {
        let mut filters = String::new();
        let mut bindings = vec![tenant_binding(), since_binding(since)];
        if let Some(service) = service {
            filters.push_str(" AND service = $service");
            bindings.push(("service", json!(service)));
        }
        let query = format!(
            "SELECT trace_id, \
                    service AS root_service, \
                    name AS root_name, \
                    duration_ms, status, timestamp, \
                    (SELECT count() FROM spans WHERE tenant_id = $tenant AND trace_id = $parent.trace_id GROUP ALL)[0].count OR 1 AS span_count \
             FROM spans \
             WHERE tenant_id = $tenant AND parent_span_id = NONE \
               AND timestamp >= type::datetime($since){filters} \
             ORDER BY timestamp DESC LIMIT {limit}"
        );
        self.client.query(&query, bindings).await
    }

    async fn query_slow_spans(
        &self,
        service: Option<&str>,
        min_duration_ms: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SlowSpanRow>, StorageError> {
        let mut filters = String::new();
        let mut bindings = vec![
            tenant_binding(),
            since_binding(since),
            ("min_ms", json!(min_duration_ms)),
        ];
        if let Some(service) = service {
            filters.push_str(" AND service = $service");
            bindings.push(("service", json!(service)));
        }
        let query = format!(
            "SELECT service, name, duration_ms, trace_id, span_id, status, timestamp \
             FROM spans \
             WHERE tenant_id = $tenant AND duration_ms >= $min_ms \
               AND timestamp >= type::datetime($since){filters} \
             ORDER BY duration_ms DESC LIMIT {limit}"
        );
        self.client.query(&query, bindings).await
    }

    async fn query_trace(&self, trace_id: &str) -> Result<Vec<SpanRow>, StorageError> {
        self.client
            .query(
                "SELECT * FROM spans \
                 WHERE tenant_id = $tenant AND trace_id = $trace_id \
                 ORDER BY timestamp ASC",
                vec![tenant_binding(), ("trace_id", json!(trace_id))],
            )
            .await
    }

    async fn query_error_groups(
        &self,
        service: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ErrorGroup>, StorageError> {
        // Spans store the fingerprint at ingest time (attributes.fingerprint),
        // so grouping is a plain aggregate.
        let mut filters = String::new();
        let mut bindings = vec![tenant_binding(), since_binding(since)];
        if let Some(service) = service {
            filters.push_str(" AND service = $service");
            bindings.push(("service", json!(service)));
        }
        let query = format!(
            "SELECT attributes.fingerprint AS fingerprint, \
                    array::first(array::group(error_type)) AS error_type, \
                    array::first(array::group(error_message)) AS sample_message, \
                    count() AS count, \
                    array::distinct(array::group(service)) AS services, \
                    time::min(timestamp) AS first_seen, \
                    time::max(timestamp) AS last_seen \
             FROM spans \
             WHERE tenant_id = $tenant AND status = 'error' \
               AND attributes.fingerprint != NONE \
               AND timestamp >= type::datetime($since){filters} \
             GROUP BY fingerprint ORDER BY count DESC LIMIT {limit}"
        );
        let rows: Vec<RawErrorGroup> = self.client.query(&query, bindings).await?;
        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|r| ErrorGroup {
                fingerprint: r.fingerprint,
                error_type: r.error_type.unwrap_or_default(),
                sample_message: r.sample_message.unwrap_or_default(),
                count: r.count.unwrap_or(0),
                services: r.services.unwrap_or_default(),
                first_seen: r.first_seen.unwrap_or(now),
                last_seen: r.last_seen.unwrap_or(now),
            })
            .collect())
    }

    async fn query_service_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ServiceSummary>, StorageError> {
        #[derive(Deserialize)]
        struct Raw {
            service: String,
            invocation_count: Option<u64>,
            error_count: Option<u64>,
            avg_duration_ms: Option<f64>,
            p95_ms: Option<f64>,
            last_seen: Option<DateTime<Utc>>,
        }
        let rows: Vec<Raw> = self
            .client
            .query(
                "SELECT service, \
                        count() AS invocation_count, \
                        count(payload.error != NONE) AS error_count, \
                        math::mean(payload.duration_ms) AS avg_duration_ms, \
                        math::percentile(payload.duration_ms, 95) AS p95_ms, \
                        time::max(timestamp) AS last_seen \
                 FROM sdk_events \
                 WHERE tenant_id = $tenant AND event_type = 'invocation_end' \
                   AND timestamp >= type::datetime($since) \
                 GROUP BY service ORDER BY service ASC",
                vec![tenant_binding(), since_binding(since)],
            )
            .await?;
        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|r| {
                let invocations = r.invocation_count.unwrap_or(0);
                let errors = r.error_count.unwrap_or(0);
                ServiceSummary {
                    service: r.service,
                    invocation_count: invocations,
                    error_count: errors,
                    error_rate: pct(errors, invocations),
                    avg_duration_ms: r.avg_duration_ms.unwrap_or(0.0),
                    p95_ms: r.p95_ms.unwrap_or(0.0),
                    last_seen: r.last_seen.unwrap_or(now),
                }
            })
            .collect())
    }

    async fn query_dependency_summary(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DependencySummary>, StorageError> {
        #[derive(Deserialize)]
        struct Raw {
            dep_type: String,
            target: String,
            call_count: Option<u64>,
            error_count: Option<u64>,
            avg_duration_ms: Option<f64>,
        }
        let rows: Vec<Raw> = self
            .client
            .query(
                "SELECT dep_type, target, \
                        count() AS call_count, \
                        count(status = 'error') AS error_count, \
                        math::mean(duration_ms) AS avg_duration_ms \
                 FROM dependency_calls \
                 WHERE tenant_id = $tenant AND service = $service \
                   AND timestamp >= type::datetime($since) \
                 GROUP BY dep_type, target ORDER BY call_count DESC",
                vec![
                    tenant_binding(),
                    ("service", json!(service)),
                    since_binding(since),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DependencySummary {
                dep_type: r.dep_type,
                target: r.target,
                call_count: r.call_count.unwrap_or(0),
                error_count: r.error_count.unwrap_or(0),
                avg_duration_ms: r.avg_duration_ms.unwrap_or(0.0),
            })
            .collect())
    }

    async fn query_dependency_map(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<DependencyEdge>, StorageError> {
        #[derive(Deserialize)]
        struct Raw {
            service: String,
            target: String,
            dep_type: String,
            call_count: Option<u64>,
        }
        let rows: Vec<Raw> = self
            .client
            .query(
                "SELECT service, target, dep_type, count() AS call_count \
                 FROM dependency_calls \
                 WHERE tenant_id = $tenant AND timestamp >= type::datetime($since) \
                 GROUP BY service, target, dep_type",
                vec![tenant_binding(), since_binding(since)],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DependencyEdge {
                service: r.service,
                target: r.target,
                dep_type: r.dep_type,
                call_count: r.call_count.unwrap_or(0),
            })
            .collect())
    }

    async fn query_deploy_history(
        &self,
        service: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DeployEventRow>, StorageError> {
        let mut filters = String::new();
        let mut bindings = vec![tenant_binding()];
        if let Some(service) = service {
            filters.push_str(" AND service = $service");
            bindings.push(("service", json!(service)));
        }
        let query = format!(
            "SELECT * FROM deploy_events \
             WHERE tenant_id = $tenant{filters} \
             ORDER BY timestamp DESC LIMIT {limit}"
        );
        self.client.query(&query, bindings).await
    }

    async fn query_metrics_summary(
        &self,
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> Result<MetricsSummary, StorageError> {
        let rows: Vec<RawSummary> = self
            .client
            .query(
                "SELECT count() AS count, \
                        math::mean(value) AS avg, \
                        math::min(value) AS min, \
                        math::max(value) AS max \
                 FROM system_metrics \
                 WHERE tenant_id = $tenant AND metric_name = $metric \
                   AND timestamp >= type::datetime($since) \
                 GROUP ALL",
                vec![
                    tenant_binding(),
                    ("metric", json!(metric_name)),
                    since_binding(since),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|r| MetricsSummary {
                count: r.count.unwrap_or(0),
                avg: r.avg.unwrap_or(0.0),
                min: r.min.unwrap_or(0.0),
                max: r.max.unwrap_or(0.0),
            })
            .unwrap_or_default())
    }

    async fn query_metric_series(
        &self,
        metric_name: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MetricPoint>, StorageError> {
        let query = format!(
            "SELECT timestamp, value FROM system_metrics \
             WHERE tenant_id = $tenant AND metric_name = $metric \
               AND timestamp >= type::datetime($since) \
             ORDER BY timestamp DESC LIMIT {limit}"
        );
        self.client
            .query(
                &query,
                vec![
                    tenant_binding(),
                    ("metric", json!(metric_name)),
                    since_binding(since),
                ],
            )
            .await
    }

    async fn compute_metric_baselines(
        &self,
        since: DateTime<Utc>,
        min_samples: u64,
    ) -> Result<Vec<BaselineRow>, StorageError> {
        let rows: Vec<RawBaseline> = self
            .client
            .query(
                "SELECT metric_name AS metric_key, \
                        math::mean(value) AS mean, \
                        math::stddev(value) AS stddev, \
                        math::min(value) AS min, \
                        math::max(value) AS max, \
                        math::percentile(value, 50) AS p50, \
                        math::percentile(value, 95) AS p95, \
                        math::percentile(value, 99) AS p99, \
                        count() AS sample_count \
                 FROM system_metrics \
                 WHERE tenant_id = $tenant AND timestamp >= type::datetime($since) \
                 GROUP BY metric_key",
                vec![tenant_binding(), since_binding(since)],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(RawBaseline::into_row)
            .filter(|b| b.sample_count >= min_samples)
            .collect())
    }

    async fn compute_sdk_baselines(
        &self,
        since: DateTime<Utc>,
        min_samples: u64,
    ) -> Result<Vec<BaselineRow>, StorageError> {
        let metric_rows: Vec<RawBaseline> = self
            .client
            .query(
                "SELECT string::concat('sdk.', service, '.', metric_name) AS metric_key, \
                        math::mean(value) AS mean, \
                        math::stddev(value) AS stddev, \
                        math::min(value) AS min, \
                        math::max(value) AS max, \
                        math::percentile(value, 50) AS p50, \
                        math::percentile(value, 95) AS p95, \
                        math::percentile(value, 99) AS p99, \
                        count() AS sample_count \
                 FROM sdk_metrics \
                 WHERE tenant_id = $tenant AND timestamp >= type::datetime($since) \
                 GROUP BY metric_key",
                vec![tenant_binding(), since_binding(since)],
            )
            .await?;

        let span_rows: Vec<RawBaseline> = self
            .client
            .query(
                "SELECT string::concat('sdk.', service, '.span.', name) AS metric_key, \
                        math::mean(duration_ms) AS mean, \
                        math::stddev(duration_ms) AS stddev, \
                        math::min(duration_ms) AS min, \
                        math::max(duration_ms) AS max, \
                        math::percentile(duration_ms, 50) AS p50, \
                        math::percentile(duration_ms, 95) AS p95, \
                        math::percentile(duration_ms, 99) AS p99, \
                        count() AS sample_count \
                 FROM spans \
                 WHERE tenant_id = $tenant AND duration_ms != NONE \
                   AND timestamp >= type::datetime($since) \
                 GROUP BY metric_key",
                vec![tenant_binding(), since_binding(since)],
            )
            .await?;

        Ok(metric_rows
            .into_iter()
            .chain(span_rows)
            .map(RawBaseline::into_row)
            .filter(|b| b.sample_count >= min_samples)
            .collect())
    }

    async fn upsert_baselines(&self, rows: Vec<BaselineRow>) -> Result<(), StorageError> {
        let tenant = tenancy::current_tenant();
        // Full replace: the new snapshot is authoritative for this tenant.
        self.client
            .execute(
                "DELETE metric_baselines WHERE tenant_id = $tenant",
                vec![("tenant", json!(tenant.clone()))],
            )
            .await?;

        let values: Vec<Value> = rows
            .iter()
            .map(|row| {
                let mut v = Self::to_value(row);
                if let Value::Object(map) = &mut v {
                    map.insert("tenant_id".to_string(), json!(tenant.clone()));
                }
                super::sanitize(v)
            })
            .collect();
        if values.is_empty() {
            return Ok(());
        }
        self.client
            .execute(
                "INSERT INTO metric_baselines $rows",
                vec![("rows", Value::Array(values))],
            )
            .await
    }

    async fn load_baselines(&self) -> Result<Vec<BaselineRow>, StorageError> {
        self.client
            .query(
                "SELECT metric_name, mean, stddev, min, max, p50, p95, p99, sample_count, as_of \
                 FROM metric_baselines WHERE tenant_id = $tenant",
                vec![tenant_binding()],
            )
            .await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.buffer
            .send(BufferMsg::Flush(ack_tx))
            .await
            .map_err(|_| StorageError::ShuttingDown)?;
        ack_rx.await.map_err(|_| StorageError::ShuttingDown)
    }
}
