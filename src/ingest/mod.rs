// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! SDK telemetry ingest.
//!
//! Maps `/ingest` batch payloads onto time-series inserts. The transport
//! resolves the tenant from the `x-argus-key` header and wraps the call in
//! [`crate::tenancy::with_tenant`]; this module only does the mapping.
//! Unknown event types are counted and skipped, never an error.

pub mod signing;

pub use signing::{sign, verify_signature, SignatureError, TIMESTAMP_SKEW_SECS};

use crate::storage::models::*;
use crate::storage::{error_fingerprint, MetricsRepository};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// One event in an ingest batch.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// The `/ingest` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestBatch {
    pub events: Vec<IngestEvent>,
    #[serde(default)]
    pub sdk: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
}

/// What happened to a batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub skipped: usize,
}

/// Maps ingest payloads to repository inserts.
pub struct IngestService {
    repo: Arc<dyn MetricsRepository>,
}

impl IngestService {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }

    /// Processes one batch for the ambient tenant.
    pub async fn handle_batch(&self, batch: IngestBatch) -> IngestReport {
        let mut report = IngestReport::default();
        let default_service = batch.service.clone().unwrap_or_default();

        for event in batch.events {
            let service = event
                .service
                .clone()
                .unwrap_or_else(|| default_service.clone());
            let accepted = self.handle_event(&service, event).await;
            if accepted {
                report.accepted += 1;
            } else {
                report.skipped += 1;
            }
        }

        debug!(
            accepted = report.accepted,
            skipped = report.skipped,
            sdk = batch.sdk.as_deref().unwrap_or(""),
            "Ingest batch processed"
        );
        report
    }

    async fn handle_event(&self, service: &str, event: IngestEvent) -> bool {
        let data = event.data;
        let timestamp = parse_timestamp(&data);

        let result = match event.event_type.as_str() {
            "invocation_start" | "invocation_end" => {
                self.repo
                    .insert_sdk_event(SdkEventRow {
                        service: service.to_string(),
                        event_type: event.event_type,
                        payload: data,
                        timestamp,
                    })
                    .await
            }
            "span" => {
                let row = span_from_data(service, &data, timestamp);
                self.repo.insert_span(row).await
            }
            "metric" => {
                let Some(name) = str_field(&data, "name") else {
                    return false;
                };
                self.repo
                    .insert_sdk_metric(SdkMetricRow {
                        service: service.to_string(),
                        metric_name: name,
                        value: num_field(&data, "value").unwrap_or(0.0),
                        labels: obj_field(&data, "labels"),
                        timestamp,
                    })
                    .await
            }
            "deploy" => {
                self.repo
                    .insert_deploy_event(DeployEventRow {
                        service: service.to_string(),
                        version: str_field(&data, "version").unwrap_or_default(),
                        git_sha: str_field(&data, "git_sha"),
                        environment: str_field(&data, "environment")
                            .unwrap_or_else(|| "production".to_string()),
                        previous_version: str_field(&data, "previous_version"),
                        attributes: obj_field(&data, "attributes"),
                        timestamp,
                    })
                    .await
            }
            "dependency_call" => {
                self.repo
                    .insert_dependency_call(DependencyCallRow {
                        service: service.to_string(),
                        dep_type: str_field(&data, "dep_type").unwrap_or_else(|| "http".to_string()),
                        target: str_field(&data, "target").unwrap_or_default(),
                        trace_id: str_field(&data, "trace_id"),
                        span_id: str_field(&data, "span_id"),
                        operation: str_field(&data, "operation").unwrap_or_default(),
                        duration_ms: num_field(&data, "duration_ms"),
                        status: str_field(&data, "status").unwrap_or_else(|| "ok".to_string()),
                        status_code: data.get("status_code").and_then(Value::as_i64),
                        error: str_field(&data, "error"),
                        attributes: obj_field(&data, "attributes"),
                        timestamp,
                    })
                    .await
            }
            other => {
                debug!(event_type = other, "Unknown ingest event type, skipping");
                return false;
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                // Best-effort: the sender already moved on
                warn!(error = %e, "Ingest insert failed");
                false
            }
        }
    }
}

fn parse_timestamp(data: &Value) -> DateTime<Utc> {
    data.get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(String::from)
}

fn num_field(data: &Value, key: &str) -> Option<f64> {
    data.get(key).and_then(Value::as_f64)
}

fn obj_field(data: &Value, key: &str) -> Map<String, Value> {
    data.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn span_from_data(service: &str, data: &Value, timestamp: DateTime<Utc>) -> SpanRow {
    let error_type = str_field(data, "error_type");
    let error_message = str_field(data, "error_message");

    let mut attributes = obj_field(data, "attributes");
    // Error spans get their grouping fingerprint stamped at ingest time
    if let Some(error_type) = &error_type {
        let stack = str_field(data, "stack").or_else(|| error_message.clone()).unwrap_or_default();
        attributes.insert(
            "fingerprint".to_string(),
            Value::String(error_fingerprint(error_type, &stack)),
        );
    }

    SpanRow {
        trace_id: str_field(data, "trace_id").unwrap_or_default(),
        span_id: str_field(data, "span_id").unwrap_or_default(),
        parent_span_id: str_field(data, "parent_span_id"),
        service: service.to_string(),
        name: str_field(data, "name").unwrap_or_default(),
        kind: str_field(data, "kind").unwrap_or_else(|| "internal".to_string()),
        duration_ms: num_field(data, "duration_ms"),
        status: str_field(data, "status").unwrap_or_else(|| "ok".to_string()),
        error_type,
        error_message,
        attributes,
        timestamp,
    }
}
