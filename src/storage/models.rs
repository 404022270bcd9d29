// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Row and aggregate types shared by the storage layer.
//!
//! Insert rows mirror the time-series tables; aggregate rows are the shapes
//! the analytical queries deserialize into and the AI tools serialize back
//! out as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Time-series insert rows
// ---------------------------------------------------------------------------

/// A single system metric sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl MetricRow {
    pub fn new(metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            labels: Map::new(),
            timestamp: Utc::now(),
        }
    }
}

/// An indexed log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryRow {
    pub path: String,
    pub offset: u64,
    pub severity: String,
    pub preview: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// An SDK lifecycle event (invocation_start, invocation_end, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkEventRow {
    pub service: String,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// A traced operation inside an instrumented service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRow {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub service: String,
    pub name: String,
    pub kind: String,
    pub duration_ms: Option<f64>,
    pub status: String,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// A runtime metric reported by an instrumented service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkMetricRow {
    pub service: String,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// An outbound dependency call observed by the SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyCallRow {
    pub service: String,
    pub dep_type: String,
    pub target: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub operation: String,
    pub duration_ms: Option<f64>,
    pub status: String,
    pub status_code: Option<i64>,
    pub error: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// A deploy marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployEventRow {
    pub service: String,
    pub version: String,
    pub git_sha: Option<String>,
    pub environment: String,
    pub previous_version: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Statistical profile of a metric over the rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRow {
    pub metric_name: String,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: u64,
    pub as_of: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Analytical aggregates
// ---------------------------------------------------------------------------

/// Per-bucket function (invocation) metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionMetricsBucket {
    pub bucket: DateTime<Utc>,
    pub invocation_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub cold_start_count: u64,
    pub cold_start_pct: f64,
}

/// Per-bucket HTTP request metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetricsBucket {
    pub bucket: DateTime<Utc>,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_ms: f64,
}

/// One row of the trace listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummaryRow {
    pub trace_id: String,
    pub root_service: String,
    pub root_name: String,
    pub span_count: u64,
    pub duration_ms: f64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// A slow span candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowSpanRow {
    pub service: String,
    pub name: String,
    pub duration_ms: f64,
    pub trace_id: String,
    pub span_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Errors grouped by normalized fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub fingerprint: String,
    pub error_type: String,
    pub sample_message: String,
    pub count: u64,
    pub services: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Rollup for one instrumented service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub service: String,
    pub invocation_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_ms: f64,
    pub last_seen: DateTime<Utc>,
}

/// Rollup for one dependency target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySummary {
    pub dep_type: String,
    pub target: String,
    pub call_count: u64,
    pub error_count: u64,
    pub avg_duration_ms: f64,
}

/// One edge of the service → dependency map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub service: String,
    pub target: String,
    pub dep_type: String,
    pub call_count: u64,
}

/// Simple metric rollup over a window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// A raw metric sample returned by series queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Operational rows
// ---------------------------------------------------------------------------

/// Append-only audit record for attempted and executed actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub command: String,
    pub result: String,
    pub success: bool,
    pub user_approved: bool,
    pub tenant_id: String,
}

/// Persisted copy of a fired alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryRow {
    pub alert_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: String,
    pub dedup_key: String,
    pub message: String,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

/// Persisted acknowledgment of a dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgmentRow {
    pub dedup_key: String,
    pub rule_id: String,
    pub acknowledged_by: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted rule mute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMuteRow {
    pub rule_id: String,
    pub muted_by: String,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One LLM call's token usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRow {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub source: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted conversation header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRow {
    pub conversation_id: String,
    pub title: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub message_id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub token_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// Completed/failed investigation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRow {
    pub investigation_id: String,
    pub trigger: String,
    pub severity: String,
    pub status: String,
    pub summary: String,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_row_defaults() {
        let row = MetricRow::new("cpu_percent", 42.0);
        assert_eq!(row.metric_name, "cpu_percent");
        assert!(row.labels.is_empty());
    }

    #[test]
    fn test_span_row_roundtrip() {
        let row = SpanRow {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span_id: None,
            service: "checkout".to_string(),
            name: "charge_card".to_string(),
            kind: "internal".to_string(),
            duration_ms: Some(12.5),
            status: "ok".to_string(),
            error_type: None,
            error_message: None,
            attributes: Map::new(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["service"], "checkout");
        let back: SpanRow = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration_ms, Some(12.5));
    }

    #[test]
    fn test_sdk_event_payload_is_freeform() {
        let row = SdkEventRow {
            service: "api".to_string(),
            event_type: "invocation_end".to_string(),
            payload: json!({"duration_ms": 10, "cold_start": false}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["payload"]["duration_ms"], 10);
    }
}
