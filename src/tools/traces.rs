// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trace and error-group query tools.

use super::{Tool, ToolError, ToolResult};
use crate::storage::MetricsRepository;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

fn opt_service(args: &Value) -> Option<String> {
    args.get("service")
        .and_then(Value::as_str)
        .map(String::from)
}

fn since(args: &Value, default_hours: i64) -> chrono::DateTime<Utc> {
    let hours = args
        .get("hours")
        .and_then(Value::as_i64)
        .unwrap_or(default_hours)
        .clamp(1, 24 * 7);
    Utc::now() - Duration::hours(hours)
}

fn limit(args: &Value, default: u64) -> usize {
    args.get("limit").and_then(Value::as_u64).unwrap_or(default).min(200) as usize
}

/// Recent traces, or every span of one trace when `trace_id` is given.
pub struct ListTracesTool {
    repo: Arc<dyn MetricsRepository>,
}

impl ListTracesTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for ListTracesTool {
    fn name(&self) -> &str {
        "list_traces"
    }

    fn description(&self) -> &str {
        "List recent traces (root spans with counts and durations), or fetch every span of \
         one trace by trace_id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "trace_id": {"type": "string", "description": "Fetch this one trace in full"},
                "service": {"type": "string", "description": "Filter the listing by service"},
                "hours": {"type": "integer", "description": "Lookback window in hours (default 1)"},
                "limit": {"type": "integer", "description": "Max traces (default 20)"}
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        if let Some(trace_id) = args.get("trace_id").and_then(Value::as_str) {
            let spans = self.repo.query_trace(trace_id).await?;
            if spans.is_empty() {
                return Err(ToolError::NotFound(format!("trace {trace_id}")));
            }
            return Ok(json!({"trace_id": trace_id, "spans": spans}));
        }

        let traces = self
            .repo
            .query_trace_summary(opt_service(&args).as_deref(), since(&args, 1), limit(&args, 20))
            .await?;
        Ok(json!({"traces": traces}))
    }
}

/// Slowest spans above a duration floor.
pub struct SlowSpansTool {
    repo: Arc<dyn MetricsRepository>,
}

impl SlowSpansTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for SlowSpansTool {
    fn name(&self) -> &str {
        "slow_spans"
    }

    fn description(&self) -> &str {
        "Find the slowest spans above a minimum duration, worst first. Useful for latency \
         investigations."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": {"type": "string"},
                "min_duration_ms": {"type": "number", "description": "Duration floor (default 500)"},
                "hours": {"type": "integer", "description": "Lookback window in hours (default 1)"},
                "limit": {"type": "integer", "description": "Max spans (default 20)"}
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let min_duration_ms = args
            .get("min_duration_ms")
            .and_then(Value::as_f64)
            .unwrap_or(500.0);
        let spans = self
            .repo
            .query_slow_spans(
                opt_service(&args).as_deref(),
                min_duration_ms,
                since(&args, 1),
                limit(&args, 20),
            )
            .await?;
        Ok(json!({"min_duration_ms": min_duration_ms, "spans": spans}))
    }
}

/// Errors grouped by normalized fingerprint.
pub struct ErrorGroupsTool {
    repo: Arc<dyn MetricsRepository>,
}

impl ErrorGroupsTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for ErrorGroupsTool {
    fn name(&self) -> &str {
        "error_groups"
    }

    fn description(&self) -> &str {
        "Group recent errors by normalized fingerprint (line numbers, paths and ids ignored), \
         with counts, affected services, and first/last occurrence."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": {"type": "string"},
                "hours": {"type": "integer", "description": "Lookback window in hours (default 24)"},
                "limit": {"type": "integer", "description": "Max groups (default 20)"}
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let groups = self
            .repo
            .query_error_groups(opt_service(&args).as_deref(), since(&args, 24), limit(&args, 20))
            .await?;
        Ok(json!({"groups": groups}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::NullMetricsRepository;

    #[tokio::test]
    async fn test_missing_trace_is_not_found() {
        let tool = ListTracesTool::new(Arc::new(NullMetricsRepository));
        let err = tool
            .execute(json!({"trace_id": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listing_empty_is_ok() {
        let tool = ListTracesTool::new(Arc::new(NullMetricsRepository));
        let result = tool.execute(json!({})).await.unwrap();
        assert!(result["traces"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_spans_default_floor() {
        let tool = SlowSpansTool::new(Arc::new(NullMetricsRepository));
        let result = tool.execute(json!({})).await.unwrap();
        assert_eq!(result["min_duration_ms"], 500.0);
    }

    #[tokio::test]
    async fn test_error_groups_shape() {
        let tool = ErrorGroupsTool::new(Arc::new(NullMetricsRepository));
        let result = tool.execute(json!({"service": "checkout"})).await.unwrap();
        assert!(result["groups"].as_array().unwrap().is_empty());
    }
}
