// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Metric query tools.

use super::{Tool, ToolResult};
use crate::storage::{MetricsRepository, TimeWindow};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

fn hours_arg(args: &Value, default: i64) -> i64 {
    args.get("hours")
        .and_then(Value::as_i64)
        .unwrap_or(default)
        .clamp(1, 24 * 7)
}

/// Summary + recent samples of one system metric.
pub struct QueryMetricsTool {
    repo: Arc<dyn MetricsRepository>,
}

impl QueryMetricsTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for QueryMetricsTool {
    fn name(&self) -> &str {
        "query_metrics"
    }

    fn description(&self) -> &str {
        "Query a system metric (cpu_percent, memory_percent, disk_percent, ...): summary \
         statistics plus recent samples over a time window."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "metric_name": {"type": "string", "description": "Metric to query"},
                "hours": {"type": "integer", "description": "Lookback window in hours (default 1)"},
                "limit": {"type": "integer", "description": "Max recent samples to return (default 30)"}
            },
            "required": ["metric_name"]
        })
    }

    fn display_type(&self) -> &str {
        "metrics_chart"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let metric_name = args
            .get("metric_name")
            .and_then(Value::as_str)
            .ok_or_else(|| super::ToolError::InvalidInput("metric_name is required".into()))?;
        let hours = hours_arg(&args, 1);
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(30)
            .min(500) as usize;
        let since = Utc::now() - Duration::hours(hours);

        let summary = self.repo.query_metrics_summary(metric_name, since).await?;
        let series = self.repo.query_metric_series(metric_name, since, limit).await?;

        Ok(json!({
            "metric": metric_name,
            "window_hours": hours,
            "summary": summary,
            "samples": series,
        }))
    }
}

/// Per-service rollup of SDK telemetry.
pub struct ServiceSummaryTool {
    repo: Arc<dyn MetricsRepository>,
}

impl ServiceSummaryTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for ServiceSummaryTool {
    fn name(&self) -> &str {
        "service_summary"
    }

    fn description(&self) -> &str {
        "Summarize all instrumented services: invocation counts, error rates, latency, and \
         when each service last reported."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hours": {"type": "integer", "description": "Lookback window in hours (default 24)"}
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let hours = hours_arg(&args, 24);
        let since = Utc::now() - Duration::hours(hours);
        let services = self.repo.query_service_summary(since).await?;
        Ok(json!({
            "window_hours": hours,
            "services": services,
        }))
    }
}

/// Time-bucketed invocation/error/latency profile for one service.
pub struct FunctionMetricsTool {
    repo: Arc<dyn MetricsRepository>,
}

impl FunctionMetricsTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for FunctionMetricsTool {
    fn name(&self) -> &str {
        "function_metrics"
    }

    fn description(&self) -> &str {
        "Per-bucket invocation counts, error rates, latency percentiles and cold-start share \
         for one instrumented service."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": {"type": "string", "description": "Service name"},
                "hours": {"type": "integer", "description": "Lookback window in hours (default 1)"},
                "bucket_seconds": {"type": "integer", "description": "Bucket width in seconds (default 300)"}
            },
            "required": ["service"]
        })
    }

    fn display_type(&self) -> &str {
        "metrics_chart"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let service = args
            .get("service")
            .and_then(Value::as_str)
            .ok_or_else(|| super::ToolError::InvalidInput("service is required".into()))?;
        let hours = hours_arg(&args, 1);
        let bucket_seconds = args
            .get("bucket_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(300)
            .clamp(60, 86_400);

        let window = TimeWindow::last_hours(hours, bucket_seconds);
        let buckets = self.repo.query_function_metrics(service, window).await?;
        Ok(json!({
            "service": service,
            "window_hours": hours,
            "bucket_seconds": bucket_seconds,
            "buckets": buckets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::NullMetricsRepository;

    #[tokio::test]
    async fn test_query_metrics_requires_metric_name() {
        let tool = QueryMetricsTool::new(Arc::new(NullMetricsRepository));
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("metric_name"));
    }

    #[tokio::test]
    async fn test_query_metrics_empty_repo() {
        let tool = QueryMetricsTool::new(Arc::new(NullMetricsRepository));
        let result = tool
            .execute(json!({"metric_name": "cpu_percent", "hours": 2}))
            .await
            .unwrap();
        assert_eq!(result["metric"], "cpu_percent");
        assert_eq!(result["window_hours"], 2);
        assert_eq!(result["summary"]["count"], 0);
        assert!(result["samples"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hours_clamped() {
        let tool = ServiceSummaryTool::new(Arc::new(NullMetricsRepository));
        let result = tool.execute(json!({"hours": 9999})).await.unwrap();
        assert_eq!(result["window_hours"], 24 * 7);
    }

    #[tokio::test]
    async fn test_function_metrics_shape() {
        let tool = FunctionMetricsTool::new(Arc::new(NullMetricsRepository));
        let result = tool
            .execute(json!({"service": "checkout", "bucket_seconds": 60}))
            .await
            .unwrap();
        assert_eq!(result["service"], "checkout");
        assert_eq!(result["bucket_seconds"], 60);
    }
}
