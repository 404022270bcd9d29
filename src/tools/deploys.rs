// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deploy history and dependency map tools.

use super::{Tool, ToolResult};
use crate::storage::MetricsRepository;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

/// Recent deploy markers, newest first.
pub struct DeployHistoryTool {
    repo: Arc<dyn MetricsRepository>,
}

impl DeployHistoryTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for DeployHistoryTool {
    fn name(&self) -> &str {
        "deploy_history"
    }

    fn description(&self) -> &str {
        "List recent deploys (version, git sha, environment, previous version). Correlate \
         incidents with what shipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": {"type": "string", "description": "Filter by service"},
                "limit": {"type": "integer", "description": "Max deploys (default 10)"}
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let service = args.get("service").and_then(Value::as_str);
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10).min(100) as usize;
        let deploys = self.repo.query_deploy_history(service, limit).await?;
        Ok(json!({"deploys": deploys}))
    }
}

/// Dependency health for one service or the whole map.
pub struct DependencyTool {
    repo: Arc<dyn MetricsRepository>,
}

impl DependencyTool {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for DependencyTool {
    fn name(&self) -> &str {
        "dependencies"
    }

    fn description(&self) -> &str {
        "Dependency calls: per-target health for one service, or the service → dependency \
         edge map across all services when no service is given."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": {"type": "string", "description": "Service to inspect"},
                "hours": {"type": "integer", "description": "Lookback window in hours (default 24)"}
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let hours = args
            .get("hours")
            .and_then(Value::as_i64)
            .unwrap_or(24)
            .clamp(1, 24 * 7);
        let since = Utc::now() - Duration::hours(hours);

        match args.get("service").and_then(Value::as_str) {
            Some(service) => {
                let targets = self.repo.query_dependency_summary(service, since).await?;
                Ok(json!({"service": service, "targets": targets}))
            }
            None => {
                let edges = self.repo.query_dependency_map(since).await?;
                Ok(json!({"edges": edges}))
            }
        }
    }
}
