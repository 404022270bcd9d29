// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Alert management tool: list, acknowledge, mute, resolve.

use super::{Tool, ToolError, ToolResult};
use crate::alerting::AlertEngine;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

/// Exposes alert engine operations to the agent.
pub struct AlertManagementTool {
    engine: Arc<AlertEngine>,
}

impl AlertManagementTool {
    pub fn new(engine: Arc<AlertEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for AlertManagementTool {
    fn name(&self) -> &str {
        "manage_alerts"
    }

    fn description(&self) -> &str {
        "Inspect and manage alerts. Operations: 'list' (optionally include_resolved), \
         'acknowledge' (alert_id, optional expires_hours), 'unacknowledge' (alert_id), \
         'mute' (rule_id, expires_hours), 'unmute' (rule_id), 'resolve' (alert_id), 'rules'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["list", "acknowledge", "unacknowledge", "mute", "unmute", "resolve", "rules"]
                },
                "alert_id": {"type": "string"},
                "rule_id": {"type": "string"},
                "expires_hours": {"type": "integer", "description": "Suppression lifetime in hours"},
                "include_resolved": {"type": "boolean"}
            },
            "required": ["operation"]
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let operation = args
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("operation is required".into()))?;

        let alert_id = args.get("alert_id").and_then(Value::as_str);
        let rule_id = args.get("rule_id").and_then(Value::as_str);
        let expires_hours = args.get("expires_hours").and_then(Value::as_i64);

        match operation {
            "list" => {
                let include_resolved = args
                    .get("include_resolved")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let alerts = self.engine.get_active_alerts(include_resolved);
                Ok(json!({"count": alerts.len(), "alerts": alerts}))
            }
            "acknowledge" => {
                let alert_id = alert_id
                    .ok_or_else(|| ToolError::InvalidInput("alert_id is required".into()))?;
                let expires_at = expires_hours.map(|h| Utc::now() + Duration::hours(h));
                if self.engine.acknowledge(alert_id, "agent", expires_at).await {
                    Ok(json!({"acknowledged": alert_id}))
                } else {
                    Err(ToolError::NotFound(format!("alert {alert_id}")))
                }
            }
            "unacknowledge" => {
                let alert_id = alert_id
                    .ok_or_else(|| ToolError::InvalidInput("alert_id is required".into()))?;
                if self.engine.unacknowledge(alert_id).await {
                    Ok(json!({"unacknowledged": alert_id}))
                } else {
                    Err(ToolError::NotFound(format!("alert {alert_id}")))
                }
            }
            "mute" => {
                let rule_id =
                    rule_id.ok_or_else(|| ToolError::InvalidInput("rule_id is required".into()))?;
                let hours = expires_hours.unwrap_or(1);
                let expires_at = Utc::now() + Duration::hours(hours);
                if self.engine.mute(rule_id, "agent", expires_at).await {
                    Ok(json!({"muted": rule_id, "expires_hours": hours}))
                } else {
                    Err(ToolError::NotFound(format!("rule {rule_id}")))
                }
            }
            "unmute" => {
                let rule_id =
                    rule_id.ok_or_else(|| ToolError::InvalidInput("rule_id is required".into()))?;
                if self.engine.unmute(rule_id).await {
                    Ok(json!({"unmuted": rule_id}))
                } else {
                    Err(ToolError::NotFound(format!("mute for rule {rule_id}")))
                }
            }
            "resolve" => {
                let alert_id = alert_id
                    .ok_or_else(|| ToolError::InvalidInput("alert_id is required".into()))?;
                if self.engine.resolve(alert_id).await {
                    Ok(json!({"resolved": alert_id}))
                } else {
                    Err(ToolError::NotFound(format!("alert {alert_id}")))
                }
            }
            "rules" => {
                let rules: Vec<Value> = self
                    .engine
                    .get_rules()
                    .into_iter()
                    .map(|r| {
                        json!({
                            "id": r.id,
                            "name": r.name,
                            "min_severity": r.min_severity.to_string(),
                            "cooldown_seconds": r.cooldown_seconds,
                            "auto_investigate": r.auto_investigate,
                        })
                    })
                    .collect();
                Ok(json!({"rules": rules}))
            }
            other => Err(ToolError::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{default_rules, AlertFormatter};
    use crate::events::EventSeverity;
    use crate::storage::testing::MemoryOperationalRepository;

    fn tool() -> AlertManagementTool {
        let formatter = Arc::new(AlertFormatter::new(
            vec![],
            std::time::Duration::from_secs(90),
            EventSeverity::Notable,
            false,
        ));
        let engine = Arc::new(AlertEngine::new(
            default_rules(),
            formatter,
            Arc::new(MemoryOperationalRepository::new()),
        ));
        AlertManagementTool::new(engine)
    }

    #[tokio::test]
    async fn test_list_empty() {
        let result = tool().execute(json!({"operation": "list"})).await.unwrap();
        assert_eq!(result["count"], 0);
    }

    #[tokio::test]
    async fn test_rules_listing() {
        let result = tool().execute(json!({"operation": "rules"})).await.unwrap();
        let rules = result["rules"].as_array().unwrap();
        assert!(rules.iter().any(|r| r["id"] == "cpu_critical"));
    }

    #[tokio::test]
    async fn test_mute_and_unmute() {
        let tool = tool();
        let result = tool
            .execute(json!({"operation": "mute", "rule_id": "anomaly", "expires_hours": 2}))
            .await
            .unwrap();
        assert_eq!(result["muted"], "anomaly");

        let result = tool
            .execute(json!({"operation": "unmute", "rule_id": "anomaly"}))
            .await
            .unwrap();
        assert_eq!(result["unmuted"], "anomaly");
    }

    #[tokio::test]
    async fn test_unknown_alert_is_not_found() {
        let err = tool()
            .execute(json!({"operation": "resolve", "alert_id": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let err = tool()
            .execute(json!({"operation": "explode"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
