// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recent-event inspection tool backed by the bus ring buffer.

use super::{Tool, ToolResult};
use crate::events::{EventBus, EventSeverity};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Reads the most recent events retained by the bus.
pub struct RecentEventsTool {
    bus: Arc<EventBus>,
}

impl RecentEventsTool {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for RecentEventsTool {
    fn name(&self) -> &str {
        "recent_events"
    }

    fn description(&self) -> &str {
        "List the most recent pipeline events (metric samples, security findings, health \
         checks, anomalies), newest last. Optionally filter by minimum severity."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "description": "Max events to return (default 50)"},
                "min_severity": {
                    "type": "string",
                    "enum": ["NORMAL", "NOTABLE", "URGENT"],
                    "description": "Only events at or above this severity"
                }
            }
        })
    }

    fn display_type(&self) -> &str {
        "table"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(50).min(500) as usize;
        let min_severity = args
            .get("min_severity")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<EventSeverity>().ok())
            .unwrap_or(EventSeverity::Normal);

        let events: Vec<Value> = self
            .bus
            .recent_events(usize::MAX)
            .into_iter()
            .filter(|e| e.severity >= min_severity)
            .map(|e| {
                json!({
                    "type": e.event_type,
                    "source": e.source,
                    "severity": e.severity,
                    "message": e.message,
                    "timestamp": e.timestamp,
                })
            })
            .collect();
        let skip = events.len().saturating_sub(limit);

        Ok(json!({
            "count": events.len().min(limit),
            "events": events[skip..].to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventSource, EventType};

    fn bus_with_events() -> Arc<EventBus> {
        let bus = Arc::new(EventBus::new());
        bus.publish(Event::new(EventSource::Scheduler, EventType::HealthCheck).with_message("ok"));
        bus.publish(
            Event::new(EventSource::SystemMetrics, EventType::CpuHigh)
                .with_severity(EventSeverity::Urgent)
                .with_message("CPU usage at 98.0%"),
        );
        bus
    }

    #[tokio::test]
    async fn test_lists_newest_last() {
        let tool = RecentEventsTool::new(bus_with_events());
        let result = tool.execute(json!({})).await.unwrap();
        assert_eq!(result["count"], 2);
        let events = result["events"].as_array().unwrap();
        assert_eq!(events[1]["type"], "cpu_high");
    }

    #[tokio::test]
    async fn test_severity_filter() {
        let tool = RecentEventsTool::new(bus_with_events());
        let result = tool
            .execute(json!({"min_severity": "URGENT"}))
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["events"][0]["severity"], "URGENT");
    }

    #[tokio::test]
    async fn test_limit_keeps_newest() {
        let bus = Arc::new(EventBus::new());
        for i in 0..10 {
            bus.publish(
                Event::new(EventSource::Scheduler, EventType::HealthCheck)
                    .with_message(format!("tick {i}")),
            );
        }
        let tool = RecentEventsTool::new(bus);
        let result = tool.execute(json!({"limit": 3})).await.unwrap();
        let events = result["events"].as_array().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2]["message"], "tick 9");
    }
}
