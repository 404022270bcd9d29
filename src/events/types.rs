// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core event types flowing through the pipeline.
//!
//! Every collector produces [`Event`] records. The classifier may rewrite
//! `event_type` and `severity` before the event reaches the bus; after that
//! the record is treated as immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity tier assigned by a producer or the classifier.
///
/// Ordering matters: rules match on `severity >= min_severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Normal,
    Notable,
    Urgent,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "NORMAL"),
            EventSeverity::Notable => write!(f, "NOTABLE"),
            EventSeverity::Urgent => write!(f, "URGENT"),
        }
    }
}

impl std::str::FromStr for EventSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NORMAL" => Ok(EventSeverity::Normal),
            "NOTABLE" => Ok(EventSeverity::Notable),
            "URGENT" => Ok(EventSeverity::Urgent),
            _ => Err(format!("Unknown severity: {s}")),
        }
    }
}

/// Identifies the producer of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    SystemMetrics,
    ProcessMonitor,
    LogWatcher,
    SecurityScanner,
    SdkTelemetry,
    Scheduler,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventSource::SystemMetrics => "system_metrics",
            EventSource::ProcessMonitor => "process_monitor",
            EventSource::LogWatcher => "log_watcher",
            EventSource::SecurityScanner => "security_scanner",
            EventSource::SdkTelemetry => "sdk_telemetry",
            EventSource::Scheduler => "scheduler",
        };
        write!(f, "{s}")
    }
}

/// Enumerated event kinds.
///
/// Collectors emit the raw kinds (`metric_collected`, `log_line`); the
/// classifier derives the condition kinds (`cpu_high`, ...) from thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Raw collector output
    MetricCollected,
    LogLine,
    SpanReceived,
    // Derived system conditions
    CpuHigh,
    MemoryHigh,
    DiskHigh,
    // Process lifecycle
    ProcessCrashed,
    ProcessOomKilled,
    ProcessRestartLoop,
    // Log analysis
    ErrorBurst,
    NewErrorPattern,
    // Security
    BruteForce,
    SuspiciousProcess,
    SuspiciousOutbound,
    NewExecutable,
    NewOpenPort,
    PermissionRisk,
    // Baseline
    AnomalyDetected,
    // Scheduler
    HealthCheck,
    TrendAnalysis,
    // SDK telemetry conditions
    SdkErrorSpike,
    SdkLatencyDegradation,
    SdkColdStartSpike,
    SdkServiceSilent,
    SdkTrafficBurst,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // serde snake_case rename is the canonical wire form
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        write!(f, "{s}")
    }
}

/// A uniformly typed telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: String,
    /// Producer that created this event
    pub source: EventSource,
    /// Event kind (may be rewritten by the classifier)
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Severity tier (may be raised by the classifier)
    pub severity: EventSeverity,
    /// Human-oriented description
    pub message: String,
    /// Structured payload (metric values, service names, ...)
    pub data: Map<String, Value>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Ambient tenant this event belongs to
    pub tenant_id: String,
}

impl Event {
    /// Creates a NORMAL-severity event with an empty payload.
    pub fn new(source: EventSource, event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            event_type,
            severity: EventSeverity::Normal,
            message: String::new(),
            data: Map::new(),
            timestamp: Utc::now(),
            tenant_id: crate::tenancy::current_tenant(),
        }
    }

    /// Builder-style message setter.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Builder-style severity setter.
    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Builder-style payload setter.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Inserts a single payload entry.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Reads a numeric payload entry, accepting both integer and float JSON.
    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Reads a string payload entry.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Urgent > EventSeverity::Notable);
        assert!(EventSeverity::Notable > EventSeverity::Normal);
    }

    #[test]
    fn test_severity_roundtrip() {
        assert_eq!(
            "URGENT".parse::<EventSeverity>().unwrap(),
            EventSeverity::Urgent
        );
        assert_eq!(
            "notable".parse::<EventSeverity>().unwrap(),
            EventSeverity::Notable
        );
        assert_eq!(EventSeverity::Normal.to_string(), "NORMAL");
        assert!("bogus".parse::<EventSeverity>().is_err());
    }

    #[test]
    fn test_event_type_wire_form() {
        let json = serde_json::to_string(&EventType::SdkErrorSpike).unwrap();
        assert_eq!(json, "\"sdk_error_spike\"");
        assert_eq!(EventType::CpuHigh.to_string(), "cpu_high");
    }

    #[test]
    fn test_event_builder() {
        let event = Event::new(EventSource::SystemMetrics, EventType::MetricCollected)
            .with_message("cpu sample")
            .with_field("cpu_percent", json!(42.5));

        assert_eq!(event.severity, EventSeverity::Normal);
        assert_eq!(event.data_f64("cpu_percent"), Some(42.5));
        assert_eq!(event.data_f64("missing"), None);
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_event_serialization_uses_type_key() {
        let event = Event::new(EventSource::Scheduler, EventType::HealthCheck);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "health_check");
        assert_eq!(value["source"], "scheduler");
        assert_eq!(value["severity"], "NORMAL");
    }

    #[test]
    fn test_data_f64_accepts_integers() {
        let event = Event::new(EventSource::SystemMetrics, EventType::MetricCollected)
            .with_field("count", json!(7));
        assert_eq!(event.data_f64("count"), Some(7.0));
    }
}
