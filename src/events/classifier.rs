// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pure threshold-based event classification.

use super::types::{Event, EventSeverity, EventType};
use tracing::debug;

/// A threshold rule mapping a numeric payload entry to a derived condition.
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    /// Key looked up in `event.data`
    pub metric: String,
    pub notable_threshold: f64,
    pub urgent_threshold: f64,
    /// Event type assigned when a threshold is crossed
    pub derived_type: EventType,
    /// Template with a `{value}` placeholder
    pub message_template: String,
}

/// Event types whose severity is intrinsic when the producer did not set one.
fn intrinsic_severity(event_type: EventType) -> Option<EventSeverity> {
    match event_type {
        EventType::ProcessCrashed | EventType::ProcessOomKilled | EventType::ErrorBurst => {
            Some(EventSeverity::Urgent)
        }
        EventType::NewErrorPattern | EventType::NewOpenPort => Some(EventSeverity::Notable),
        _ => None,
    }
}

/// Classifies raw collector events into severity-tagged conditions.
///
/// Pure: `classify` consumes and returns the event; it never touches shared
/// state. Pre-classified events (severity already above NORMAL) pass through
/// unmodified, and unknown event types are not an error.
pub struct EventClassifier {
    thresholds: Vec<ThresholdRule>,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventClassifier {
    /// Creates a classifier with the default system thresholds.
    pub fn new() -> Self {
        Self {
            thresholds: vec![
                ThresholdRule {
                    metric: "cpu_percent".to_string(),
                    notable_threshold: 80.0,
                    urgent_threshold: 95.0,
                    derived_type: EventType::CpuHigh,
                    message_template: "CPU usage at {value}%".to_string(),
                },
                ThresholdRule {
                    metric: "memory_percent".to_string(),
                    notable_threshold: 85.0,
                    urgent_threshold: 95.0,
                    derived_type: EventType::MemoryHigh,
                    message_template: "Memory usage at {value}%".to_string(),
                },
                ThresholdRule {
                    metric: "disk_percent".to_string(),
                    notable_threshold: 85.0,
                    urgent_threshold: 95.0,
                    derived_type: EventType::DiskHigh,
                    message_template: "Disk usage at {value}%".to_string(),
                },
            ],
        }
    }

    /// Registers an additional threshold rule.
    ///
    /// Rules added later win for the same metric key because the last
    /// crossing rewrite sticks.
    pub fn add_threshold(&mut self, rule: ThresholdRule) {
        self.thresholds.push(rule);
    }

    /// Applies threshold and intrinsic-severity rules to an event.
    pub fn classify(&self, mut event: Event) -> Event {
        // Producers that already judged severity keep their verdict.
        if event.severity > EventSeverity::Normal {
            return event;
        }

        if let Some(severity) = intrinsic_severity(event.event_type) {
            event.severity = severity;
            return event;
        }

        for rule in &self.thresholds {
            let Some(value) = event.data_f64(&rule.metric) else {
                continue;
            };

            let severity = if value >= rule.urgent_threshold {
                EventSeverity::Urgent
            } else if value >= rule.notable_threshold {
                EventSeverity::Notable
            } else {
                continue;
            };

            debug!(
                metric = %rule.metric,
                value,
                severity = %severity,
                "Threshold crossed"
            );
            event.severity = severity;
            event.event_type = rule.derived_type;
            event.message = rule
                .message_template
                .replace("{value}", &format!("{value:.1}"));
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventSource;
    use serde_json::json;

    fn metric_event(key: &str, value: f64) -> Event {
        Event::new(EventSource::SystemMetrics, EventType::MetricCollected)
            .with_field(key, json!(value))
    }

    #[test]
    fn test_normal_metric() {
        let classifier = EventClassifier::new();
        let result = classifier.classify(metric_event("cpu_percent", 30.0));
        assert_eq!(result.severity, EventSeverity::Normal);
        assert_eq!(result.event_type, EventType::MetricCollected);
    }

    #[test]
    fn test_notable_cpu() {
        let classifier = EventClassifier::new();
        let result = classifier.classify(metric_event("cpu_percent", 85.0));
        assert_eq!(result.severity, EventSeverity::Notable);
        assert_eq!(result.event_type, EventType::CpuHigh);
        assert!(result.message.contains("85.0"));
    }

    #[test]
    fn test_urgent_cpu() {
        let classifier = EventClassifier::new();
        let result = classifier.classify(metric_event("cpu_percent", 96.0));
        assert_eq!(result.severity, EventSeverity::Urgent);
        assert_eq!(result.event_type, EventType::CpuHigh);
    }

    #[test]
    fn test_memory_thresholds() {
        let classifier = EventClassifier::new();
        let result = classifier.classify(metric_event("memory_percent", 96.0));
        assert_eq!(result.severity, EventSeverity::Urgent);
        assert_eq!(result.event_type, EventType::MemoryHigh);
    }

    #[test]
    fn test_process_crashed_is_urgent() {
        let classifier = EventClassifier::new();
        let event = Event::new(EventSource::ProcessMonitor, EventType::ProcessCrashed);
        assert_eq!(classifier.classify(event).severity, EventSeverity::Urgent);
    }

    #[test]
    fn test_error_burst_is_urgent() {
        let classifier = EventClassifier::new();
        let event = Event::new(EventSource::LogWatcher, EventType::ErrorBurst);
        assert_eq!(classifier.classify(event).severity, EventSeverity::Urgent);
    }

    #[test]
    fn test_new_error_pattern_is_notable() {
        let classifier = EventClassifier::new();
        let event = Event::new(EventSource::LogWatcher, EventType::NewErrorPattern);
        assert_eq!(classifier.classify(event).severity, EventSeverity::Notable);
    }

    #[test]
    fn test_preserves_pre_classified() {
        let classifier = EventClassifier::new();
        let event = Event::new(EventSource::SystemMetrics, EventType::MetricCollected)
            .with_severity(EventSeverity::Urgent);
        let result = classifier.classify(event);
        assert_eq!(result.severity, EventSeverity::Urgent);
        assert_eq!(result.event_type, EventType::MetricCollected);
    }

    #[test]
    fn test_custom_threshold() {
        let mut classifier = EventClassifier::new();
        classifier.add_threshold(ThresholdRule {
            metric: "queue_depth".to_string(),
            notable_threshold: 50.0,
            urgent_threshold: 70.0,
            derived_type: EventType::AnomalyDetected,
            message_template: "Queue depth at {value}".to_string(),
        });

        let result = classifier.classify(metric_event("queue_depth", 55.0));
        assert_eq!(result.severity, EventSeverity::Notable);
        assert_eq!(result.event_type, EventType::AnomalyDetected);
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let classifier = EventClassifier::new();
        let event = Event::new(EventSource::Scheduler, EventType::HealthCheck)
            .with_message("All systems normal");
        let result = classifier.classify(event);
        assert_eq!(result.severity, EventSeverity::Normal);
        assert_eq!(result.message, "All systems normal");
    }
}
