// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Z-score anomaly detection against tracked baselines.

use super::tracker::BaselineTracker;
use crate::events::{Event, EventSeverity, EventSource, EventType};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Deviation threshold before a sample counts as anomalous.
const Z_THRESHOLD: f64 = 2.0;
/// Deviation threshold above which the anomaly is urgent.
const Z_URGENT_THRESHOLD: f64 = 4.0;

/// A detected deviation from baseline.
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub metric_name: String,
    pub value: f64,
    pub mean: f64,
    pub stddev: f64,
    pub z_score: f64,
    pub severity: EventSeverity,
}

impl Anomaly {
    /// Renders the anomaly as a pipeline event.
    pub fn into_event(self) -> Event {
        Event::new(EventSource::SystemMetrics, EventType::AnomalyDetected)
            .with_severity(self.severity)
            .with_message(format!(
                "{} deviates from baseline: {:.1} vs mean {:.1} (z={:.1})",
                self.metric_name, self.value, self.mean, self.z_score
            ))
            .with_field("metric", json!(self.metric_name))
            .with_field("value", json!(self.value))
            .with_field("mean", json!(self.mean))
            .with_field("stddev", json!(self.stddev))
            .with_field("z_score", json!(self.z_score))
    }
}

/// Compares current samples against the rolling baselines.
pub struct AnomalyDetector {
    tracker: Arc<BaselineTracker>,
}

impl AnomalyDetector {
    pub fn new(tracker: Arc<BaselineTracker>) -> Self {
        Self { tracker }
    }

    /// Checks one sample. Metrics without a baseline, or whose baseline has
    /// zero spread, never alarm.
    pub fn check(&self, metric_name: &str, value: f64) -> Option<Anomaly> {
        let baseline = self.tracker.get_baseline(metric_name)?;
        if baseline.stddev <= 0.0 {
            return None;
        }

        let z = (value - baseline.mean).abs() / baseline.stddev;
        if z <= Z_THRESHOLD {
            return None;
        }

        let severity = if z > Z_URGENT_THRESHOLD {
            EventSeverity::Urgent
        } else {
            EventSeverity::Notable
        };
        debug!(metric = metric_name, value, z, %severity, "Anomaly detected");

        Some(Anomaly {
            metric_name: metric_name.to_string(),
            value,
            mean: baseline.mean,
            stddev: baseline.stddev,
            z_score: z,
            severity,
        })
    }

    /// Checks a snapshot of current samples, yielding every anomaly.
    pub fn check_all_current(&self, metrics: &HashMap<String, f64>) -> Vec<Anomaly> {
        let mut anomalies: Vec<Anomaly> = metrics
            .iter()
            .filter_map(|(name, value)| self.check(name, *value))
            .collect();
        anomalies.sort_by(|a, b| b.z_score.partial_cmp(&a.z_score).unwrap_or(std::cmp::Ordering::Equal));
        anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::tracker::baseline;
    use crate::storage::testing::NullMetricsRepository;

    fn detector(rows: Vec<crate::storage::models::BaselineRow>) -> AnomalyDetector {
        let tracker = Arc::new(BaselineTracker::new(Arc::new(NullMetricsRepository)));
        tracker.set_baselines(rows);
        AnomalyDetector::new(tracker)
    }

    #[test]
    fn test_within_baseline_is_quiet() {
        let d = detector(vec![baseline("cpu_percent", 40.0, 10.0)]);
        assert!(d.check("cpu_percent", 45.0).is_none());
        // Exactly at the threshold is still quiet (z must exceed 2.0)
        assert!(d.check("cpu_percent", 60.0).is_none());
    }

    #[test]
    fn test_notable_anomaly() {
        let d = detector(vec![baseline("cpu_percent", 40.0, 10.0)]);
        let anomaly = d.check("cpu_percent", 75.0).unwrap();
        assert!((anomaly.z_score - 3.5).abs() < 1e-9);
        assert_eq!(anomaly.severity, EventSeverity::Notable);
    }

    #[test]
    fn test_urgent_anomaly_scales_with_z() {
        let d = detector(vec![baseline("cpu_percent", 40.0, 10.0)]);
        let anomaly = d.check("cpu_percent", 95.0).unwrap();
        assert!(anomaly.z_score > 4.0);
        assert_eq!(anomaly.severity, EventSeverity::Urgent);
    }

    #[test]
    fn test_negative_deviation_also_detected() {
        let d = detector(vec![baseline("request_rate", 100.0, 10.0)]);
        let anomaly = d.check("request_rate", 50.0).unwrap();
        assert_eq!(anomaly.z_score, 5.0);
    }

    #[test]
    fn test_zero_stddev_never_alarms() {
        let d = detector(vec![baseline("constant_metric", 1.0, 0.0)]);
        assert!(d.check("constant_metric", 1_000_000.0).is_none());
    }

    #[test]
    fn test_unknown_metric_never_alarms() {
        let d = detector(vec![]);
        assert!(d.check("mystery", 999.0).is_none());
    }

    #[test]
    fn test_check_all_current_sorted_by_z() {
        let d = detector(vec![
            baseline("cpu_percent", 40.0, 10.0),
            baseline("memory_percent", 50.0, 5.0),
            baseline("disk_percent", 60.0, 20.0),
        ]);
        let metrics = HashMap::from([
            ("cpu_percent".to_string(), 75.0),    // z = 3.5
            ("memory_percent".to_string(), 90.0), // z = 8.0
            ("disk_percent".to_string(), 65.0),   // z = 0.25, quiet
        ]);

        let anomalies = d.check_all_current(&metrics);
        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].metric_name, "memory_percent");
        assert_eq!(anomalies[1].metric_name, "cpu_percent");
    }

    #[test]
    fn test_anomaly_event_shape() {
        let d = detector(vec![baseline("cpu_percent", 40.0, 10.0)]);
        let event = d.check("cpu_percent", 95.0).unwrap().into_event();
        assert_eq!(event.event_type, EventType::AnomalyDetected);
        assert_eq!(event.severity, EventSeverity::Urgent);
        assert_eq!(event.data_str("metric"), Some("cpu_percent"));
        assert!(event.message.contains("deviates from baseline"));
    }
}
