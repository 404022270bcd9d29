// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host metric sampling: CPU, memory, disk, load.

use super::Collector;
use crate::baseline::AnomalyDetector;
use crate::events::{Event, EventBus, EventClassifier, EventSource, EventType};
use crate::storage::models::MetricRow;
use crate::storage::MetricsRepository;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::sync::Mutex;
use tracing::warn;

/// Samples host metrics and publishes one classified event per pass.
pub struct SystemMetricsCollector {
    bus: Arc<EventBus>,
    classifier: Arc<EventClassifier>,
    repo: Arc<dyn MetricsRepository>,
    detector: Option<Arc<AnomalyDetector>>,
    interval: Duration,
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl SystemMetricsCollector {
    pub fn new(
        bus: Arc<EventBus>,
        classifier: Arc<EventClassifier>,
        repo: Arc<dyn MetricsRepository>,
        detector: Option<Arc<AnomalyDetector>>,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            classifier,
            repo,
            detector,
            interval,
            system: Mutex::new(System::new()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }

    /// One full sample of the host.
    async fn sample(&self) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();

        {
            let mut system = self.system.lock().await;
            system.refresh_cpu_usage();
            system.refresh_memory();

            metrics.insert("cpu_percent".to_string(), system.global_cpu_usage() as f64);

            let total = system.total_memory() as f64;
            if total > 0.0 {
                let used = system.used_memory() as f64;
                metrics.insert("memory_percent".to_string(), used / total * 100.0);
                metrics.insert("memory_used_bytes".to_string(), used);
            }
        }

        {
            let mut disks = self.disks.lock().await;
            disks.refresh(false);
            // Root filesystem is the headline number
            let root = disks
                .list()
                .iter()
                .find(|d| d.mount_point() == std::path::Path::new("/"))
                .or_else(|| disks.list().first());
            if let Some(disk) = root {
                let total = disk.total_space() as f64;
                if total > 0.0 {
                    let used = total - disk.available_space() as f64;
                    metrics.insert("disk_percent".to_string(), used / total * 100.0);
                }
            }
        }

        let load = System::load_average();
        metrics.insert("load_1m".to_string(), load.one);
        metrics.insert("load_5m".to_string(), load.five);

        metrics
    }
}

#[async_trait]
impl Collector for SystemMetricsCollector {
    fn name(&self) -> &'static str {
        "system_metrics"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        let metrics = self.sample().await;

        // Store best-effort
        let rows: Vec<MetricRow> = metrics
            .iter()
            .map(|(name, value)| MetricRow::new(name.clone(), *value))
            .collect();
        if let Err(e) = self.repo.insert_metrics_batch(rows).await {
            warn!(error = %e, "Metric batch write failed");
        }

        // Publish one classified event carrying the sample
        let mut event = Event::new(EventSource::SystemMetrics, EventType::MetricCollected);
        for (name, value) in &metrics {
            event = event.with_field(name.clone(), json!(value));
        }
        self.bus.publish(self.classifier.classify(event));

        // Z-score check of the current snapshot
        if let Some(detector) = &self.detector {
            for anomaly in detector.check_all_current(&metrics) {
                self.bus.publish(anomaly.into_event());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSeverity, SubscribeFilter};
    use crate::storage::testing::NullMetricsRepository;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn test_tick_publishes_classified_sample() {
        let bus = Arc::new(EventBus::new());
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();
        bus.subscribe("test", SubscribeFilter::all(), move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.push(event);
            })
        });

        let collector = SystemMetricsCollector::new(
            bus.clone(),
            Arc::new(EventClassifier::new()),
            Arc::new(NullMetricsRepository),
            None,
            Duration::from_secs(15),
        );
        collector.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = received.lock().await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.source, EventSource::SystemMetrics);
        assert!(event.data_f64("cpu_percent").is_some());
        assert!(event.data_f64("load_1m").is_some());
    }

    #[tokio::test]
    async fn test_anomalous_sample_emits_anomaly_event() {
        use crate::baseline::tracker::{baseline, BaselineTracker};

        let bus = Arc::new(EventBus::new());
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();
        bus.subscribe(
            "anomalies",
            SubscribeFilter::severities([EventSeverity::Notable, EventSeverity::Urgent]),
            move |event| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event);
                })
            },
        );

        // A baseline that makes any real load_1m reading look wild
        let tracker = Arc::new(BaselineTracker::new(Arc::new(NullMetricsRepository)));
        tracker.set_baselines(vec![baseline("load_1m", -1_000_000.0, 0.001)]);
        let detector = Arc::new(AnomalyDetector::new(tracker));

        let collector = SystemMetricsCollector::new(
            bus.clone(),
            Arc::new(EventClassifier::new()),
            Arc::new(NullMetricsRepository),
            Some(detector),
            Duration::from_secs(15),
        );
        collector.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = received.lock().await;
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::AnomalyDetected));
    }
}
