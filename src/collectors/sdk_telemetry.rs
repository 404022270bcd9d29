// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Derived service conditions from stored SDK telemetry.
//!
//! Each pass compares a recent window against a longer reference window per
//! service and raises the SDK condition events: error spikes, latency
//! degradation, cold-start spikes, silent services, and traffic bursts.
//! Conditions re-arm only after the service recovers, so a sustained
//! degradation produces one event, not one per pass.

use super::Collector;
use crate::events::{Event, EventBus, EventClassifier, EventSeverity, EventSource, EventType};
use crate::storage::models::ServiceSummary;
use crate::storage::{MetricsRepository, TimeWindow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Recent comparison window.
const RECENT_MINUTES: i64 = 10;
/// Reference window.
const REFERENCE_HOURS: i64 = 24;
/// A service is silent after this long without telemetry.
const SILENCE_MINUTES: i64 = 15;
/// Error-rate floor before a spike can fire (percent).
const ERROR_RATE_FLOOR: f64 = 5.0;
/// Relative increase treated as a spike/degradation.
const SPIKE_FACTOR: f64 = 2.0;
/// Cold-start share treated as a spike (percent).
const COLD_START_FLOOR: f64 = 30.0;
/// Traffic above this multiple of the reference rate is a burst.
const TRAFFIC_BURST_FACTOR: f64 = 3.0;

#[derive(Default)]
struct MonitorState {
    /// Conditions currently latched, keyed "condition:service"
    latched: HashSet<String>,
    /// Services that have reported at least once
    known_services: HashSet<String>,
}

/// Sweeps SDK telemetry and derives per-service condition events.
pub struct SdkTelemetryMonitor {
    bus: Arc<EventBus>,
    classifier: Arc<EventClassifier>,
    repo: Arc<dyn MetricsRepository>,
    interval: Duration,
    state: Mutex<MonitorState>,
}

impl SdkTelemetryMonitor {
    pub fn new(
        bus: Arc<EventBus>,
        classifier: Arc<EventClassifier>,
        repo: Arc<dyn MetricsRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            classifier,
            repo,
            interval,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Fires `event` once per condition; re-arms when `active` goes false.
    fn latch(state: &mut MonitorState, key: String, active: bool, event: impl FnOnce() -> Event) -> Option<Event> {
        if active {
            if state.latched.insert(key) {
                return Some(event());
            }
        } else {
            state.latched.remove(&key);
        }
        None
    }

    fn compare_windows(
        state: &mut MonitorState,
        recent: &ServiceSummary,
        reference: Option<&ServiceSummary>,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        let service = recent.service.clone();

        if let Some(reference) = reference {
            // Error-rate spike
            let spiking = recent.error_rate >= ERROR_RATE_FLOOR
                && recent.error_rate > reference.error_rate * SPIKE_FACTOR;
            if let Some(event) = Self::latch(
                state,
                format!("error_spike:{service}"),
                spiking,
                || {
                    Event::new(EventSource::SdkTelemetry, EventType::SdkErrorSpike)
                        .with_severity(EventSeverity::Urgent)
                        .with_field("service", json!(service))
                        .with_field("error_rate", json!(recent.error_rate))
                        .with_field("previous_error_rate", json!(reference.error_rate))
                },
            ) {
                events.push(event);
            }

            // Latency degradation
            let degraded = recent.p95_ms > 0.0
                && reference.p95_ms > 0.0
                && recent.p95_ms > reference.p95_ms * SPIKE_FACTOR;
            if let Some(event) = Self::latch(
                state,
                format!("latency:{service}"),
                degraded,
                || {
                    Event::new(EventSource::SdkTelemetry, EventType::SdkLatencyDegradation)
                        .with_severity(EventSeverity::Notable)
                        .with_field("service", json!(service))
                        .with_field("p95_ms", json!(recent.p95_ms))
                        .with_field("previous_p95_ms", json!(reference.p95_ms))
                },
            ) {
                events.push(event);
            }

            // Traffic burst: compare rates, not counts (windows differ)
            let recent_rate = recent.invocation_count as f64 / (RECENT_MINUTES as f64);
            let reference_rate =
                reference.invocation_count as f64 / (REFERENCE_HOURS as f64 * 60.0);
            let bursting = reference.invocation_count >= 100
                && recent_rate > reference_rate * TRAFFIC_BURST_FACTOR;
            if let Some(event) = Self::latch(
                state,
                format!("traffic:{service}"),
                bursting,
                || {
                    Event::new(EventSource::SdkTelemetry, EventType::SdkTrafficBurst)
                        .with_severity(EventSeverity::Notable)
                        .with_field("service", json!(service))
                        .with_field("request_count", json!(recent.invocation_count))
                        .with_field("baseline_mean", json!(reference_rate * RECENT_MINUTES as f64))
                },
            ) {
                events.push(event);
            }
        }

        events
    }
}

#[async_trait]
impl Collector for SdkTelemetryMonitor {
    fn name(&self) -> &'static str {
        "sdk_telemetry"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        let now = Utc::now();
        let recent_since = now - ChronoDuration::minutes(RECENT_MINUTES);
        let reference_since = now - ChronoDuration::hours(REFERENCE_HOURS);

        let recent = match self.repo.query_service_summary(recent_since).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "SDK telemetry sweep failed");
                return;
            }
        };
        let reference = match self.repo.query_service_summary(reference_since).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "SDK reference query failed");
                return;
            }
        };
        let reference_by_service: HashMap<&str, &ServiceSummary> = reference
            .iter()
            .map(|summary| (summary.service.as_str(), summary))
            .collect();

        // Cold-start share comes from the bucketed function metrics
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;

            for summary in &recent {
                state.known_services.insert(summary.service.clone());
                // A reporting service is by definition not silent
                state.latched.remove(&format!("silent:{}", summary.service));

                events.extend(Self::compare_windows(
                    &mut state,
                    summary,
                    reference_by_service.get(summary.service.as_str()).copied(),
                ));
            }

            // Known services absent from the recent window have gone quiet
            let silent_cutoff = now - ChronoDuration::minutes(SILENCE_MINUTES);
            for reference_summary in &reference {
                let service = &reference_summary.service;
                if recent.iter().any(|s| &s.service == service) {
                    continue;
                }
                let silent = state.known_services.contains(service)
                    && reference_summary.last_seen < silent_cutoff;
                if let Some(event) = Self::latch(
                    &mut state,
                    format!("silent:{service}"),
                    silent,
                    || {
                        Event::new(EventSource::SdkTelemetry, EventType::SdkServiceSilent)
                            .with_severity(EventSeverity::Notable)
                            .with_field("service", json!(service))
                    },
                ) {
                    events.push(event);
                }
            }
        }

        // Cold starts per recently active service
        for summary in &recent {
            let window = TimeWindow {
                since: recent_since,
                until: now,
                bucket_seconds: (RECENT_MINUTES * 60) as u64,
            };
            let buckets = match self.repo.query_function_metrics(&summary.service, window).await {
                Ok(buckets) => buckets,
                Err(e) => {
                    debug!(error = %e, service = %summary.service, "Cold-start query failed");
                    continue;
                }
            };
            let Some(bucket) = buckets.last() else { continue };

            let mut state = self.state.lock().await;
            let spiking =
                bucket.invocation_count >= 10 && bucket.cold_start_pct >= COLD_START_FLOOR;
            let cold_start_pct = bucket.cold_start_pct;
            if let Some(event) = Self::latch(
                &mut state,
                format!("cold_start:{}", summary.service),
                spiking,
                || {
                    Event::new(EventSource::SdkTelemetry, EventType::SdkColdStartSpike)
                        .with_severity(EventSeverity::Notable)
                        .with_field("service", json!(summary.service))
                        .with_field("cold_start_pct", json!(cold_start_pct))
                },
            ) {
                events.push(event);
            }
        }

        for event in events {
            let mut event = event;
            if event.message.is_empty() {
                event.message = crate::alerting::format_event(&event);
            }
            self.bus.publish(self.classifier.classify(event));
        }
    }
}
