// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Smart alert engine: rule evaluation, dedup cooldown, and suppression.
//!
//! Subscribes to NOTABLE+ events on the bus. A fired alert is recorded,
//! persisted best-effort, routed to the formatter, and, for urgent
//! auto-investigate rules, queued for AI investigation. Acknowledged dedup
//! keys and muted rules suppress firing; both expire lazily on every check.

use super::formatter::AlertFormatter;
use crate::agent::{
    EnqueueStatus, InvestigationEnqueuer, InvestigationPriority, InvestigationRequest,
};
use crate::events::{Event, EventBus, EventSeverity, EventType, SubscribeFilter};
use crate::storage::models::{AcknowledgmentRow, AlertHistoryRow, RuleMuteRow};
use crate::storage::OperationalRepository;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Longest a rule may be muted.
pub const MAX_MUTE_HOURS: i64 = 168;

/// A rule that determines when an alert should fire.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub event_types: Vec<EventType>,
    pub min_severity: EventSeverity,
    pub cooldown_seconds: u64,
    pub auto_investigate: bool,
}

impl AlertRule {
    fn matches(&self, event: &Event) -> bool {
        self.event_types.contains(&event.event_type) && event.severity >= self.min_severity
    }
}

/// The built-in rule set.
pub fn default_rules() -> Vec<AlertRule> {
    let rule = |id: &str,
                name: &str,
                event_types: Vec<EventType>,
                min_severity: EventSeverity,
                cooldown_seconds: u64,
                auto_investigate: bool| AlertRule {
        id: id.to_string(),
        name: name.to_string(),
        event_types,
        min_severity,
        cooldown_seconds,
        auto_investigate,
    };

    vec![
        rule("cpu_critical", "CPU Critical", vec![EventType::CpuHigh], EventSeverity::Urgent, 300, true),
        rule("memory_critical", "Memory Critical", vec![EventType::MemoryHigh], EventSeverity::Urgent, 300, true),
        rule("disk_critical", "Disk Critical", vec![EventType::DiskHigh], EventSeverity::Urgent, 300, true),
        rule(
            "process_crash",
            "Process Crash",
            vec![EventType::ProcessCrashed, EventType::ProcessOomKilled],
            EventSeverity::Urgent,
            300,
            true,
        ),
        rule("error_burst", "Error Burst", vec![EventType::ErrorBurst], EventSeverity::Urgent, 300, true),
        rule(
            "security_event",
            "Security Event",
            vec![
                EventType::BruteForce,
                EventType::SuspiciousProcess,
                EventType::NewExecutable,
                EventType::SuspiciousOutbound,
            ],
            EventSeverity::Notable,
            300,
            true,
        ),
        rule("anomaly", "Anomaly Detected", vec![EventType::AnomalyDetected], EventSeverity::Notable, 600, false),
        rule("sdk_error_spike", "SDK Error Rate Spike", vec![EventType::SdkErrorSpike], EventSeverity::Urgent, 300, true),
        rule("sdk_latency", "SDK Latency Degradation", vec![EventType::SdkLatencyDegradation], EventSeverity::Notable, 600, false),
        rule("sdk_cold_start", "SDK Cold Start Spike", vec![EventType::SdkColdStartSpike], EventSeverity::Notable, 600, false),
        rule("sdk_service_silent", "SDK Service Silent", vec![EventType::SdkServiceSilent], EventSeverity::Notable, 1800, false),
        rule("sdk_traffic_burst", "SDK Traffic Burst", vec![EventType::SdkTrafficBurst], EventSeverity::Notable, 600, true),
    ]
}

/// An alert that has been triggered.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActiveAlert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub event: Event,
    pub severity: EventSeverity,
    pub dedup_key: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_expires_at: Option<DateTime<Utc>>,
}

/// Mutable engine bookkeeping behind one lock.
#[derive(Default)]
struct EngineState {
    active: Vec<ActiveAlert>,
    last_fired: HashMap<String, DateTime<Utc>>,
    /// dedup_key → optional expiry (None = permanent)
    acknowledged: HashMap<String, Option<DateTime<Utc>>>,
    /// rule_id → expiry (always bounded)
    muted: HashMap<String, DateTime<Utc>>,
}

/// Subscribes to the bus and fires alerts based on rules.
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    state: Mutex<EngineState>,
    formatter: Arc<AlertFormatter>,
    repo: Arc<dyn OperationalRepository>,
    enqueuer: Mutex<Option<Arc<dyn InvestigationEnqueuer>>>,
}

impl AlertEngine {
    pub fn new(
        rules: Vec<AlertRule>,
        formatter: Arc<AlertFormatter>,
        repo: Arc<dyn OperationalRepository>,
    ) -> Self {
        Self {
            rules,
            state: Mutex::new(EngineState::default()),
            formatter,
            repo,
            enqueuer: Mutex::new(None),
        }
    }

    /// Wires the investigation queue (late-bound to break the ownership cycle).
    pub fn set_investigator(&self, enqueuer: Arc<dyn InvestigationEnqueuer>) {
        *self.enqueuer.lock().unwrap_or_else(|p| p.into_inner()) = Some(enqueuer);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Loads persisted suppressions, then subscribes to NOTABLE+ events.
    pub async fn start(self: &Arc<Self>, bus: &EventBus) {
        self.load_suppressions().await;

        let this = self.clone();
        bus.subscribe(
            "alert_engine",
            SubscribeFilter::severities([EventSeverity::Notable, EventSeverity::Urgent]),
            move |event| {
                let this = this.clone();
                Box::pin(async move {
                    this.handle_event(event).await;
                })
            },
        );
        info!(rules = self.rules.len(), "Alert engine started");
    }

    async fn load_suppressions(&self) {
        match self.repo.active_acknowledgments().await {
            Ok(acks) => {
                let mut state = self.lock();
                for ack in &acks {
                    state.acknowledged.insert(ack.dedup_key.clone(), ack.expires_at);
                }
                info!(count = acks.len(), "Loaded acknowledgments");
            }
            Err(e) => error!(error = %e, "Failed to load acknowledgments"),
        }
        match self.repo.active_rule_mutes().await {
            Ok(mutes) => {
                let mut state = self.lock();
                for mute in &mutes {
                    state.muted.insert(mute.rule_id.clone(), mute.expires_at);
                }
                info!(count = mutes.len(), "Loaded rule mutes");
            }
            Err(e) => error!(error = %e, "Failed to load rule mutes"),
        }
    }

    /// Evaluates all rules against one incoming event.
    pub async fn handle_event(&self, event: Event) {
        let now = Utc::now();

        for rule in &self.rules {
            let dedup_key = format!("{}:{}:{}", event.source, event.event_type, rule.id);

            // All suppression checks under one short lock
            let fire = {
                let mut state = self.lock();

                // Muted rule (lazy expiry)
                if let Some(expires) = state.muted.get(&rule.id).copied() {
                    if expires > now {
                        continue;
                    }
                    state.muted.remove(&rule.id);
                }

                if !rule.matches(&event) {
                    continue;
                }

                // Acknowledged dedup key (lazy expiry)
                if let Some(expires) = state.acknowledged.get(&dedup_key).copied() {
                    match expires {
                        None => continue,
                        Some(expires) if expires > now => continue,
                        Some(_) => {
                            state.acknowledged.remove(&dedup_key);
                        }
                    }
                }

                // Cooldown
                if let Some(last) = state.last_fired.get(&dedup_key) {
                    if (now - *last).num_seconds() < rule.cooldown_seconds as i64 {
                        continue;
                    }
                }
                state.last_fired.insert(dedup_key.clone(), now);

                let alert = ActiveAlert {
                    id: Uuid::new_v4().to_string(),
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    event: event.clone(),
                    severity: event.severity,
                    dedup_key: dedup_key.clone(),
                    timestamp: now,
                    resolved: false,
                    acknowledged_by: None,
                    acknowledged_at: None,
                    acknowledged_expires_at: None,
                };
                state.active.push(alert.clone());
                alert
            };

            info!(
                rule = %rule.name,
                severity = %event.severity,
                dedup_key = %fire.dedup_key,
                "Alert fired: {}",
                event.message
            );

            // Persist best-effort; in-memory state stays authoritative
            if let Err(e) = self
                .repo
                .insert_alert(AlertHistoryRow {
                    alert_id: fire.id.clone(),
                    rule_id: fire.rule_id.clone(),
                    rule_name: fire.rule_name.clone(),
                    severity: fire.severity.to_string(),
                    dedup_key: fire.dedup_key.clone(),
                    message: event.message.clone(),
                    resolved: false,
                    timestamp: fire.timestamp,
                })
                .await
            {
                error!(error = %e, "Failed to persist alert");
            }

            self.formatter.submit(fire.clone(), event.clone()).await;

            if rule.auto_investigate && event.severity == EventSeverity::Urgent {
                let enqueuer = self.enqueuer.lock().unwrap_or_else(|p| p.into_inner()).clone();
                if let Some(enqueuer) = enqueuer {
                    let status = enqueuer.enqueue_investigation(InvestigationRequest::new(
                        event.clone(),
                        InvestigationPriority::Urgent,
                    ));
                    if status != EnqueueStatus::Queued {
                        warn!(?status, rule = %rule.id, "Auto-investigation not queued");
                    }
                }
            }
        }
    }

    // --- Operations ---

    /// Acknowledges an alert: future fires with the same dedup key are
    /// suppressed until `expires_at` (forever when `None`).
    pub async fn acknowledge(
        &self,
        alert_id: &str,
        by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> bool {
        let now = Utc::now();
        let (found, dedup_key, rule_id) = {
            let mut state = self.lock();
            let Some(alert) = state.active.iter_mut().find(|a| a.id == alert_id) else {
                return false;
            };
            alert.acknowledged_by = Some(by.to_string());
            alert.acknowledged_at = Some(now);
            alert.acknowledged_expires_at = expires_at;
            let dedup_key = alert.dedup_key.clone();
            let rule_id = alert.rule_id.clone();
            state.acknowledged.insert(dedup_key.clone(), expires_at);
            (true, dedup_key, rule_id)
        };

        if let Err(e) = self
            .repo
            .upsert_acknowledgment(AcknowledgmentRow {
                dedup_key,
                rule_id,
                acknowledged_by: by.to_string(),
                expires_at,
                active: true,
                created_at: now,
            })
            .await
        {
            error!(error = %e, "Failed to persist acknowledgment");
        }
        found
    }

    /// Removes the acknowledgment for an alert's dedup key.
    pub async fn unacknowledge(&self, alert_id: &str) -> bool {
        let dedup_key = {
            let mut state = self.lock();
            let Some(alert) = state.active.iter_mut().find(|a| a.id == alert_id) else {
                return false;
            };
            alert.acknowledged_by = None;
            alert.acknowledged_at = None;
            alert.acknowledged_expires_at = None;
            let dedup_key = alert.dedup_key.clone();
            state.acknowledged.remove(&dedup_key);
            dedup_key
        };

        if let Err(e) = self.repo.deactivate_acknowledgment(&dedup_key).await {
            error!(error = %e, "Failed to persist unacknowledge");
        }
        true
    }

    /// Mutes a rule until `expires_at`, clamped to [`MAX_MUTE_HOURS`].
    pub async fn mute(&self, rule_id: &str, by: &str, expires_at: DateTime<Utc>) -> bool {
        if !self.rules.iter().any(|r| r.id == rule_id) {
            return false;
        }
        let now = Utc::now();
        let max = now + Duration::hours(MAX_MUTE_HOURS);
        let expires_at = expires_at.min(max);

        self.lock().muted.insert(rule_id.to_string(), expires_at);

        if let Err(e) = self
            .repo
            .upsert_rule_mute(RuleMuteRow {
                rule_id: rule_id.to_string(),
                muted_by: by.to_string(),
                expires_at,
                active: true,
                created_at: now,
            })
            .await
        {
            error!(error = %e, "Failed to persist rule mute");
        }
        true
    }

    /// Lifts a rule mute.
    pub async fn unmute(&self, rule_id: &str) -> bool {
        let removed = self.lock().muted.remove(rule_id).is_some();
        if let Err(e) = self.repo.deactivate_rule_mute(rule_id).await {
            error!(error = %e, "Failed to persist unmute");
        }
        removed
    }

    /// Resolves an alert. The row is kept for audit.
    pub async fn resolve(&self, alert_id: &str) -> bool {
        let found = {
            let mut state = self.lock();
            match state
                .active
                .iter_mut()
                .find(|a| a.id == alert_id && !a.resolved)
            {
                Some(alert) => {
                    alert.resolved = true;
                    true
                }
                None => false,
            }
        };

        if found {
            if let Err(e) = self.repo.mark_alert_resolved(alert_id).await {
                error!(error = %e, "Failed to persist alert resolution");
            }
        }
        found
    }

    /// Snapshot of alerts, optionally including resolved ones.
    pub fn get_active_alerts(&self, include_resolved: bool) -> Vec<ActiveAlert> {
        let state = self.lock();
        state
            .active
            .iter()
            .filter(|a| include_resolved || !a.resolved)
            .cloned()
            .collect()
    }

    /// The configured rule set.
    pub fn get_rules(&self) -> Vec<AlertRule> {
        self.rules.clone()
    }

    /// Suppression snapshot for tests and status endpoints.
    pub fn suppression_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.acknowledged.len(), state.muted.len())
    }

    /// Rewinds a dedup key's cooldown stamp (test clock control).
    #[cfg(test)]
    fn backdate_last_fired(&self, dedup_key: &str, seconds: i64) {
        let mut state = self.lock();
        if let Some(stamp) = state.last_fired.get_mut(dedup_key) {
            *stamp = *stamp - Duration::seconds(seconds);
        }
    }

    #[cfg(test)]
    fn muted_until(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.lock().muted.get(rule_id).copied()
    }
}
