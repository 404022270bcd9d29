// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Alert intelligence layer: severity routing, batching, grouping, and
//! human-friendly phrasing.
//!
//! URGENT alerts fan out to every channel immediately. NOTABLE alerts queue
//! in a buffer that a periodic flush collapses into a grouped digest, with
//! an optional budget-gated AI triage line.

use super::channels::NotificationChannel;
use super::engine::ActiveAlert;
use crate::agent::InvestigationReportSink;
use crate::budget::{BudgetPriority, TokenBudget};
use crate::events::{Event, EventSeverity, EventType};
use crate::llm::{LlmMessage, LlmProvider};
use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

static IP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.\d+\.\d+\.\d+)").unwrap());
static PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\d+)").unwrap());

// ---------------------------------------------------------------------------
// Human-friendly message templates
// ---------------------------------------------------------------------------

fn data_str(event: &Event, key: &str) -> String {
    event.data_str(key).unwrap_or("unknown").to_string()
}

fn data_num(event: &Event, key: &str) -> String {
    event
        .data_f64(key)
        .map(|v| format!("{}", v.round() as i64))
        .unwrap_or_else(|| "?".to_string())
}

fn severity_word(event: &Event) -> &'static str {
    if event.severity == EventSeverity::Urgent {
        "critically high"
    } else {
        "elevated"
    }
}

fn fmt_suspicious_outbound(event: &Event) -> String {
    let ip = IP_RE
        .captures(&event.message)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| data_str(event, "remote_ip"));
    let port = PORT_RE
        .captures(&event.message)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| data_num(event, "port"));
    format!("New connection to IP {ip} on port {port}")
}

fn fmt_anomaly(event: &Event) -> String {
    let metric = data_str(event, "metric");
    let value = data_num(event, "value");
    let mean = event
        .data_f64("mean")
        .or_else(|| event.data_f64("baseline_mean"))
        .map(|v| format!("{}", v.round() as i64))
        .unwrap_or_else(|| "?".to_string());
    let pretty = metric.replace('_', " ");
    format!("{pretty} spiked to {value} — normally around {mean}")
}

fn fmt_usage(event: &Event, what: &str) -> String {
    let pct = event
        .data_f64("value")
        .or_else(|| event.data_f64("percent"))
        .map(|v| format!("{}", v.round() as i64))
        .unwrap_or_else(|| "?".to_string());
    format!("{what} usage {} at {pct}%", severity_word(event))
}

/// Returns a human-friendly message for an event; unknown types fall back
/// to the raw message.
pub fn format_event(event: &Event) -> String {
    match event.event_type {
        EventType::SuspiciousOutbound => fmt_suspicious_outbound(event),
        EventType::AnomalyDetected => fmt_anomaly(event),
        EventType::CpuHigh => fmt_usage(event, "CPU"),
        EventType::MemoryHigh => fmt_usage(event, "Memory"),
        EventType::DiskHigh => fmt_usage(event, "Disk"),
        EventType::ProcessCrashed => "A monitored process has crashed".to_string(),
        EventType::ProcessOomKilled => {
            "A process was killed by the OOM killer — out of memory".to_string()
        }
        EventType::ErrorBurst => "Burst of errors detected in application logs".to_string(),
        EventType::NewExecutable => format!(
            "New executable file appeared in temp directory: {}",
            data_str(event, "path")
        ),
        EventType::NewOpenPort => format!(
            "New listening port detected: port {} is now open",
            data_num(event, "port")
        ),
        EventType::BruteForce => format!(
            "SSH brute force attack: {} failed login attempts from {}",
            data_num(event, "attempts"),
            data_str(event, "remote_ip")
        ),
        EventType::SuspiciousProcess => format!(
            "Suspicious process '{}' detected (PID {}) — matches known cryptominer pattern",
            data_str(event, "process_name"),
            data_num(event, "pid")
        ),
        EventType::PermissionRisk => format!(
            "Sensitive file '{}' is world-readable (permissions: {}) — security risk",
            data_str(event, "path"),
            data_str(event, "mode")
        ),
        EventType::ProcessRestartLoop => format!(
            "Process '{}' is stuck in a restart loop ({} restarts)",
            data_str(event, "process_name"),
            data_num(event, "restart_count")
        ),
        EventType::SdkErrorSpike => format!(
            "Error rate in '{}' spiked to {}% (was {}%)",
            data_str(event, "service"),
            data_num(event, "error_rate"),
            data_num(event, "previous_error_rate")
        ),
        EventType::SdkLatencyDegradation => format!(
            "Response time for '{}' degraded: p95 now {}ms (was {}ms)",
            data_str(event, "service"),
            data_num(event, "p95_ms"),
            data_num(event, "previous_p95_ms")
        ),
        EventType::SdkColdStartSpike => format!(
            "Cold start rate for '{}' spiked to {}%",
            data_str(event, "service"),
            data_num(event, "cold_start_pct")
        ),
        EventType::SdkServiceSilent => format!(
            "Service '{}' stopped sending telemetry — may be down",
            data_str(event, "service")
        ),
        EventType::SdkTrafficBurst => format!(
            "Traffic spike on '{}': {} requests in 5 min (normally ~{})",
            data_str(event, "service"),
            data_num(event, "request_count"),
            data_num(event, "baseline_mean")
        ),
        _ => {
            if event.message.is_empty() {
                event.event_type.to_string()
            } else {
                event.message.clone()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Semantic grouping key for digest batching.
fn grouping_key(alert: &ActiveAlert, event: &Event) -> String {
    match event.event_type {
        EventType::SuspiciousOutbound => {
            let ip = IP_RE
                .captures(&event.message)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| data_str(event, "remote_ip"));
            format!("suspicious_outbound:{ip}")
        }
        EventType::AnomalyDetected => format!("anomaly:{}", data_str(event, "metric")),
        EventType::SdkErrorSpike
        | EventType::SdkLatencyDegradation
        | EventType::SdkColdStartSpike
        | EventType::SdkServiceSilent
        | EventType::SdkTrafficBurst => {
            format!("{}:{}", event.event_type, data_str(event, "service"))
        }
        _ => format!("{}:{}", alert.rule_id, event.event_type),
    }
}

/// A single alert+event in the buffer.
#[derive(Debug, Clone)]
pub struct DigestItem {
    pub alert: ActiveAlert,
    pub event: Event,
    pub friendly_message: String,
}

/// A set of related items collapsed into one line.
#[derive(Debug, Clone)]
pub struct DigestGroup {
    pub key: String,
    pub items: Vec<DigestItem>,
}

impl DigestGroup {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Human-friendly summary for the group.
    pub fn summary(&self) -> String {
        let Some(first) = self.items.first() else {
            return String::new();
        };

        if self.count() > 1 {
            match first.event.event_type {
                EventType::SuspiciousOutbound => {
                    let ip = IP_RE
                        .captures(&first.event.message)
                        .map(|c| c[1].to_string())
                        .unwrap_or_else(|| data_str(&first.event, "remote_ip"));
                    return format!("{} new outbound connections to {ip}", self.count());
                }
                EventType::AnomalyDetected => {
                    return format!(
                        "Multiple anomalies on {}",
                        data_str(&first.event, "metric")
                    );
                }
                _ => {
                    return format!("{} (+{} more)", first.friendly_message, self.count() - 1);
                }
            }
        }

        first.friendly_message.clone()
    }
}

/// A batch of grouped alerts ready for delivery.
#[derive(Debug, Clone)]
pub struct AlertDigest {
    pub groups: Vec<DigestGroup>,
    pub total_count: usize,
    pub window_seconds: u64,
    pub ai_summary: String,
}

// ---------------------------------------------------------------------------
// AlertFormatter
// ---------------------------------------------------------------------------

/// Routes alerts by severity and batches NOTABLE deliveries.
pub struct AlertFormatter {
    channels: Vec<Arc<dyn NotificationChannel>>,
    batch_window: Duration,
    min_severity: EventSeverity,
    ai_enhance: bool,
    provider: Option<Arc<dyn LlmProvider>>,
    budget: Option<Arc<TokenBudget>>,
    buffer: Mutex<Vec<DigestItem>>,
    cancel: CancellationToken,
}

impl AlertFormatter {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        batch_window: Duration,
        min_severity: EventSeverity,
        ai_enhance: bool,
    ) -> Self {
        Self {
            channels,
            batch_window,
            min_severity,
            ai_enhance,
            provider: None,
            budget: None,
            buffer: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Enables the AI triage line on digests.
    pub fn with_ai(mut self, provider: Arc<dyn LlmProvider>, budget: Arc<TokenBudget>) -> Self {
        self.provider = Some(provider);
        self.budget = Some(budget);
        self
    }

    /// Starts the periodic flush task.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.batch_window);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = tick.tick() => this.flush().await,
                }
            }
        });
        info!(
            batch_window_secs = self.batch_window.as_secs(),
            min_severity = %self.min_severity,
            ai_enhance = self.ai_enhance,
            "AlertFormatter started"
        );
    }

    /// Cancels the flush task and performs one final drain.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.flush().await;
        info!("AlertFormatter stopped");
    }

    /// Routes an alert by severity: URGENT → immediate, NOTABLE → buffer.
    pub async fn submit(&self, alert: ActiveAlert, event: Event) {
        if event.severity < self.min_severity {
            return;
        }
        let friendly = format_event(&event);

        if event.severity == EventSeverity::Urgent {
            self.send_immediate(&alert, &event, &friendly).await;
        } else {
            self.buffer.lock().await.push(DigestItem {
                alert,
                event,
                friendly_message: friendly,
            });
        }
    }

    async fn send_immediate(&self, alert: &ActiveAlert, event: &Event, friendly: &str) {
        let sends = self.channels.iter().map(|channel| {
            let channel = channel.clone();
            async move {
                if let Err(e) = channel.send_urgent(alert, event, friendly).await {
                    error!(channel = channel.name(), error = %e, "Urgent send failed");
                }
            }
        });
        join_all(sends).await;
    }

    /// Drains the buffer, groups items, and delivers a digest.
    pub async fn flush(&self) {
        let items: Vec<DigestItem> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if items.is_empty() {
            return;
        }

        let groups = group_items(&items);

        let ai_summary = if self.ai_enhance {
            self.ai_triage(&groups).await
        } else {
            String::new()
        };

        let digest = AlertDigest {
            total_count: items.len(),
            window_seconds: self.batch_window.as_secs(),
            ai_summary,
            groups,
        };

        for channel in &self.channels {
            if let Err(e) = channel.send_digest(&digest).await {
                error!(channel = channel.name(), error = %e, "Digest send failed");
            }
        }
        debug!(total = digest.total_count, groups = digest.groups.len(), "Digest flushed");
    }

    /// One short LLM completion summarizing the batch. Failure is silent.
    async fn ai_triage(&self, groups: &[DigestGroup]) -> String {
        let (Some(provider), Some(budget)) = (&self.provider, &self.budget) else {
            return String::new();
        };
        if !budget.can_spend(1000, BudgetPriority::Normal) {
            return String::new();
        }

        let mut prompt = String::from(
            "You are Argus, a server monitoring AI. Briefly assess these NOTABLE \
             (non-critical) events in 1-2 sentences. Focus on whether action is needed.\n\n",
        );
        for group in groups {
            prompt.push_str(&format!("- {}\n", group.summary()));
        }

        match provider.complete(&[LlmMessage::user(prompt)], &[]).await {
            Ok(response) => {
                budget.record_usage(response.prompt_tokens, response.completion_tokens);
                response.content
            }
            Err(e) => {
                debug!(error = %e, "AI triage skipped");
                String::new()
            }
        }
    }
}

fn group_items(items: &[DigestItem]) -> Vec<DigestGroup> {
    let mut groups: Vec<DigestGroup> = Vec::new();
    for item in items {
        let key = grouping_key(&item.alert, &item.event);
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.items.push(item.clone()),
            None => groups.push(DigestGroup {
                key,
                items: vec![item.clone()],
            }),
        }
    }
    groups
}

#[async_trait]
impl InvestigationReportSink for AlertFormatter {
    /// Posts an AI investigation report to all external channels.
    async fn send_investigation_report(&self, event: &Event, summary: &str) {
        let title = format_event(event);
        for channel in &self.channels {
            if let Err(e) = channel.send_investigation_report(&title, summary).await {
                error!(channel = channel.name(), error = %e, "Investigation report send failed");
            }
        }
    }
}
