// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Notification channel contract and built-in sinks.
//!
//! Channels are dumb sinks: the formatter decides what to send and when.
//! Every send is individually guarded by the caller, so a failing channel
//! never affects its peers.

use super::engine::ActiveAlert;
use super::formatter::AlertDigest;
use crate::events::Event;
use crate::llm::RetryConfig;
use crate::protocol::{Broadcaster, ServerMessage};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// External delivery sink for alerts and digests.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Delivers a single alert.
    async fn send(&self, alert: &ActiveAlert, event: &Event) -> anyhow::Result<()>;

    /// Delivers an urgent alert with its human-friendly phrasing.
    async fn send_urgent(
        &self,
        alert: &ActiveAlert,
        event: &Event,
        _friendly: &str,
    ) -> anyhow::Result<()> {
        self.send(alert, event).await
    }

    /// Delivers a batched digest. The default falls back to sending the
    /// buffered items one-by-one for channels without digest support.
    async fn send_digest(&self, digest: &AlertDigest) -> anyhow::Result<()> {
        for group in &digest.groups {
            for item in &group.items {
                self.send(&item.alert, &item.event).await?;
            }
        }
        Ok(())
    }

    /// Delivers an AI investigation report.
    async fn send_investigation_report(&self, title: &str, summary: &str) -> anyhow::Result<()>;
}

/// Generic JSON webhook sink.
pub struct WebhookChannel {
    url: String,
    http: Arc<reqwest::Client>,
    retry: RetryConfig,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, http: Arc<reqwest::Client>) -> Self {
        Self {
            url: url.into(),
            http,
            retry: RetryConfig::new(2, 500, 5_000),
        }
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            let result = self.http.post(&self.url).json(&payload).send().await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    if attempt >= self.retry.max_retries || status.is_client_error() {
                        anyhow::bail!("webhook returned {status}");
                    }
                    debug!(status = %status, attempt, "Webhook retry");
                }
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(e.into());
                    }
                    debug!(error = %e, attempt, "Webhook retry");
                }
            }
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &ActiveAlert, event: &Event) -> anyhow::Result<()> {
        self.post(json!({
            "kind": "alert",
            "alert_id": alert.id,
            "rule": alert.rule_name,
            "severity": alert.severity,
            "message": event.message,
            "source": event.source,
            "timestamp": alert.timestamp,
        }))
        .await
    }

    async fn send_urgent(
        &self,
        alert: &ActiveAlert,
        event: &Event,
        friendly: &str,
    ) -> anyhow::Result<()> {
        self.post(json!({
            "kind": "urgent_alert",
            "alert_id": alert.id,
            "rule": alert.rule_name,
            "severity": alert.severity,
            "summary": friendly,
            "message": event.message,
            "source": event.source,
            "timestamp": alert.timestamp,
        }))
        .await
    }

    async fn send_digest(&self, digest: &AlertDigest) -> anyhow::Result<()> {
        let groups: Vec<serde_json::Value> = digest
            .groups
            .iter()
            .map(|g| json!({"summary": g.summary(), "count": g.count()}))
            .collect();
        self.post(json!({
            "kind": "digest",
            "total": digest.total_count,
            "window_seconds": digest.window_seconds,
            "ai_summary": digest.ai_summary,
            "groups": groups,
        }))
        .await
    }

    async fn send_investigation_report(&self, title: &str, summary: &str) -> anyhow::Result<()> {
        self.post(json!({
            "kind": "investigation_report",
            "title": title,
            "summary": summary,
        }))
        .await
    }
}

/// Forwards alerts onto the streaming protocol for connected clients.
pub struct StreamChannel {
    broadcaster: Broadcaster,
}

impl StreamChannel {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl NotificationChannel for StreamChannel {
    fn name(&self) -> &str {
        "stream"
    }

    async fn send(&self, alert: &ActiveAlert, event: &Event) -> anyhow::Result<()> {
        self.broadcaster.send(ServerMessage::Alert {
            id: alert.id.clone(),
            severity: alert.severity,
            title: alert.rule_name.clone(),
            summary: event.message.clone(),
            source: event.source.to_string(),
            timestamp: alert.timestamp,
        });
        Ok(())
    }

    async fn send_urgent(
        &self,
        alert: &ActiveAlert,
        event: &Event,
        friendly: &str,
    ) -> anyhow::Result<()> {
        self.broadcaster.send(ServerMessage::Alert {
            id: alert.id.clone(),
            severity: alert.severity,
            title: alert.rule_name.clone(),
            summary: friendly.to_string(),
            source: event.source.to_string(),
            timestamp: alert.timestamp,
        });
        Ok(())
    }

    async fn send_digest(&self, digest: &AlertDigest) -> anyhow::Result<()> {
        for group in &digest.groups {
            if let Some(first) = group.items.first() {
                self.broadcaster.send(ServerMessage::Alert {
                    id: first.alert.id.clone(),
                    severity: first.alert.severity,
                    title: first.alert.rule_name.clone(),
                    summary: group.summary(),
                    source: first.event.source.to_string(),
                    timestamp: first.alert.timestamp,
                });
            }
        }
        Ok(())
    }

    async fn send_investigation_report(&self, _title: &str, _summary: &str) -> anyhow::Result<()> {
        // Investigation results already stream as investigation_end frames
        debug!("StreamChannel.send_investigation_report is a no-op");
        Ok(())
    }
}
