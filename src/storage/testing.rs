// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory repository doubles for unit tests.

use super::metrics::{MetricsRepository, TimeWindow};
use super::models::*;
use super::operational::{OperationalRepository, TokenUsageSummary};
use super::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Metrics repository that accepts writes and returns empty reads. For
/// tests that need real analytical behavior use the SurrealDB repository
/// on a tempdir instead.
#[derive(Default)]
pub struct NullMetricsRepository;

#[async_trait]
impl MetricsRepository for NullMetricsRepository {
    async fn insert_metric(&self, _r: MetricRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_metrics_batch(&self, _r: Vec<MetricRow>) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_log_entry(&self, _r: LogEntryRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_sdk_event(&self, _r: SdkEventRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_span(&self, _r: SpanRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_sdk_metric(&self, _r: SdkMetricRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_dependency_call(&self, _r: DependencyCallRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn insert_deploy_event(&self, _r: DeployEventRow) -> Result<(), StorageError> {
        Ok(())
    }
    async fn query_function_metrics(
        &self,
        _s: &str,
        _w: TimeWindow,
    ) -> Result<Vec<FunctionMetricsBucket>, StorageError> {
        Ok(vec![])
    }
    async fn query_request_metrics(
        &self,
        _s: &str,
        _p: Option<&str>,
        _m: Option<&str>,
        _w: TimeWindow,
    ) -> Result<Vec<RequestMetricsBucket>, StorageError> {
        Ok(vec![])
    }
    async fn query_trace_summary(
        &self,
        _s: Option<&str>,
        _since: DateTime<Utc>,
        _l: usize,
    ) -> Result<Vec<TraceSummaryRow>, StorageError> {
        Ok(vec![])
    }
    async fn query_slow_spans(
        &self,
        _s: Option<&str>,
        _min: f64,
        _since: DateTime<Utc>,
        _l: usize,
    ) -> Result<Vec<SlowSpanRow>, StorageError> {
        Ok(vec![])
    }
    async fn query_trace(&self, _t: &str) -> Result<Vec<SpanRow>, StorageError> {
        Ok(vec![])
    }
    async fn query_error_groups(
        &self,
        _s: Option<&str>,
        _since: DateTime<Utc>,
        _l: usize,
    ) -> Result<Vec<ErrorGroup>, StorageError> {
        Ok(vec![])
    }
    async fn query_service_summary(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ServiceSummary>, StorageError> {
        Ok(vec![])
    }
    async fn query_dependency_summary(
        &self,
        _s: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<DependencySummary>, StorageError> {
        Ok(vec![])
    }
    async fn query_dependency_map(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<DependencyEdge>, StorageError> {
        Ok(vec![])
    }
    async fn query_deploy_history(
        &self,
        _s: Option<&str>,
        _l: usize,
    ) -> Result<Vec<DeployEventRow>, StorageError> {
        Ok(vec![])
    }
    async fn query_metrics_summary(
        &self,
        _m: &str,
        _since: DateTime<Utc>,
    ) -> Result<MetricsSummary, StorageError> {
        Ok(MetricsSummary::default())
    }
    async fn query_metric_series(
        &self,
        _m: &str,
        _since: DateTime<Utc>,
        _l: usize,
    ) -> Result<Vec<MetricPoint>, StorageError> {
        Ok(vec![])
    }
    async fn compute_metric_baselines(
        &self,
        _since: DateTime<Utc>,
        _min: u64,
    ) -> Result<Vec<BaselineRow>, StorageError> {
        Ok(vec![])
    }
    async fn compute_sdk_baselines(
        &self,
        _since: DateTime<Utc>,
        _min: u64,
    ) -> Result<Vec<BaselineRow>, StorageError> {
        Ok(vec![])
    }
    async fn upsert_baselines(&self, _r: Vec<BaselineRow>) -> Result<(), StorageError> {
        Ok(())
    }
    async fn load_baselines(&self) -> Result<Vec<BaselineRow>, StorageError> {
        Ok(vec![])
    }
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Operational repository backed by plain vectors. Suppression reads apply
/// the same lazy-expiry semantics as the real implementation.
#[derive(Default)]
pub struct MemoryOperationalRepository {
    pub audits: Mutex<Vec<AuditRecord>>,
    pub alerts: Mutex<Vec<AlertHistoryRow>>,
    pub acknowledgments: Mutex<Vec<AcknowledgmentRow>>,
    pub mutes: Mutex<Vec<RuleMuteRow>>,
    pub token_usage: Mutex<Vec<TokenUsageRow>>,
    pub conversations: Mutex<Vec<ConversationRow>>,
    pub messages: Mutex<Vec<MessageRow>>,
    pub investigations: Mutex<Vec<InvestigationRow>>,
}

impl MemoryOperationalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl OperationalRepository for MemoryOperationalRepository {
    async fn insert_conversation(&self, row: ConversationRow) -> Result<(), StorageError> {
        Self::guard(&self.conversations).push(row);
        Ok(())
    }

    async fn insert_message(&self, row: MessageRow) -> Result<(), StorageError> {
        Self::guard(&self.messages).push(row);
        Ok(())
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<(), StorageError> {
        Self::guard(&self.audits).push(record);
        Ok(())
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StorageError> {
        let audits = Self::guard(&self.audits);
        Ok(audits.iter().rev().take(limit).cloned().collect())
    }

    async fn insert_alert(&self, row: AlertHistoryRow) -> Result<(), StorageError> {
        Self::guard(&self.alerts).push(row);
        Ok(())
    }

    async fn mark_alert_resolved(&self, alert_id: &str) -> Result<(), StorageError> {
        for row in Self::guard(&self.alerts).iter_mut() {
            if row.alert_id == alert_id {
                row.resolved = true;
            }
        }
        Ok(())
    }

    async fn list_alerts(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AlertHistoryRow>, StorageError> {
        let alerts = Self::guard(&self.alerts);
        Ok(alerts
            .iter()
            .filter(|a| a.timestamp >= since)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_acknowledgment(&self, row: AcknowledgmentRow) -> Result<(), StorageError> {
        let mut acks = Self::guard(&self.acknowledgments);
        acks.retain(|a| a.dedup_key != row.dedup_key);
        acks.push(row);
        Ok(())
    }

    async fn deactivate_acknowledgment(&self, dedup_key: &str) -> Result<bool, StorageError> {
        let mut acks = Self::guard(&self.acknowledgments);
        let mut found = false;
        for ack in acks.iter_mut() {
            if ack.dedup_key == dedup_key && ack.active {
                ack.active = false;
                found = true;
            }
        }
        Ok(found)
    }

    async fn active_acknowledgments(&self) -> Result<Vec<AcknowledgmentRow>, StorageError> {
        let now = Utc::now();
        let mut acks = Self::guard(&self.acknowledgments);
        for ack in acks.iter_mut() {
            if ack.active {
                if let Some(expires) = ack.expires_at {
                    if expires <= now {
                        ack.active = false;
                    }
                }
            }
        }
        Ok(acks.iter().filter(|a| a.active).cloned().collect())
    }

    async fn upsert_rule_mute(&self, row: RuleMuteRow) -> Result<(), StorageError> {
        let mut mutes = Self::guard(&self.mutes);
        mutes.retain(|m| m.rule_id != row.rule_id);
        mutes.push(row);
        Ok(())
    }

    async fn deactivate_rule_mute(&self, rule_id: &str) -> Result<bool, StorageError> {
        let mut mutes = Self::guard(&self.mutes);
        let mut found = false;
        for mute in mutes.iter_mut() {
            if mute.rule_id == rule_id && mute.active {
                mute.active = false;
                found = true;
            }
        }
        Ok(found)
    }

    async fn active_rule_mutes(&self) -> Result<Vec<RuleMuteRow>, StorageError> {
        let now = Utc::now();
        let mut mutes = Self::guard(&self.mutes);
        for mute in mutes.iter_mut() {
            if mute.active && mute.expires_at <= now {
                mute.active = false;
            }
        }
        Ok(mutes.iter().filter(|m| m.active).cloned().collect())
    }

    async fn record_token_usage(&self, row: TokenUsageRow) -> Result<(), StorageError> {
        Self::guard(&self.token_usage).push(row);
        Ok(())
    }

    async fn token_usage_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<TokenUsageSummary, StorageError> {
        let usage = Self::guard(&self.token_usage);
        let mut summary = TokenUsageSummary::default();
        for row in usage.iter().filter(|r| r.timestamp >= since) {
            summary.prompt_tokens += row.prompt_tokens;
            summary.completion_tokens += row.completion_tokens;
            summary.request_count += 1;
            summary.estimated_cost_usd +=
                super::estimate_cost(&row.model, row.prompt_tokens, row.completion_tokens);
        }
        summary.total_tokens = summary.prompt_tokens + summary.completion_tokens;
        Ok(summary)
    }

    async fn insert_investigation(&self, row: InvestigationRow) -> Result<(), StorageError> {
        Self::guard(&self.investigations).push(row);
        Ok(())
    }
}
