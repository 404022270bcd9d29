// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operational (row) repository contract.
//!
//! Holds the mutable bookkeeping the agent mirrors out of memory:
//! conversations, audit log, alert history, suppressions, token usage and
//! investigation records. All rows carry the ambient tenant and reads are
//! tenant-isolated.

use super::models::*;
use super::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Aggregated token usage for reporting.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsageSummary {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub request_count: u64,
    pub estimated_cost_usd: f64,
}

#[async_trait]
pub trait OperationalRepository: Send + Sync {
    // --- Conversations ---

    async fn insert_conversation(&self, row: ConversationRow) -> Result<(), StorageError>;
    async fn insert_message(&self, row: MessageRow) -> Result<(), StorageError>;

    // --- Audit log (append-only) ---

    async fn append_audit(&self, record: AuditRecord) -> Result<(), StorageError>;
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StorageError>;

    // --- Alert history ---

    async fn insert_alert(&self, row: AlertHistoryRow) -> Result<(), StorageError>;
    async fn mark_alert_resolved(&self, alert_id: &str) -> Result<(), StorageError>;
    async fn list_alerts(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AlertHistoryRow>, StorageError>;

    // --- Suppressions ---

    async fn upsert_acknowledgment(&self, row: AcknowledgmentRow) -> Result<(), StorageError>;
    async fn deactivate_acknowledgment(&self, dedup_key: &str) -> Result<bool, StorageError>;
    /// Active acknowledgments; implementations deactivate expired rows on read.
    async fn active_acknowledgments(&self) -> Result<Vec<AcknowledgmentRow>, StorageError>;

    async fn upsert_rule_mute(&self, row: RuleMuteRow) -> Result<(), StorageError>;
    async fn deactivate_rule_mute(&self, rule_id: &str) -> Result<bool, StorageError>;
    /// Active mutes; implementations deactivate expired rows on read.
    async fn active_rule_mutes(&self) -> Result<Vec<RuleMuteRow>, StorageError>;

    // --- Token usage ---

    async fn record_token_usage(&self, row: TokenUsageRow) -> Result<(), StorageError>;
    async fn token_usage_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<TokenUsageSummary, StorageError>;

    // --- Investigations ---

    async fn insert_investigation(&self, row: InvestigationRow) -> Result<(), StorageError>;
}

/// Approximate cost per 1K tokens (input, output) for known model families.
/// Prefix matching handles dated variants; unknown models use the default.
const COST_PER_1K: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-4o", 0.0025, 0.01),
    ("gpt-4.1-mini", 0.0004, 0.0016),
    ("gpt-4.1", 0.002, 0.008),
    ("gpt-5-mini", 0.00025, 0.002),
    ("gpt-5-nano", 0.00005, 0.0004),
    ("gpt-5", 0.00125, 0.01),
    ("o3", 0.002, 0.008),
    ("o4-mini", 0.0011, 0.0044),
    ("claude-opus-4", 0.005, 0.025),
    ("claude-sonnet-4", 0.003, 0.015),
    ("claude-haiku-4", 0.001, 0.005),
    ("claude-3-5-sonnet", 0.003, 0.015),
    ("gemini-2.5-pro", 0.00125, 0.01),
    ("gemini-2.5-flash-lite", 0.0001, 0.0004),
    ("gemini-2.5-flash", 0.0003, 0.0025),
    ("gemini-2.0-flash", 0.0001, 0.0004),
];

const DEFAULT_COST_PER_1K: (f64, f64) = (0.002, 0.008);

/// Estimates USD cost for one usage row. Longest matching prefix wins.
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let mut best: Option<(&str, f64, f64)> = None;
    for (prefix, input, output) in COST_PER_1K {
        if model.starts_with(prefix) {
            match best {
                Some((current, _, _)) if current.len() >= prefix.len() => {}
                _ => best = Some((prefix, *input, *output)),
            }
        }
    }
    let (input_rate, output_rate) = match best {
        Some((_, i, o)) => (i, o),
        None => DEFAULT_COST_PER_1K,
    };
    (prompt_tokens as f64 / 1000.0) * input_rate + (completion_tokens as f64 / 1000.0) * output_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost_known_model() {
        // 1000 prompt + 1000 completion on gpt-4o = 0.0025 + 0.01
        let cost = estimate_cost("gpt-4o", 1000, 1000);
        assert!((cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_longest_prefix_wins() {
        // gpt-4o-mini must not fall back to the gpt-4o rates
        let mini = estimate_cost("gpt-4o-mini-2024-07-18", 1000, 1000);
        assert!((mini - (0.00015 + 0.0006)).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_dated_variant() {
        let cost = estimate_cost("claude-sonnet-4-5-20250929", 2000, 0);
        assert!((cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_unknown_model_uses_default() {
        let cost = estimate_cost("mystery-model", 1000, 1000);
        assert!((cost - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_zero_tokens() {
        assert_eq!(estimate_cost("gpt-4o", 0, 0), 0.0);
    }
}
