// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! SurrealDB-backed operational repository.
//!
//! Low-rate bookkeeping writes go straight to the database; there is no
//! buffering here. Suppression reads deactivate expired rows as they pass
//! (lazy expiry), so callers always see a live view.

use crate::storage::models::*;
use crate::storage::operational::{
    estimate_cost, OperationalRepository, TokenUsageSummary,
};
use crate::storage::StorageError;
use crate::tenancy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{sanitize, schema::OPERATIONAL_SCHEMA, SurrealClient};

/// Operational repository on embedded SurrealDB.
pub struct SurrealOperationalRepository {
    client: Arc<SurrealClient>,
}

impl SurrealOperationalRepository {
    /// Opens the database and applies the schema.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let client = Arc::new(SurrealClient::open(path, "argus", "operational").await?);
        client.execute(OPERATIONAL_SCHEMA, vec![]).await?;
        info!(path, "Operational repository ready");
        Ok(Self { client })
    }

    fn tenant_value<T: serde::Serialize>(row: &T) -> Value {
        let mut v = serde_json::to_value(row).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut v {
            map.insert("tenant_id".to_string(), json!(tenancy::current_tenant()));
        }
        sanitize(v)
    }
}

fn tenant_binding() -> (&'static str, Value) {
    ("tenant", json!(tenancy::current_tenant()))
}

#[async_trait]
impl OperationalRepository for SurrealOperationalRepository {
    async fn insert_conversation(&self, row: ConversationRow) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO conversations $row",
                vec![("row", Self::tenant_value(&row))],
            )
            .await
    }

    async fn insert_message(&self, row: MessageRow) -> Result<(), StorageError> {
        self.client
            .insert_rows("messages", vec![Self::tenant_value(&row)])
            .await
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<(), StorageError> {
        // tenant comes from the record itself so audits written from a
        // spawned approval task keep the proposing tenant
        self.client
            .insert_rows("audit_log", vec![sanitize(serde_json::to_value(&record).unwrap_or(Value::Null))])
            .await
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StorageError> {
        let query = format!(
            "SELECT timestamp, action, command, result, success, user_approved, tenant_id \
             FROM audit_log WHERE tenant_id = $tenant \
             ORDER BY timestamp DESC LIMIT {limit}"
        );
        self.client.query(&query, vec![tenant_binding()]).await
    }

    async fn insert_alert(&self, row: AlertHistoryRow) -> Result<(), StorageError> {
        self.client
            .insert_rows("alert_history", vec![Self::tenant_value(&row)])
            .await
    }

    async fn mark_alert_resolved(&self, alert_id: &str) -> Result<(), StorageError> {
        self.client
            .execute(
                "UPDATE alert_history SET resolved = true \
                 WHERE tenant_id = $tenant AND alert_id = $alert_id",
                vec![tenant_binding(), ("alert_id", json!(alert_id))],
            )
            .await
    }

    async fn list_alerts(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AlertHistoryRow>, StorageError> {
        let query = format!(
            "SELECT alert_id, rule_id, rule_name, severity, dedup_key, message, resolved, timestamp \
             FROM alert_history \
             WHERE tenant_id = $tenant AND timestamp >= type::datetime($since) \
             ORDER BY timestamp DESC LIMIT {limit}"
        );
        self.client
            .query(
                &query,
                vec![tenant_binding(), ("since", json!(since.to_rfc3339()))],
            )
            .await
    }

    async fn upsert_acknowledgment(&self, row: AcknowledgmentRow) -> Result<(), StorageError> {
        self.client
            .execute(
                "DELETE alert_acknowledgments WHERE tenant_id = $tenant AND dedup_key = $key; \
                 INSERT INTO alert_acknowledgments $row",
                vec![
                    tenant_binding(),
                    ("key", json!(row.dedup_key)),
                    ("row", Self::tenant_value(&row)),
                ],
            )
            .await
    }

    async fn deactivate_acknowledgment(&self, dedup_key: &str) -> Result<bool, StorageError> {
        #[derive(Deserialize)]
        struct Updated {
            #[allow(dead_code)]
            dedup_key: String,
        }
        let updated: Vec<Updated> = self
            .client
            .query(
                "UPDATE alert_acknowledgments SET active = false \
                 WHERE tenant_id = $tenant AND dedup_key = $key AND active = true \
                 RETURN dedup_key",
                vec![tenant_binding(), ("key", json!(dedup_key))],
            )
            .await?;
        Ok(!updated.is_empty())
    }

    async fn active_acknowledgments(&self) -> Result<Vec<AcknowledgmentRow>, StorageError> {
        let rows: Vec<AcknowledgmentRow> = self
            .client
            .query(
                "SELECT dedup_key, rule_id, acknowledged_by, expires_at, active, created_at \
                 FROM alert_acknowledgments \
                 WHERE tenant_id = $tenant AND active = true",
                vec![tenant_binding()],
            )
            .await?;

        let now = Utc::now();
        let (live, expired): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .partition(|r| r.expires_at.map(|exp| exp > now).unwrap_or(true));

        for row in &expired {
            self.deactivate_acknowledgment(&row.dedup_key).await?;
        }
        Ok(live)
    }

    async fn upsert_rule_mute(&self, row: RuleMuteRow) -> Result<(), StorageError> {
        self.client
            .execute(
                "DELETE alert_rule_mutes WHERE tenant_id = $tenant AND rule_id = $rule; \
                 INSERT INTO alert_rule_mutes $row",
                vec![
                    tenant_binding(),
                    ("rule", json!(row.rule_id)),
                    ("row", Self::tenant_value(&row)),
                ],
            )
            .await
    }

    async fn deactivate_rule_mute(&self, rule_id: &str) -> Result<bool, StorageError> {
        #[derive(Deserialize)]
        struct Updated {
            #[allow(dead_code)]
            rule_id: String,
        }
        let updated: Vec<Updated> = self
            .client
            .query(
                "UPDATE alert_rule_mutes SET active = false \
                 WHERE tenant_id = $tenant AND rule_id = $rule AND active = true \
                 RETURN rule_id",
                vec![tenant_binding(), ("rule", json!(rule_id))],
            )
            .await?;
        Ok(!updated.is_empty())
    }

    async fn active_rule_mutes(&self) -> Result<Vec<RuleMuteRow>, StorageError> {
        let rows: Vec<RuleMuteRow> = self
            .client
            .query(
                "SELECT rule_id, muted_by, expires_at, active, created_at \
                 FROM alert_rule_mutes \
                 WHERE tenant_id = $tenant AND active = true",
                vec![tenant_binding()],
            )
            .await?;

        let now = Utc::now();
        let (live, expired): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.expires_at > now);

        for row in &expired {
            self.deactivate_rule_mute(&row.rule_id).await?;
        }
        Ok(live)
    }

    async fn record_token_usage(&self, row: TokenUsageRow) -> Result<(), StorageError> {
        self.client
            .insert_rows("token_usage", vec![Self::tenant_value(&row)])
            .await
    }

    async fn token_usage_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<TokenUsageSummary, StorageError> {
        #[derive(Deserialize)]
        struct PerModel {
            model: String,
            prompt_tokens: Option<u64>,
            completion_tokens: Option<u64>,
            request_count: Option<u64>,
        }
        let rows: Vec<PerModel> = self
            .client
            .query(
                "SELECT model, \
                        math::sum(prompt_tokens) AS prompt_tokens, \
                        math::sum(completion_tokens) AS completion_tokens, \
                        count() AS request_count \
                 FROM token_usage \
                 WHERE tenant_id = $tenant AND timestamp >= type::datetime($since) \
                 GROUP BY model",
                vec![tenant_binding(), ("since", json!(since.to_rfc3339()))],
            )
            .await?;

        let mut summary = TokenUsageSummary::default();
        for row in rows {
            let prompt = row.prompt_tokens.unwrap_or(0);
            let completion = row.completion_tokens.unwrap_or(0);
            summary.prompt_tokens += prompt;
            summary.completion_tokens += completion;
            summary.request_count += row.request_count.unwrap_or(0);
            summary.estimated_cost_usd += estimate_cost(&row.model, prompt, completion);
        }
        summary.total_tokens = summary.prompt_tokens + summary.completion_tokens;
        Ok(summary)
    }

    async fn insert_investigation(&self, row: InvestigationRow) -> Result<(), StorageError> {
        self.client
            .insert_rows("investigations", vec![Self::tenant_value(&row)])
            .await
    }
}
