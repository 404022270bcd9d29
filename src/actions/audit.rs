// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Append-only audit trail for proposed and executed actions.

use crate::storage::models::AuditRecord;
use crate::storage::OperationalRepository;
use crate::tenancy;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// Result excerpt cap in the audit row.
const RESULT_EXCERPT_LEN: usize = 500;

/// Writes audit records through the operational repository.
///
/// Audit failures are logged and swallowed: a storage outage must never
/// block the action pipeline.
pub struct AuditLogger {
    repo: Arc<dyn OperationalRepository>,
}

impl AuditLogger {
    pub fn new(repo: Arc<dyn OperationalRepository>) -> Self {
        Self { repo }
    }

    /// Appends one audit record.
    pub async fn log_action(
        &self,
        action: &str,
        command: &str,
        result: &str,
        success: bool,
        user_approved: bool,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            action: action.to_string(),
            command: command.to_string(),
            result: result.chars().take(RESULT_EXCERPT_LEN).collect(),
            success,
            user_approved,
            tenant_id: tenancy::current_tenant(),
        };
        info!(
            action = %record.action,
            success,
            user_approved,
            "Audit: {}",
            record.command
        );
        if let Err(e) = self.repo.append_audit(record).await {
            error!(error = %e, "Failed to persist audit record");
        }
    }
}
