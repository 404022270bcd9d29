// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Action execution pipeline: propose → approve → execute → audit.
//!
//! READ_ONLY commands run immediately. Everything else broadcasts an
//! `action_request` frame and parks on a per-action oneshot signal until a
//! user responds or the approval window times out. Pending actions are
//! independent: answering one never touches another.

use super::audit::AuditLogger;
use super::sandbox::{CommandResult, CommandSandbox, ToolRisk};
use crate::protocol::{Broadcaster, ServerMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

/// How long a proposal waits for a user response.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-command execution timeout.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a proposed action.
#[derive(Debug)]
pub struct ActionResult {
    pub action_id: String,
    pub approved: bool,
    pub executed: bool,
    pub command_result: Option<CommandResult>,
    pub error: String,
}

impl ActionResult {
    fn denied(action_id: String, error: impl Into<String>) -> Self {
        Self {
            action_id,
            approved: false,
            executed: false,
            command_result: None,
            error: error.into(),
        }
    }
}

/// A user's verdict on one pending action.
#[derive(Debug, Clone)]
struct Verdict {
    approved: bool,
    user: String,
}

/// Orchestrates the approve → execute → audit flow.
pub struct ActionEngine {
    sandbox: CommandSandbox,
    audit: AuditLogger,
    broadcaster: Broadcaster,
    pending: Mutex<HashMap<String, oneshot::Sender<Verdict>>>,
}

impl ActionEngine {
    pub fn new(sandbox: CommandSandbox, audit: AuditLogger, broadcaster: Broadcaster) -> Self {
        Self {
            sandbox,
            audit,
            broadcaster,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Proposes a command. Auto-approves READ_ONLY; otherwise waits for a
    /// user response up to [`APPROVAL_TIMEOUT`].
    pub async fn propose_action(
        self: &Arc<Self>,
        command: Vec<String>,
        description: &str,
    ) -> ActionResult {
        let action_id = Uuid::new_v4().to_string();
        let command_str = command.join(" ");

        let (allowed, risk) = self.sandbox.validate_command(&command);
        if !allowed {
            self.audit
                .log_action(
                    if description.is_empty() { &command_str } else { description },
                    &command_str,
                    "blocked by sandbox",
                    false,
                    false,
                )
                .await;
            return ActionResult::denied(action_id, "Command blocked by safety filter");
        }

        // READ_ONLY executes without asking anyone
        if risk == ToolRisk::ReadOnly {
            return self.execute_action(action_id, command, description, true, "").await;
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(action_id.clone(), tx);

        self.broadcaster.send(ServerMessage::ActionRequest {
            id: action_id.clone(),
            tool: "run_command".to_string(),
            description: if description.is_empty() {
                format!("Execute: {command_str}")
            } else {
                description.to_string()
            },
            command: command.clone(),
            risk_level: risk.to_string(),
            reversible: false,
        });

        let verdict = match tokio::time::timeout(APPROVAL_TIMEOUT, rx).await {
            Ok(Ok(verdict)) => {
                // handle_response removed the entry before signalling
                verdict
            }
            Ok(Err(_)) | Err(_) => {
                // Timed out (or the engine dropped). Remove the entry under
                // the same lock used for insertion so a late response finds
                // nothing instead of a dangling sender.
                self.pending
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&action_id);
                self.audit
                    .log_action(description, &command_str, "approval timed out", false, false)
                    .await;
                return ActionResult::denied(action_id, "Approval timed out");
            }
        };

        if !verdict.approved {
            self.audit
                .log_action(description, &command_str, "rejected by user", false, false)
                .await;
            return ActionResult::denied(action_id, "Action rejected by user");
        }

        self.execute_action(action_id, command, description, false, &verdict.user)
            .await
    }

    async fn execute_action(
        &self,
        action_id: String,
        command: Vec<String>,
        description: &str,
        auto: bool,
        approved_by: &str,
    ) -> ActionResult {
        let command_str = command.join(" ");

        self.broadcaster.send(ServerMessage::ActionExecuting {
            id: action_id.clone(),
            command: command.clone(),
        });

        let result = self.sandbox.execute(&command, EXECUTE_TIMEOUT).await;

        self.audit
            .log_action(
                if description.is_empty() { &command_str } else { description },
                &command_str,
                if result.exit_code == 0 {
                    &result.stdout
                } else {
                    &result.stderr
                },
                result.exit_code == 0,
                !auto,
            )
            .await;

        self.broadcaster.send(ServerMessage::ActionComplete {
            id: action_id.clone(),
            exit_code: result.exit_code,
            stdout: result.stdout.chars().take(1000).collect(),
            stderr: result.stderr.chars().take(1000).collect(),
            duration_ms: result.duration_ms,
        });

        info!(
            action_id = %action_id,
            exit_code = result.exit_code,
            auto,
            approved_by,
            "Action executed"
        );

        ActionResult {
            action_id,
            approved: true,
            executed: true,
            command_result: Some(result),
            error: String::new(),
        }
    }

    /// Routes a user's `action_response` to the matching pending action.
    ///
    /// Returns `false` for unknown (stale) ids; the transport treats that as
    /// expected, not an error.
    pub fn handle_response(&self, action_id: &str, approved: bool, user: &str) -> bool {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(action_id);

        match sender {
            Some(sender) => sender
                .send(Verdict {
                    approved,
                    user: user.to_string(),
                })
                .is_ok(),
            None => {
                warn!(action_id, "Action response for unknown action");
                false
            }
        }
    }

    /// Number of actions currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
