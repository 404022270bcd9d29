// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Remediation command tool bridging the ReAct loop to the action engine.
//!
//! The tool itself never executes anything: it proposes the command and the
//! action engine decides (auto-approve READ_ONLY, await user otherwise).
//! Denials come back as ordinary results so the model can react.

use super::{Tool, ToolError, ToolResult};
use crate::actions::ActionEngine;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Proposes a command through the sandbox + approval pipeline.
pub struct RunCommandTool {
    engine: Arc<ActionEngine>,
}

impl RunCommandTool {
    pub fn new(engine: Arc<ActionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Propose a shell command for execution. Read-only diagnostics run immediately; \
         anything else requires human approval and may be rejected or time out. Destructive \
         commands are blocked outright."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Command as an argv vector, e.g. [\"systemctl\", \"restart\", \"nginx\"]"
                },
                "description": {"type": "string", "description": "What this command does and why"}
            },
            "required": ["command"]
        })
    }

    fn display_type(&self) -> &str {
        "code_block"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let command: Vec<String> = args
            .get("command")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .ok_or_else(|| ToolError::InvalidInput("command must be an array of strings".into()))?;
        if command.is_empty() {
            return Err(ToolError::InvalidInput("command must not be empty".into()));
        }
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let result = self.engine.propose_action(command, description).await;

        let mut response = json!({
            "action_id": result.action_id,
            "approved": result.approved,
            "executed": result.executed,
        });
        if !result.error.is_empty() {
            response["error"] = json!(result.error);
        }
        if let Some(command_result) = result.command_result {
            response["exit_code"] = json!(command_result.exit_code);
            response["stdout"] = json!(command_result.stdout);
            response["stderr"] = json!(command_result.stderr);
            response["duration_ms"] = json!(command_result.duration_ms);
        }
        Ok(response)
    }
}
