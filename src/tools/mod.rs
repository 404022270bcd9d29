// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Agent tool framework.
//!
//! Tools are how the ReAct loop touches the outside world. Each tool
//! declares a JSON Schema for its arguments; the loop looks tools up by
//! name, coerces arguments to the schema, and feeds the JSON result back to
//! the model.

pub mod alert_management;
pub mod deploys;
pub mod log_search;
pub mod metrics;
pub mod recent_events;
pub mod run_command;
pub mod traces;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::llm::ToolSchema;

/// Tool execution result type.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors surfaced by tool execution.
///
/// These are rendered back to the model, so each variant carries enough
/// text to let it correct course.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Arguments did not match the schema
    InvalidInput(String),
    /// The operation ran and failed
    ExecutionFailed(String),
    /// Referenced entity does not exist
    NotFound(String),
    /// Persistence layer failure, possibly transient
    Storage(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(
                f,
                "[INVALID_INPUT] {msg}. Check the tool's parameters schema for required fields."
            ),
            Self::ExecutionFailed(msg) => {
                write!(f, "[EXECUTION_FAILED] {msg}. Review the arguments and retry.")
            }
            Self::NotFound(msg) => write!(
                f,
                "[NOT_FOUND] {msg}. Verify the id is correct or list available entries first."
            ),
            Self::Storage(msg) => write!(
                f,
                "[STORAGE_ERROR] {msg}. This may be transient - retry after a moment."
            ),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<crate::storage::StorageError> for ToolError {
    fn from(e: crate::storage::StorageError) -> Self {
        ToolError::Storage(e.to_string())
    }
}

/// Unified interface for all agent tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name the model calls it by.
    fn name(&self) -> &str;

    /// Description shown to the model; decisive for tool selection.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Executes the tool. The result is serialized back to the model.
    async fn execute(&self, args: Value) -> ToolResult<Value>;

    /// Hint for rich clients on how to render the result.
    fn display_type(&self) -> &str {
        "json_tree"
    }
}

/// Name → tool map shared by the loop and the transports.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its own name. Re-registering replaces.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for every registered tool, sorted by name for stable prompts.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}
