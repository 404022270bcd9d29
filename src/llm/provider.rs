// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! LLM provider contract and common types.
//!
//! Providers map the unified message/tool shapes to their native wire
//! formats and normalize their streaming output into [`LlmDelta`] values.
//! Nothing above this boundary branches on provider identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments object
    pub arguments: Value,
}

/// Tool metadata advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
}

/// One conversation message in the unified shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// "system", "user", "assistant" or "tool"
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-role messages: which call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on tool-role messages: the tool's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

/// One unit of streamed provider output.
///
/// Text arrives incrementally in `content`; `tool_calls` is only populated
/// on the final delta with the fully accumulated snapshot, alongside the
/// token totals.
#[derive(Debug, Clone, Default)]
pub struct LlmDelta {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl LlmDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A complete (non-streamed) response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Errors surfaced by providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider has no API key configured
    #[error("API key missing for provider: {0}")]
    MissingApiKey(String),

    /// Provider rate-limited the request (retryable)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network-level failure (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Mid-stream failure (retryable)
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// API rejected the request
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the ReAct loop may retry this error at the round boundary.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited(_) | LlmError::Connection(_) | LlmError::Streaming(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Connection(e.to_string())
    }
}

/// Receiver half of a provider stream.
pub type DeltaStream = mpsc::Receiver<Result<LlmDelta, LlmError>>;

/// Common trait for all LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier ("openai", "anthropic", "gemini").
    fn name(&self) -> &'static str;

    /// Model identifier used for requests.
    fn model(&self) -> &str;

    /// Runs a non-streaming completion.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolSchema],
    ) -> Result<LlmResponse, LlmError>;

    /// Runs a streaming completion.
    ///
    /// The returned channel yields text deltas as they arrive and ends with
    /// one final delta carrying accumulated tool calls, the finish reason,
    /// and token totals.
    async fn stream(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolSchema],
    ) -> Result<DeltaStream, LlmError>;
}

/// Maps an HTTP error status from a provider into an [`LlmError`].
pub(crate) fn status_error(status: u16, body: &str) -> LlmError {
    if status == 429 {
        LlmError::RateLimited(body.to_string())
    } else {
        LlmError::Api {
            status,
            message: body.chars().take(500).collect(),
        }
    }
}
