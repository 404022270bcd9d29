// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Conversation history and context assembly for the agent.
//!
//! History is held in memory and optionally persisted through the
//! operational repository. Context assembly applies smart truncation: old
//! tool results collapse to compact summaries, then the oldest messages are
//! dropped until the estimated token total fits the budget.

use crate::llm::LlmMessage;
use crate::storage::models::{ConversationRow, MessageRow};
use crate::storage::OperationalRepository;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Context budget in estimated tokens.
const MAX_HISTORY_TOKENS: usize = 4000;
/// Tool results older than this many rounds get summarized.
const TOOL_RESULT_SUMMARY_AFTER: usize = 2;

/// Manages conversation history and context assembly.
pub struct ConversationMemory {
    pub conversation_id: String,
    pub source: String,
    messages: Vec<LlmMessage>,
    persisted: bool,
}

impl ConversationMemory {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            source: source.into(),
            messages: Vec::new(),
            persisted: false,
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(LlmMessage::user(content));
    }

    pub fn add_assistant_message(
        &mut self,
        content: impl Into<String>,
        tool_calls: Vec<crate::llm::ToolCall>,
    ) {
        let mut msg = LlmMessage::assistant(content);
        msg.tool_calls = tool_calls;
        self.messages.push(msg);
    }

    pub fn add_tool_result(&mut self, tool_call_id: &str, name: &str, result: &Value) {
        self.messages
            .push(LlmMessage::tool_result(tool_call_id, name, result.to_string()));
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Builds the full message list for an LLM call, truncated to budget.
    pub fn context_messages(&self, system_prompt: &str) -> Vec<LlmMessage> {
        let mut context = vec![LlmMessage::system(system_prompt)];
        context.extend(truncate_history(self.messages.clone()));
        context
    }

    /// Creates the conversation record once.
    pub async fn persist_conversation(
        &mut self,
        repo: &Arc<dyn OperationalRepository>,
        title: &str,
    ) {
        if self.persisted {
            return;
        }
        let row = ConversationRow {
            conversation_id: self.conversation_id.clone(),
            title: if title.is_empty() {
                "New conversation".to_string()
            } else {
                title.chars().take(100).collect()
            },
            source: self.source.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = repo.insert_conversation(row).await {
            error!(error = %e, "Failed to persist conversation");
            return;
        }
        self.persisted = true;
    }

    /// Persists a single message row.
    pub async fn persist_message(
        &self,
        repo: &Arc<dyn OperationalRepository>,
        role: &str,
        content: &str,
        token_count: u64,
    ) {
        let row = MessageRow {
            message_id: Uuid::new_v4().to_string(),
            conversation_id: self.conversation_id.clone(),
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: None,
            token_count,
            timestamp: Utc::now(),
        };
        if let Err(e) = repo.insert_message(row).await {
            error!(error = %e, "Failed to persist message");
        }
    }
}

/// Rough token estimate for a message (~4 chars per token plus overhead).
fn estimate_tokens(msg: &LlmMessage) -> usize {
    let mut len = msg.content.len();
    if !msg.tool_calls.is_empty() {
        len += serde_json::to_string(&msg.tool_calls).map(|s| s.len()).unwrap_or(0);
    }
    len / 4 + 4
}

/// Smart truncation: summarize old tool results, then drop the oldest
/// messages until within budget. Always keeps at least two messages.
fn truncate_history(mut messages: Vec<LlmMessage>) -> Vec<LlmMessage> {
    if messages.is_empty() {
        return messages;
    }

    if messages.len() > TOOL_RESULT_SUMMARY_AFTER * 3 {
        let cutoff = messages.len() - TOOL_RESULT_SUMMARY_AFTER * 3;
        for msg in &mut messages[..cutoff] {
            if msg.role == "tool" && msg.content.len() > 200 {
                if let Ok(data) = serde_json::from_str::<Value>(&msg.content) {
                    msg.content = summarize_tool_result(&data);
                }
            }
        }
    }

    let mut total: usize = messages.iter().map(estimate_tokens).sum();
    while total > MAX_HISTORY_TOKENS && messages.len() > 2 {
        let dropped = messages.remove(0);
        total -= estimate_tokens(&dropped);
    }

    messages
}

/// Compact projection of a tool result: keep key metadata, drop bulk.
fn summarize_tool_result(data: &Value) -> String {
    if let Some(error) = data.get("error") {
        return json!({ "error": error }).to_string();
    }

    let mut summary = serde_json::Map::new();
    for key in ["file", "path", "pattern", "total_matches", "total_lines", "returned"] {
        if let Some(value) = data.get(key) {
            summary.insert(key.to_string(), value.clone());
        }
    }

    if let Some(matches) = data.get("matches").and_then(Value::as_array) {
        summary.insert("matches_count".to_string(), json!(matches.len()));
        if let Some(first) = matches.first() {
            let text = first
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            summary.insert(
                "first_match".to_string(),
                json!(text.chars().take(100).collect::<String>()),
            );
        }
    }

    if let Some(lines) = data.get("lines").and_then(Value::as_array) {
        summary.insert("lines_count".to_string(), json!(lines.len()));
    }

    if let Some(content) = data.get("content").and_then(Value::as_str) {
        if content.len() > 200 {
            let preview: String = content.chars().take(200).collect();
            summary.insert("content_preview".to_string(), json!(format!("{preview}...")));
        } else {
            summary.insert("content".to_string(), json!(content));
        }
    }

    if summary.is_empty() {
        json!({ "status": "ok" }).to_string()
    } else {
        Value::Object(summary).to_string()
    }
}
