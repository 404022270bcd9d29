// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! ReAct reasoning loop.
//!
//! Assemble context → stream the model → execute requested tools → repeat,
//! capped at [`MAX_TOOL_ROUNDS`] to bound cost. Streaming callbacks surface
//! round boundaries, text deltas, and tool activity to whatever transport
//! is listening.

use super::memory::ConversationMemory;
use crate::budget::TokenBudget;
use crate::llm::{with_retry, LlmError, LlmProvider, RetryConfig, ToolCall};
use crate::tools::ToolRegistry;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Hard cap on model/tool rounds per run.
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Consecutive text-only rounds tolerated once tools were used; the model
/// may narrate between calls (query → explain → next query).
const MAX_TEXT_ONLY_CONTINUATIONS: usize = 2;

const EXHAUSTION_MESSAGE: &str = "I've reached the maximum number of tool calls for this turn. \
Here's what I found so far based on the tools I've used.";

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    ThinkingStart,
    ThinkingEnd,
    MessageDelta {
        content: String,
    },
    ToolCallStarted {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolCallFinished {
        id: String,
        name: String,
        result: Value,
        display_type: String,
    },
}

/// Async callback receiving [`AgentEvent`]s.
pub type EventCallback = Arc<dyn Fn(AgentEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Result of a single agent run.
#[derive(Debug, Default, Clone)]
pub struct AgentResult {
    pub content: String,
    pub tool_calls_made: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub rounds: usize,
}

/// The reasoning loop shared by chat, investigations, and scheduled reviews.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    on_event: Option<EventCallback>,
    budget: Option<Arc<TokenBudget>>,
    retry: RetryConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        system_prompt: String,
    ) -> Self {
        Self {
            provider,
            tools,
            system_prompt,
            on_event: None,
            budget: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_callback(mut self, on_event: EventCallback) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub fn with_budget(mut self, budget: Arc<TokenBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(cb) = &self.on_event {
            cb(event).await;
        }
    }

    /// Executes the full loop for one user message.
    pub async fn run(
        &self,
        memory: &mut ConversationMemory,
        user_message: &str,
    ) -> Result<AgentResult, LlmError> {
        memory.add_user_message(user_message);

        let mut result = AgentResult::default();
        let tool_schemas = self.tools.schemas();
        let mut consecutive_text_only = 0usize;

        for round in 0..MAX_TOOL_ROUNDS {
            result.rounds = round + 1;
            let messages = memory.context_messages(&self.system_prompt);

            self.emit(AgentEvent::ThinkingStart).await;

            // Opening the stream retries transient failures; errors once the
            // stream is live end the run.
            let mut stream = with_retry(
                || self.provider.stream(&messages, &tool_schemas),
                &self.retry,
            )
            .await?;
            let mut full_content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut round_prompt = 0u64;
            let mut round_completion = 0u64;

            while let Some(delta) = stream.recv().await {
                let delta = match delta {
                    Ok(delta) => delta,
                    Err(e) => {
                        self.emit(AgentEvent::ThinkingEnd).await;
                        return Err(e);
                    }
                };

                if !delta.content.is_empty() {
                    full_content.push_str(&delta.content);
                    self.emit(AgentEvent::MessageDelta {
                        content: delta.content,
                    })
                    .await;
                }
                if !delta.tool_calls.is_empty() {
                    tool_calls = delta.tool_calls;
                }
                round_prompt += delta.prompt_tokens;
                round_completion += delta.completion_tokens;
            }

            self.emit(AgentEvent::ThinkingEnd).await;

            result.prompt_tokens += round_prompt;
            result.completion_tokens += round_completion;
            if let Some(budget) = &self.budget {
                budget.record_usage(round_prompt, round_completion);
            }

            if !tool_calls.is_empty() {
                consecutive_text_only = 0;
                memory.add_assistant_message(full_content.clone(), tool_calls.clone());
                result.tool_calls_made += tool_calls.len();

                for call in tool_calls {
                    self.run_tool(memory, call).await;
                }
                continue;
            }

            if !full_content.is_empty() {
                memory.add_assistant_message(full_content.clone(), Vec::new());
            }

            if result.tool_calls_made > 0 && consecutive_text_only < MAX_TEXT_ONLY_CONTINUATIONS {
                consecutive_text_only += 1;
                debug!(round, "Text-only continuation after tool activity");
                continue;
            }

            result.content = full_content;
            return Ok(result);
        }

        info!("Agent loop exhausted max rounds");
        if result.content.is_empty() {
            result.content = EXHAUSTION_MESSAGE.to_string();
            self.emit(AgentEvent::MessageDelta {
                content: EXHAUSTION_MESSAGE.to_string(),
            })
            .await;
        }
        memory.add_assistant_message(result.content.clone(), Vec::new());
        Ok(result)
    }

    async fn run_tool(&self, memory: &mut ConversationMemory, call: ToolCall) {
        self.emit(AgentEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        })
        .await;

        let (tool_result, display_type) = match self.tools.get(&call.name) {
            None => (
                json!({"error": format!("Unknown tool: {}", call.name)}),
                "json_tree".to_string(),
            ),
            Some(tool) => {
                let args = coerce_args(&tool.parameters_schema(), call.arguments.clone());
                match tool.execute(args).await {
                    Ok(value) => (value, tool.display_type().to_string()),
                    Err(e) => {
                        error!(tool = %call.name, error = %e, "Tool execution error");
                        (
                            json!({"error": format!("Tool execution failed: {e}")}),
                            "json_tree".to_string(),
                        )
                    }
                }
            }
        };

        self.emit(AgentEvent::ToolCallFinished {
            id: call.id.clone(),
            name: call.name.clone(),
            result: tool_result.clone(),
            display_type,
        })
        .await;

        memory.add_tool_result(&call.id, &call.name, &tool_result);
    }
}

/// Coerces arguments to the declared schema types.
///
/// Some providers send integers as floats; integer-typed properties are
/// truncated back so downstream `as_u64`/`as_i64` reads succeed.
fn coerce_args(schema: &Value, mut args: Value) -> Value {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return args;
    };
    if let Some(map) = args.as_object_mut() {
        for (key, value) in map.iter_mut() {
            let declared = props
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if declared == Some("integer") {
                if let Some(f) = value.as_f64() {
                    if value.as_i64().is_none() {
                        *value = json!(f.trunc() as i64);
                    }
                }
            }
        }
    }
    args
}
