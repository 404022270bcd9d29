// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! OpenAI chat-completions provider.
//!
//! Uses the streaming SSE endpoint directly so tool-call argument fragments
//! can be accumulated into the unified delta shape.

use super::provider::{
    status_error, DeltaStream, LlmDelta, LlmError, LlmMessage, LlmProvider, LlmResponse, ToolCall,
    ToolSchema,
};
use super::sse::SseParser;
use crate::config::LlmConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn messages_to_wire(messages: &[LlmMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role.as_str() {
            "tool" => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content,
            }),
            "assistant" if !msg.tool_calls.is_empty() => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": msg.content,
                    "tool_calls": calls,
                })
            }
            role => json!({ "role": role, "content": msg.content }),
        })
        .collect()
}

fn tools_to_wire(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                },
            })
        })
        .collect()
}

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        warn!("Malformed JSON in tool call arguments, using empty object");
        json!({})
    })
}

/// Argument fragments accumulated per tool-call index during a stream.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<usize, (String, String, String)>, // index -> (id, name, args)
}

impl ToolCallAccumulator {
    fn apply(&mut self, chunk: StreamToolCall) {
        let entry = self.calls.entry(chunk.index).or_default();
        if let Some(id) = chunk.id {
            entry.0 = id;
        }
        if let Some(function) = chunk.function {
            if let Some(name) = function.name {
                entry.1 = name;
            }
            if let Some(arguments) = function.arguments {
                entry.2.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments: parse_arguments(&arguments),
            })
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI API provider.
pub struct OpenAiProvider {
    http: Arc<reqwest::Client>,
    config: LlmConfig,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(http: Arc<reqwest::Client>, config: LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_API_URL.to_string());
        Self {
            http,
            config,
            base_url,
        }
    }

    fn request_body(&self, messages: &[LlmMessage], tools: &[ToolSchema], stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages_to_wire(messages),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools_to_wire(tools));
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn check_key(&self) -> Result<(), LlmError> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey("openai".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolSchema],
    ) -> Result<LlmResponse, LlmError> {
        self.check_key()?;
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages, tools, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: parse_arguments(&tc.function.arguments),
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_default(),
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens: parsed
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
        })
    }

    async fn stream(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolSchema],
    ) -> Result<DeltaStream, LlmError> {
        self.check_key()?;
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages, tools, true))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut accumulator = ToolCallAccumulator::default();
            let mut finish_reason: Option<String> = None;
            let mut prompt_tokens = 0u64;
            let mut completion_tokens = 0u64;
            let mut byte_stream = response.bytes_stream();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Streaming(e.to_string()))).await;
                        return;
                    }
                };

                for payload in parser.feed(&chunk) {
                    let parsed: StreamChunk = match serde_json::from_str(&payload) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(error = %e, "Skipping unparseable stream chunk");
                            continue;
                        }
                    };

                    if let Some(usage) = parsed.usage {
                        prompt_tokens = usage.prompt_tokens;
                        completion_tokens = usage.completion_tokens;
                    }

                    for choice in parsed.choices {
                        if let Some(reason) = choice.finish_reason {
                            finish_reason = Some(reason);
                        }
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty()
                                && tx.send(Ok(LlmDelta::text(content))).await.is_err()
                            {
                                return; // consumer went away
                            }
                        }
                        for tool_chunk in choice.delta.tool_calls.unwrap_or_default() {
                            accumulator.apply(tool_chunk);
                        }
                    }
                }
            }

            let final_delta = LlmDelta {
                content: String::new(),
                tool_calls: if accumulator.is_empty() {
                    Vec::new()
                } else {
                    accumulator.finish()
                },
                finish_reason,
                prompt_tokens,
                completion_tokens,
            };
            let _ = tx.send(Ok(final_delta)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_to_wire_roles() {
        let messages = vec![
            LlmMessage::system("be brief"),
            LlmMessage::user("what's up"),
            LlmMessage {
                role: "assistant".to_string(),
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "tc_1".to_string(),
                    name: "query_metrics".to_string(),
                    arguments: json!({"metric": "cpu_percent"}),
                }],
                tool_call_id: None,
                name: None,
            },
            LlmMessage::tool_result("tc_1", "query_metrics", "{\"avg\":40}"),
        ];

        let wire = messages_to_wire(&messages);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "query_metrics");
        // Arguments are re-serialized as a JSON string for the wire
        assert!(wire[2]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap()
            .contains("cpu_percent"));
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "tc_1");
    }

    #[test]
    fn test_tools_to_wire() {
        let tools = vec![ToolSchema {
            name: "query_metrics".to_string(),
            description: "Query metrics".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let wire = tools_to_wire(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "query_metrics");
    }

    #[test]
    fn test_tool_call_accumulation() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(StreamToolCall {
            index: 0,
            id: Some("tc_1".to_string()),
            function: Some(StreamFunction {
                name: Some("query_metrics".to_string()),
                arguments: Some("{\"met".to_string()),
            }),
        });
        acc.apply(StreamToolCall {
            index: 0,
            id: None,
            function: Some(StreamFunction {
                name: None,
                arguments: Some("ric\":\"cpu\"}".to_string()),
            }),
        });

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "tc_1");
        assert_eq!(calls[0].arguments["metric"], "cpu");
    }

    #[test]
    fn test_parallel_tool_calls_keep_order() {
        let mut acc = ToolCallAccumulator::default();
        for (index, name) in [(1usize, "second"), (0usize, "first")] {
            acc.apply(StreamToolCall {
                index,
                id: Some(format!("tc_{index}")),
                function: Some(StreamFunction {
                    name: Some(name.to_string()),
                    arguments: Some("{}".to_string()),
                }),
            });
        }
        let calls = acc.finish();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn test_malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments("not json"), json!({}));
        assert_eq!(parse_arguments("{\"ok\":1}"), json!({"ok": 1}));
    }

    #[test]
    fn test_missing_api_key() {
        let provider = OpenAiProvider::new(
            Arc::new(reqwest::Client::new()),
            LlmConfig {
                api_key: String::new(),
                ..Default::default()
            },
        );
        assert!(matches!(
            provider.check_key(),
            Err(LlmError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_request_body_stream_options() {
        let provider = OpenAiProvider::new(
            Arc::new(reqwest::Client::new()),
            LlmConfig {
                api_key: "sk-test".to_string(),
                ..Default::default()
            },
        );
        let body = provider.request_body(&[LlmMessage::user("hi")], &[], true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        // No tools key when the registry is empty
        assert!(body.get("tools").is_none());
    }
}
