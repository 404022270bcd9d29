// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Anthropic Messages API provider.
//!
//! Anthropic takes the system prompt as a separate parameter, represents
//! tool results as user-role `tool_result` blocks, and streams tool-call
//! arguments as `input_json_delta` fragments keyed by content block index.

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

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Streaming events, discriminated by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: StreamMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: usize,
        content_block: StreamBlockStart,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: StreamBlockDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: StreamMessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StreamMessageStart {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamBlockStart {
    #[serde(rename = "text")]
    Text {},
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamBlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Default)]
struct StreamMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Splits internal messages into (system prompt, Anthropic messages).
fn messages_to_wire(messages: &[LlmMessage]) -> (String, Vec<Value>) {
    let mut system = String::new();
    let mut wire = Vec::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => system = msg.content.clone(),
            "tool" => wire.push(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                }],
            })),
            "assistant" if !msg.tool_calls.is_empty() => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(json!({"type": "text", "text": msg.content}));
                }
                for tc in &msg.tool_calls {
                    content.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                wire.push(json!({"role": "assistant", "content": content}));
            }
            role => wire.push(json!({"role": role, "content": msg.content})),
        }
    }

    (system, wire)
}

fn tools_to_wire(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Anthropic Claude API provider.
pub struct AnthropicProvider {
    http: Arc<reqwest::Client>,
    config: LlmConfig,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(http: Arc<reqwest::Client>, config: LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_API_URL.to_string());
        Self {
            http,
            config,
            base_url,
        }
    }

    fn request_body(&self, messages: &[LlmMessage], tools: &[ToolSchema], stream: bool) -> Value {
        let (system, wire_messages) = messages_to_wire(messages);
        let mut body = json!({
            "model": self.config.model,
            "messages": wire_messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools_to_wire(tools));
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn check_key(&self) -> Result<(), LlmError> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey("anthropic".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
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
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(messages, tools, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
            }
        }

        Ok(LlmResponse {
            content,
            tool_calls,
            finish_reason: parsed.stop_reason.unwrap_or_default(),
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
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
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            // Block index -> (id, name, accumulated input json)
            let mut tool_blocks: BTreeMap<usize, (String, String, String)> = BTreeMap::new();
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
                    let event: StreamEvent = match serde_json::from_str(&payload) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!(error = %e, "Skipping unparseable stream event");
                            continue;
                        }
                    };

                    match event {
                        StreamEvent::MessageStart { message } => {
                            prompt_tokens = message.usage.input_tokens;
                        }
                        StreamEvent::ContentBlockStart {
                            index,
                            content_block: StreamBlockStart::ToolUse { id, name },
                        } => {
                            tool_blocks.insert(index, (id, name, String::new()));
                        }
                        StreamEvent::ContentBlockDelta { index, delta } => match delta {
                            StreamBlockDelta::TextDelta { text } => {
                                if !text.is_empty()
                                    && tx.send(Ok(LlmDelta::text(text))).await.is_err()
                                {
                                    return;
                                }
                            }
                            StreamBlockDelta::InputJsonDelta { partial_json } => {
                                if let Some(block) = tool_blocks.get_mut(&index) {
                                    block.2.push_str(&partial_json);
                                }
                            }
                            StreamBlockDelta::Unknown => {}
                        },
                        StreamEvent::MessageDelta { delta, usage } => {
                            if let Some(reason) = delta.stop_reason {
                                finish_reason = Some(reason);
                            }
                            if let Some(usage) = usage {
                                completion_tokens = usage.output_tokens;
                            }
                        }
                        StreamEvent::ContentBlockStart { .. }
                        | StreamEvent::ContentBlockStop { .. }
                        | StreamEvent::MessageStop
                        | StreamEvent::Ping
                        | StreamEvent::Unknown => {}
                    }
                }
            }

            let tool_calls: Vec<ToolCall> = tool_blocks
                .into_values()
                .map(|(id, name, input)| ToolCall {
                    id,
                    name,
                    arguments: serde_json::from_str(&input).unwrap_or_else(|_| {
                        if input.is_empty() {
                            json!({})
                        } else {
                            warn!("Malformed tool input json, using empty object");
                            json!({})
                        }
                    }),
                })
                .collect();

            let _ = tx
                .send(Ok(LlmDelta {
                    content: String::new(),
                    tool_calls,
                    finish_reason,
                    prompt_tokens,
                    completion_tokens,
                }))
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_extracted_separately() {
        let (system, wire) = messages_to_wire(&[
            LlmMessage::system("You are Argus."),
            LlmMessage::user("hello"),
        ]);
        assert_eq!(system, "You are Argus.");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn test_tool_result_becomes_user_block() {
        let (_, wire) = messages_to_wire(&[LlmMessage::tool_result("tu_1", "query", "{\"x\":1}")]);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "tu_1");
    }

    #[test]
    fn test_assistant_tool_calls_become_tool_use_blocks() {
        let msg = LlmMessage {
            role: "assistant".to_string(),
            content: "Checking metrics.".to_string(),
            tool_calls: vec![ToolCall {
                id: "tu_1".to_string(),
                name: "query_metrics".to_string(),
                arguments: json!({"metric": "cpu_percent"}),
            }],
            tool_call_id: None,
            name: None,
        };
        let (_, wire) = messages_to_wire(&[msg]);
        assert_eq!(wire[0]["content"][0]["type"], "text");
        assert_eq!(wire[0]["content"][1]["type"], "tool_use");
        assert_eq!(wire[0]["content"][1]["input"]["metric"], "cpu_percent");
    }

    #[test]
    fn test_tools_use_input_schema_key() {
        let wire = tools_to_wire(&[ToolSchema {
            name: "t".to_string(),
            description: "d".to_string(),
            parameters: json!({"type": "object"}),
        }]);
        assert!(wire[0].get("input_schema").is_some());
        assert!(wire[0].get("parameters").is_none());
    }

    #[test]
    fn test_stream_event_parsing() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            StreamEvent::ContentBlockDelta {
                delta: StreamBlockDelta::TextDelta { .. },
                ..
            }
        ));

        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"query"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            StreamEvent::ContentBlockStart {
                index: 1,
                content_block: StreamBlockStart::ToolUse { .. }
            }
        ));

        // Unknown event types must not fail the stream
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"brand_new_event","field":true}"#).unwrap();
        assert!(matches!(event, StreamEvent::Unknown));
    }

    #[test]
    fn test_missing_api_key() {
        let provider = AnthropicProvider::new(
            Arc::new(reqwest::Client::new()),
            LlmConfig {
                api_key: String::new(),
                provider: "anthropic".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(
            provider.check_key(),
            Err(LlmError::MissingApiKey(_))
        ));
    }
}
