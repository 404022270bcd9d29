// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Google Gemini provider.
//!
//! Gemini uses `user`/`model` roles, a separate `system_instruction`, and
//! sends complete `functionCall` parts rather than argument fragments.
//! Function calls carry no ids, so synthetic ids are assigned in arrival
//! order to satisfy the unified shape.

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
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Splits internal messages into (system instruction, Gemini contents).
fn messages_to_wire(messages: &[LlmMessage]) -> (String, Vec<Value>) {
    let mut system = String::new();
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => system = msg.content.clone(),
            "assistant" => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(json!({"text": msg.content}));
                }
                for tc in &msg.tool_calls {
                    parts.push(json!({
                        "functionCall": {"name": tc.name, "args": tc.arguments},
                    }));
                }
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            "tool" => {
                let response: Value =
                    serde_json::from_str(&msg.content).unwrap_or_else(|_| json!({"result": msg.content}));
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": msg.name.clone().unwrap_or_default(),
                            "response": response,
                        },
                    }],
                }));
            }
            _ => contents.push(json!({"role": "user", "parts": [{"text": msg.content}]})),
        }
    }

    (system, contents)
}

fn tools_to_wire(tools: &[ToolSchema]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect();
    json!([{ "function_declarations": declarations }])
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Google Gemini API provider.
pub struct GeminiProvider {
    http: Arc<reqwest::Client>,
    config: LlmConfig,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(http: Arc<reqwest::Client>, config: LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| GEMINI_API_BASE.to_string());
        Self {
            http,
            config,
            base_url,
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        let verb = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!("{}/{}:{}", self.base_url, self.config.model, verb)
    }

    fn request_body(&self, messages: &[LlmMessage], tools: &[ToolSchema]) -> Value {
        let (system, contents) = messages_to_wire(messages);
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_tokens,
            },
        });
        if !system.is_empty() {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            body["tools"] = tools_to_wire(tools);
        }
        body
    }

    fn check_key(&self) -> Result<(), LlmError> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey("gemini".to_string()));
        }
        Ok(())
    }
}

/// Synthetic id for a Gemini function call (the API provides none).
fn call_id(ordinal: usize) -> String {
    format!("call_{ordinal}")
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
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
            .post(self.endpoint(false))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.request_body(messages, tools))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = String::new();
        for candidate in parsed.candidates {
            if let Some(reason) = candidate.finish_reason {
                finish_reason = reason;
            }
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    content.push_str(&text);
                }
                if let Some(call) = part.function_call {
                    tool_calls.push(ToolCall {
                        id: call_id(tool_calls.len()),
                        name: call.name,
                        arguments: call.args,
                    });
                }
            }
        }

        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(LlmResponse {
            content,
            tool_calls,
            finish_reason,
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
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
            .post(self.endpoint(true))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.request_body(messages, tools))
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
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut finish_reason: Option<String> = None;
            let mut usage = UsageMetadata::default();
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
                    let parsed: GenerateResponse = match serde_json::from_str(&payload) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(error = %e, "Skipping unparseable stream chunk");
                            continue;
                        }
                    };

                    if let Some(meta) = parsed.usage_metadata {
                        usage = meta;
                    }

                    for candidate in parsed.candidates {
                        if let Some(reason) = candidate.finish_reason {
                            finish_reason = Some(reason);
                        }
                        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                            if let Some(text) = part.text {
                                if !text.is_empty()
                                    && tx.send(Ok(LlmDelta::text(text))).await.is_err()
                                {
                                    return;
                                }
                            }
                            if let Some(call) = part.function_call {
                                tool_calls.push(ToolCall {
                                    id: call_id(tool_calls.len()),
                                    name: call.name,
                                    arguments: call.args,
                                });
                            }
                        }
                    }
                }
            }

            let _ = tx
                .send(Ok(LlmDelta {
                    content: String::new(),
                    tool_calls,
                    finish_reason,
                    prompt_tokens: usage.prompt_token_count,
                    completion_tokens: usage.candidates_token_count,
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
    fn test_assistant_maps_to_model_role() {
        let (_, contents) = messages_to_wire(&[
            LlmMessage::user("hello"),
            LlmMessage::assistant("hi there"),
        ]);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "hi there");
    }

    #[test]
    fn test_tool_result_becomes_function_response() {
        let (_, contents) =
            messages_to_wire(&[LlmMessage::tool_result("call_0", "query_metrics", "{\"avg\":3}")]);
        let part = &contents[0]["parts"][0]["functionResponse"];
        assert_eq!(part["name"], "query_metrics");
        assert_eq!(part["response"]["avg"], 3);
    }

    #[test]
    fn test_non_json_tool_result_wrapped() {
        let (_, contents) =
            messages_to_wire(&[LlmMessage::tool_result("call_0", "run", "plain output")]);
        assert_eq!(
            contents[0]["parts"][0]["functionResponse"]["response"]["result"],
            "plain output"
        );
    }

    #[test]
    fn test_function_call_part_parsing() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"query","args":{"n":5}}}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":12,"candidatesTokenCount":7}}"#,
        )
        .unwrap();
        let call = parsed.candidates[0].content.as_ref().unwrap().parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.name, "query");
        assert_eq!(call.args["n"], 5);
        assert_eq!(parsed.usage_metadata.unwrap().prompt_token_count, 12);
    }

    #[test]
    fn test_endpoint_shapes() {
        let provider = GeminiProvider::new(
            Arc::new(reqwest::Client::new()),
            LlmConfig {
                provider: "gemini".to_string(),
                model: "gemini-2.5-flash".to_string(),
                api_key: "k".to_string(),
                ..Default::default()
            },
        );
        assert!(provider.endpoint(false).ends_with("gemini-2.5-flash:generateContent"));
        assert!(provider
            .endpoint(true)
            .ends_with("gemini-2.5-flash:streamGenerateContent?alt=sse"));
    }

    #[test]
    fn test_synthetic_call_ids() {
        assert_eq!(call_id(0), "call_0");
        assert_eq!(call_id(3), "call_3");
    }
}
