// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! LLM provider integrations.
//!
//! The ReAct loop and the alert formatter consume providers only through
//! [`LlmProvider`]; each implementation normalizes its native wire format
//! into the unified streaming delta shape at this boundary.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod retry;
mod sse;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::{
    DeltaStream, LlmDelta, LlmError, LlmMessage, LlmProvider, LlmResponse, ToolCall, ToolSchema,
};
pub use retry::{with_retry, RetryConfig};

use crate::config::LlmConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds the provider named in the configuration.
///
/// Returns `None` for an unknown provider name or a blank one, which the
/// callers treat as "AI features disabled".
pub fn build_provider(config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    let http = Arc::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .ok()?,
    );

    let provider: Arc<dyn LlmProvider> = match config.provider.to_lowercase().as_str() {
        "openai" => Arc::new(OpenAiProvider::new(http, config.clone())),
        "anthropic" => Arc::new(AnthropicProvider::new(http, config.clone())),
        "gemini" | "google" => Arc::new(GeminiProvider::new(http, config.clone())),
        other => {
            if !other.is_empty() {
                tracing::warn!(provider = other, "Unknown LLM provider, AI features disabled");
            }
            return None;
        }
    };
    info!(provider = provider.name(), model = %config.model, "LLM provider configured");
    Some(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_provider_by_name() {
        let config = LlmConfig {
            provider: "anthropic".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");

        let config = LlmConfig {
            provider: "google".to_string(),
            ..Default::default()
        };
        assert_eq!(build_provider(&config).unwrap().name(), "gemini");
    }

    #[test]
    fn test_build_provider_unknown_is_none() {
        let config = LlmConfig {
            provider: "mystery".to_string(),
            ..Default::default()
        };
        assert!(build_provider(&config).is_none());
    }
}
