// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! System prompt assembly for the agent.

use crate::config::Mode;

const BASE_PROMPT: &str = "You are Argus, an AI observability agent running directly on the \
infrastructure you monitor. You investigate incidents using the available tools: query metrics, \
search logs, inspect traces and deploys, and check current alerts. Ground every conclusion in \
tool output. When you recommend a remediation command, propose it through the run_command tool \
and explain the expected effect; never assume it was executed.";

const SDK_ONLY_NOTE: &str = "You are running in SDK-only mode: there is no host access, so work \
exclusively from the telemetry reported by instrumented services.";

const CLI_NOTE: &str = "The user is on a terminal. Keep formatting simple: short paragraphs and \
plain lists, no tables.";

/// Builds the system prompt for a run.
///
/// `baseline_context`, when present, is the formatted output of the baseline
/// tracker so the model knows what "normal" looks like for this host.
pub fn build_system_prompt(client_type: &str, mode: Mode, baseline_context: &str) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    if mode == Mode::SdkOnly {
        prompt.push_str("\n\n");
        prompt.push_str(SDK_ONLY_NOTE);
    }
    if client_type == "cli" {
        prompt.push_str("\n\n");
        prompt.push_str(CLI_NOTE);
    }
    if !baseline_context.is_empty() {
        prompt.push_str("\n\nCurrent metric baselines (7-day window):\n");
        prompt.push_str(baseline_context);
    }

    prompt
}
