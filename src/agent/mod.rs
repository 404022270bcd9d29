// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The AI investigation pipeline.
//!
//! [`react::AgentLoop`] is the reasoning engine; [`investigator::Investigator`]
//! feeds it from a bounded, budget-gated queue; [`memory::ConversationMemory`]
//! keeps history within the context budget.

pub mod investigator;
pub mod memory;
pub mod prompt;
pub mod react;

pub use investigator::{
    EnqueueStatus, InvestigationEnqueuer, InvestigationPriority, InvestigationReportSink,
    InvestigationRequest, Investigator,
};
pub use memory::ConversationMemory;
pub use react::{AgentEvent, AgentLoop, AgentResult, EventCallback, MAX_TOOL_ROUNDS};
