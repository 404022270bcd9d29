// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Argus Agent Library
//!
//! Backend for Argus, an AI-native observability agent: one long-running
//! process that collects host and SDK telemetry, classifies it into
//! severity-tagged events, fires deduplicated alerts, and runs budget-gated
//! AI investigations with sandboxed remediation.
//!
//! ## Modules
//!
//! - [`events`] - Event types, classifier, and the in-process bus
//! - [`collectors`] - Periodic telemetry producers
//! - [`baseline`] - Rolling metric baselines and anomaly detection
//! - [`alerting`] - Rule engine, suppression, digest batching, channels
//! - [`agent`] - ReAct loop, conversation memory, investigation pipeline
//! - [`llm`] - Provider contract and OpenAI/Anthropic/Gemini backends
//! - [`actions`] - Command sandbox and approve/execute/audit pipeline
//! - [`tools`] - Agent-callable tools over storage, alerts, and commands
//! - [`storage`] - Repository traits and embedded SurrealDB backends
//! - [`ingest`] - SDK telemetry ingest mapping and webhook signatures
//! - [`protocol`] - Streaming frames and the in-process broadcaster
//! - [`state`] - Root wiring of all components
//!
//! ## Data flow
//!
//! Collectors → [`events::EventClassifier`] → [`events::EventBus`] →
//! [`alerting::AlertEngine`] → [`alerting::AlertFormatter`] → channels,
//! with urgent auto-investigate rules feeding [`agent::Investigator`].

pub mod actions;
pub mod agent;
pub mod alerting;
pub mod baseline;
pub mod budget;
pub mod collectors;
pub mod config;
pub mod events;
pub mod ingest;
pub mod llm;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod tenancy;
pub mod tools;

pub use config::Settings;
pub use state::AppState;
