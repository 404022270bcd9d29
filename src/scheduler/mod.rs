// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Built-in periodic tasks.
//!
//! Tier 1/2 tasks are zero-LLM-cost threshold and trend checks; tier 3
//! tasks (periodic review, daily digest) live on the investigator and are
//! merely scheduled from here.

pub mod tasks;

pub use tasks::{quick_health_check, trend_analysis};
