// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event pipeline primitives.
//!
//! Data flows one way: collectors → [`classifier::EventClassifier`] →
//! [`bus::EventBus`] → subscribers (alert engine, investigator). The bus is
//! the only fan-out point.

pub mod bus;
pub mod classifier;
pub mod types;

pub use bus::{EventBus, SubscribeFilter};
pub use classifier::{EventClassifier, ThresholdRule};
pub use types::{Event, EventSeverity, EventSource, EventType};
