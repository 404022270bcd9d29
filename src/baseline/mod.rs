// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Metric baselines and z-score anomaly detection.

pub mod detector;
pub mod tracker;

pub use detector::{Anomaly, AnomalyDetector};
pub use tracker::BaselineTracker;
