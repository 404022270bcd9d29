// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rolling metric baselines - learns what "normal" looks like.
//!
//! On each refresh the tracker re-aggregates the last seven days of system
//! metrics, SDK metrics, and span durations, keeps metrics with enough
//! samples, and atomically replaces both the in-memory map and the
//! persisted baseline table.

use crate::storage::models::BaselineRow;
use crate::storage::MetricsRepository;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// Rolling aggregation window.
const BASELINE_WINDOW_DAYS: i64 = 7;
/// Metrics with fewer samples than this are not baselined.
const MIN_SAMPLES: u64 = 10;

/// Computes and caches per-metric statistical baselines.
pub struct BaselineTracker {
    repo: Arc<dyn MetricsRepository>,
    baselines: RwLock<HashMap<String, BaselineRow>>,
}

impl BaselineTracker {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self {
            repo,
            baselines: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the persisted table into memory (startup warm-up).
    pub async fn load_persisted(&self) {
        match self.repo.load_baselines().await {
            Ok(rows) => {
                let mut map = self.baselines.write().unwrap_or_else(|p| p.into_inner());
                *map = rows
                    .into_iter()
                    .map(|row| (row.metric_name.clone(), row))
                    .collect();
                info!(count = map.len(), "Loaded persisted baselines");
            }
            Err(e) => error!(error = %e, "Failed to load persisted baselines"),
        }
    }

    /// Recomputes baselines for system metrics, SDK metrics and span
    /// durations, then persists the full snapshot.
    pub async fn update_baselines(&self) {
        let since = Utc::now() - Duration::days(BASELINE_WINDOW_DAYS);

        let mut updated: HashMap<String, BaselineRow> = HashMap::new();

        match self.repo.compute_metric_baselines(since, MIN_SAMPLES).await {
            Ok(rows) => {
                for row in rows {
                    updated.insert(row.metric_name.clone(), row);
                }
            }
            Err(e) => {
                error!(error = %e, "Baseline refresh failed for system metrics");
                return;
            }
        }

        match self.repo.compute_sdk_baselines(since, MIN_SAMPLES).await {
            Ok(rows) => {
                for row in rows {
                    updated.insert(row.metric_name.clone(), row);
                }
            }
            Err(e) => error!(error = %e, "Baseline refresh failed for SDK metrics"),
        }

        let snapshot: Vec<BaselineRow> = updated.values().cloned().collect();
        {
            let mut map = self.baselines.write().unwrap_or_else(|p| p.into_inner());
            *map = updated;
        }

        if let Err(e) = self.repo.upsert_baselines(snapshot).await {
            error!(error = %e, "Failed to persist baselines");
        }

        let count = self.baselines.read().unwrap_or_else(|p| p.into_inner()).len();
        info!(count, "Baselines updated");
    }

    /// Baseline for one metric, if known.
    pub fn get_baseline(&self, metric_name: &str) -> Option<BaselineRow> {
        self.baselines
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(metric_name)
            .cloned()
    }

    /// Number of tracked metrics.
    pub fn len(&self) -> usize {
        self.baselines.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders baselines for the agent system prompt.
    pub fn format_for_prompt(&self) -> String {
        let map = self.baselines.read().unwrap_or_else(|p| p.into_inner());
        if map.is_empty() {
            return String::new();
        }

        let mut rows: Vec<&BaselineRow> = map.values().collect();
        rows.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));
        rows.iter()
            .map(|b| {
                format!(
                    "- {}: mean={:.1}, p50={:.1}, p95={:.1}, p99={:.1} (n={})",
                    b.metric_name, b.mean, b.p50, b.p95, b.p99, b.sample_count
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replaces the in-memory map directly (used by tests and warm starts).
    pub fn set_baselines(&self, rows: Vec<BaselineRow>) {
        let mut map = self.baselines.write().unwrap_or_else(|p| p.into_inner());
        *map = rows
            .into_iter()
            .map(|row| (row.metric_name.clone(), row))
            .collect();
    }
}

#[cfg(test)]
pub(crate) fn baseline(metric: &str, mean: f64, stddev: f64) -> BaselineRow {
    BaselineRow {
        metric_name: metric.to_string(),
        mean,
        stddev,
        min: 0.0,
        max: mean * 2.0,
        p50: mean,
        p95: mean * 1.5,
        p99: mean * 1.8,
        sample_count: 100,
        as_of: Utc::now(),
    }
}
