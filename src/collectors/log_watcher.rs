// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Log tailing: indexing, error bursts, new error shapes.
//!
//! Each pass reads every configured file from its last offset, indexes the
//! new lines, and derives two conditions: a burst of errors within one pass
//! and error shapes never seen before (normalized via the same fingerprint
//! used for SDK error grouping).

use super::Collector;
use crate::events::{Event, EventBus, EventClassifier, EventSource, EventType};
use crate::storage::models::LogEntryRow;
use crate::storage::{error_fingerprint, MetricsRepository};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Errors within one pass before an error_burst fires.
const ERROR_BURST_THRESHOLD: usize = 10;
/// Preview stored per indexed line.
const PREVIEW_CHARS: usize = 300;
/// Cap on bytes consumed per file per pass.
const MAX_READ_BYTES: u64 = 1024 * 1024;

#[derive(Default)]
struct WatcherState {
    offsets: HashMap<PathBuf, u64>,
    seen_fingerprints: HashSet<String>,
}

/// Tails configured log files and classifies what it finds.
pub struct LogWatcher {
    bus: Arc<EventBus>,
    classifier: Arc<EventClassifier>,
    repo: Arc<dyn MetricsRepository>,
    paths: Vec<PathBuf>,
    interval: Duration,
    state: Mutex<WatcherState>,
}

fn line_severity(line: &str) -> Option<&'static str> {
    let upper = line.to_uppercase();
    if upper.contains("ERROR") || upper.contains("CRITICAL") || upper.contains("FATAL") {
        Some("error")
    } else if upper.contains("WARN") {
        Some("warning")
    } else {
        None
    }
}

impl LogWatcher {
    pub fn new(
        bus: Arc<EventBus>,
        classifier: Arc<EventClassifier>,
        repo: Arc<dyn MetricsRepository>,
        paths: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            classifier,
            repo,
            paths: paths.into_iter().map(PathBuf::from).collect(),
            interval,
            state: Mutex::new(WatcherState::default()),
        }
    }

    /// Reads new content from one file, starting at the stored offset.
    /// Rotation/truncation resets the offset to zero.
    async fn read_new(&self, path: &PathBuf, offset: u64) -> std::io::Result<(String, u64)> {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let start = if offset > len { 0 } else { offset };
        let to_read = (len - start).min(MAX_READ_BYTES);

        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buffer = vec![0u8; to_read as usize];
        file.read_exact(&mut buffer).await?;

        Ok((String::from_utf8_lossy(&buffer).into_owned(), start + to_read))
    }

    async fn process_lines(&self, path: &PathBuf, base_offset: u64, text: &str) -> (usize, Vec<String>) {
        let mut error_count = 0usize;
        let mut new_patterns = Vec::new();
        let mut offset = base_offset;

        for line in text.lines() {
            offset += line.len() as u64 + 1;
            let Some(severity) = line_severity(line) else {
                continue;
            };

            let row = LogEntryRow {
                path: path.display().to_string(),
                offset,
                severity: severity.to_string(),
                preview: line.chars().take(PREVIEW_CHARS).collect(),
                source: "log_watcher".to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.repo.insert_log_entry(row).await {
                debug!(error = %e, "Log index write failed");
            }

            if severity == "error" {
                error_count += 1;
                let fingerprint = error_fingerprint("log", line);
                let mut state = self.state.lock().await;
                if state.seen_fingerprints.insert(fingerprint) {
                    new_patterns.push(line.chars().take(PREVIEW_CHARS).collect());
                }
            }
        }

        (error_count, new_patterns)
    }
}

#[async_trait]
impl Collector for LogWatcher {
    fn name(&self) -> &'static str {
        "log_watcher"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        for path in &self.paths {
            let offset = {
                let state = self.state.lock().await;
                state.offsets.get(path).copied().unwrap_or(0)
            };

            let (text, new_offset) = match self.read_new(path, offset).await {
                Ok(read) => read,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Log file unavailable");
                    continue;
                }
            };

            // First pass only records the offset so history is not replayed
            let first_pass = offset == 0 && !text.is_empty() && {
                let state = self.state.lock().await;
                !state.offsets.contains_key(path)
            };

            {
                let mut state = self.state.lock().await;
                state.offsets.insert(path.clone(), new_offset);
            }
            if first_pass {
                continue;
            }

            let (error_count, new_patterns) = self.process_lines(path, offset, &text).await;

            if error_count >= ERROR_BURST_THRESHOLD {
                warn!(path = %path.display(), error_count, "Error burst");
                self.bus.publish(
                    self.classifier.classify(
                        Event::new(EventSource::LogWatcher, EventType::ErrorBurst)
                            .with_message(format!(
                                "{} errors in {} within one sampling window",
                                error_count,
                                path.display()
                            ))
                            .with_field("path", json!(path.display().to_string()))
                            .with_field("error_count", json!(error_count)),
                    ),
                );
            }

            for pattern in new_patterns {
                self.bus.publish(
                    self.classifier.classify(
                        Event::new(EventSource::LogWatcher, EventType::NewErrorPattern)
                            .with_message(format!("New error shape in {}: {pattern}", path.display()))
                            .with_field("path", json!(path.display().to_string()))
                            .with_field("sample", json!(pattern)),
                    ),
                );
            }
        }
    }
}
