// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Telemetry collectors.
//!
//! Each collector is a periodic producer: sample, classify, publish to the
//! bus, write to the store best-effort. Collectors share one contract
//! ([`Collector`]) and one driver ([`spawn_collector`]) that owns the
//! interval loop and the stop signal.

pub mod log_watcher;
pub mod process_monitor;
pub mod sdk_telemetry;
pub mod security_scanner;
pub mod system_metrics;

pub use log_watcher::LogWatcher;
pub use process_monitor::ProcessMonitor;
pub use sdk_telemetry::SdkTelemetryMonitor;
pub use security_scanner::SecurityScanner;
pub use system_metrics::SystemMetricsCollector;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A periodic telemetry producer.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Collector name for logs.
    fn name(&self) -> &'static str;

    /// Sampling interval.
    fn interval(&self) -> Duration;

    /// One sampling pass. Errors are the collector's own business: ticks
    /// log and swallow internally so the loop never dies.
    async fn tick(&self);
}

/// Drives a collector until the cancellation token fires.
pub fn spawn_collector(
    collector: Arc<dyn Collector>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(collector.interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            collector = collector.name(),
            interval_secs = collector.interval().as_secs(),
            "Collector started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(collector = collector.name(), "Collector stopped");
                    return;
                }
                _ = tick.tick() => collector.tick().await,
            }
        }
    })
}
