// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process table monitoring: crashes, OOM kills, restart loops.

use super::Collector;
use crate::events::{Event, EventBus, EventClassifier, EventSource, EventType};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;
use tracing::debug;

/// Restarts within the tracking window before a loop is declared.
const RESTART_LOOP_THRESHOLD: u32 = 3;
/// A process must be seen this many times before its disappearance counts.
const MIN_SIGHTINGS_FOR_CRASH: u32 = 2;

#[derive(Debug, Clone)]
struct TrackedProcess {
    pid: u32,
    sightings: u32,
    restarts: u32,
    restart_loop_reported: bool,
}

#[derive(Default)]
struct MonitorState {
    processes: HashMap<String, TrackedProcess>,
    last_oom_kills: Option<u64>,
}

/// Watches the process table for disappearances, pid churn, and OOM kills.
pub struct ProcessMonitor {
    bus: Arc<EventBus>,
    classifier: Arc<EventClassifier>,
    interval: Duration,
    system: Mutex<System>,
    state: Mutex<MonitorState>,
    /// Override for the vmstat path (tests)
    vmstat_path: String,
}

impl ProcessMonitor {
    pub fn new(bus: Arc<EventBus>, classifier: Arc<EventClassifier>, interval: Duration) -> Self {
        Self {
            bus,
            classifier,
            interval,
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
            )),
            state: Mutex::new(MonitorState::default()),
            vmstat_path: "/proc/vmstat".to_string(),
        }
    }

    #[cfg(test)]
    fn with_vmstat_path(mut self, path: impl Into<String>) -> Self {
        self.vmstat_path = path.into();
        self
    }

    /// Cumulative OOM kill count from /proc/vmstat, if available.
    async fn read_oom_kills(&self) -> Option<u64> {
        let text = tokio::fs::read_to_string(&self.vmstat_path).await.ok()?;
        text.lines()
            .find_map(|line| line.strip_prefix("oom_kill "))
            .and_then(|value| value.trim().parse().ok())
    }

    fn publish(&self, event: Event) {
        self.bus.publish(self.classifier.classify(event));
    }

    /// Diffs the current process table against the tracked snapshot.
    fn diff_processes(&self, state: &mut MonitorState, current: HashMap<String, u32>) -> Vec<Event> {
        let mut events = Vec::new();

        // Disappeared processes
        let gone: Vec<String> = state
            .processes
            .iter()
            .filter(|(name, tracked)| {
                !current.contains_key(*name) && tracked.sightings >= MIN_SIGHTINGS_FOR_CRASH
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in gone {
            let tracked = state.processes.remove(&name);
            debug!(process = %name, "Tracked process disappeared");
            events.push(
                Event::new(EventSource::ProcessMonitor, EventType::ProcessCrashed)
                    .with_message(format!("Process '{name}' disappeared"))
                    .with_field("process_name", json!(name))
                    .with_field("last_pid", json!(tracked.map(|t| t.pid).unwrap_or(0))),
            );
        }
        // Forget short-lived names that never stabilized
        state
            .processes
            .retain(|name, _| current.contains_key(name));

        // New or restarted processes
        for (name, pid) in current {
            match state.processes.get_mut(&name) {
                None => {
                    state.processes.insert(
                        name,
                        TrackedProcess {
                            pid,
                            sightings: 1,
                            restarts: 0,
                            restart_loop_reported: false,
                        },
                    );
                }
                Some(tracked) => {
                    tracked.sightings += 1;
                    if tracked.pid != pid {
                        tracked.pid = pid;
                        tracked.restarts += 1;
                        if tracked.restarts >= RESTART_LOOP_THRESHOLD
                            && !tracked.restart_loop_reported
                        {
                            tracked.restart_loop_reported = true;
                            events.push(
                                Event::new(
                                    EventSource::ProcessMonitor,
                                    EventType::ProcessRestartLoop,
                                )
                                .with_severity(crate::events::EventSeverity::Notable)
                                .with_message(format!("Process '{name}' is restarting repeatedly"))
                                .with_field("process_name", json!(name))
                                .with_field("restart_count", json!(tracked.restarts)),
                            );
                        }
                    }
                }
            }
        }

        events
    }
}

#[async_trait]
impl Collector for ProcessMonitor {
    fn name(&self) -> &'static str {
        "process_monitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        let current: HashMap<String, u32> = {
            let mut system = self.system.lock().await;
            system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
            system
                .processes()
                .iter()
                .filter_map(|(pid, process)| {
                    let name = process.name().to_str()?.to_string();
                    Some((name, pid.as_u32()))
                })
                .collect()
        };

        let oom_kills = self.read_oom_kills().await;

        let events = {
            let mut state = self.state.lock().await;

            let mut events = self.diff_processes(&mut state, current);

            // OOM kill counter moved since the last pass
            if let (Some(current_kills), Some(previous)) = (oom_kills, state.last_oom_kills) {
                if current_kills > previous {
                    events.push(
                        Event::new(EventSource::ProcessMonitor, EventType::ProcessOomKilled)
                            .with_message(format!(
                                "Kernel OOM killer fired ({} new kill(s))",
                                current_kills - previous
                            ))
                            .with_field("new_kills", json!(current_kills - previous)),
                    );
                }
            }
            if let Some(current_kills) = oom_kills {
                state.last_oom_kills = Some(current_kills);
            }

            events
        };

        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSeverity, SubscribeFilter};
    use std::io::Write;
    use tokio::sync::Mutex as AsyncMutex;

    fn monitor() -> ProcessMonitor {
        ProcessMonitor::new(
            Arc::new(EventBus::new()),
            Arc::new(EventClassifier::new()),
            Duration::from_secs(30),
        )
    }

    fn table(entries: &[(&str, u32)]) -> HashMap<String, u32> {
        entries
            .iter()
            .map(|(name, pid)| (name.to_string(), *pid))
            .collect()
    }

    #[test]
    fn test_disappearance_after_stable_sightings_is_crash() {
        let m = monitor();
        let mut state = MonitorState::default();

        // Two sightings establish the process, then it vanishes
        assert!(m.diff_processes(&mut state, table(&[("webapp", 100)])).is_empty());
        assert!(m.diff_processes(&mut state, table(&[("webapp", 100)])).is_empty());
        let events = m.diff_processes(&mut state, table(&[]));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ProcessCrashed);
        assert_eq!(events[0].data_str("process_name"), Some("webapp"));
    }

    #[test]
    fn test_single_sighting_disappearance_ignored() {
        let m = monitor();
        let mut state = MonitorState::default();

        m.diff_processes(&mut state, table(&[("one-shot", 42)]));
        let events = m.diff_processes(&mut state, table(&[]));
        assert!(events.is_empty());
    }

    #[test]
    fn test_restart_loop_detection() {
        let m = monitor();
        let mut state = MonitorState::default();

        let mut all_events = Vec::new();
        for pid in [100u32, 101, 102, 103, 104] {
            all_events.extend(m.diff_processes(&mut state, table(&[("flaky", pid)])));
        }

        let loops: Vec<_> = all_events
            .iter()
            .filter(|e| e.event_type == EventType::ProcessRestartLoop)
            .collect();
        // Reported exactly once despite continued churn
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].data_f64("restart_count"), Some(3.0));
    }

    #[tokio::test]
    async fn test_oom_counter_increment_publishes_urgent() {
        let dir = tempfile::tempdir().unwrap();
        let vmstat = dir.path().join("vmstat");
        let write_vmstat = |kills: u64| {
            let mut f = std::fs::File::create(&vmstat).unwrap();
            writeln!(f, "nr_free_pages 12345").unwrap();
            writeln!(f, "oom_kill {kills}").unwrap();
        };
        write_vmstat(2);

        let bus = Arc::new(EventBus::new());
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();
        bus.subscribe(
            "oom",
            SubscribeFilter::severities([EventSeverity::Urgent]),
            move |event| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event);
                })
            },
        );

        let monitor = ProcessMonitor::new(
            bus.clone(),
            Arc::new(EventClassifier::new()),
            Duration::from_secs(30),
        )
        .with_vmstat_path(vmstat.display().to_string());

        monitor.tick().await; // establishes the counter
        write_vmstat(3);
        monitor.tick().await; // increment detected
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = received.lock().await;
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::ProcessOomKilled));
    }
}
