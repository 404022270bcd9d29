// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process event bus with per-subscriber filters.
//!
//! The bus is the single fan-out point of the pipeline. Each subscriber gets
//! its own queue and drain task, so delivery is FIFO per subscriber and a
//! slow or failing handler can never stall the publisher or its peers.

use super::types::{Event, EventSeverity, EventSource};
use futures::future::BoxFuture;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Number of recent events retained for diagnostics and startup replay.
const RING_CAPACITY: usize = 1024;

/// Boxed async event handler.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscriber {
    name: String,
    sources: Option<HashSet<EventSource>>,
    severities: Option<HashSet<EventSeverity>>,
    queue: mpsc::UnboundedSender<Event>,
    drain: tokio::task::JoinHandle<()>,
}

impl Subscriber {
    fn matches(&self, event: &Event) -> bool {
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(severities) = &self.severities {
            if !severities.contains(&event.severity) {
                return false;
            }
        }
        true
    }
}

/// Filter options for a subscription. `None` means "everything".
#[derive(Default)]
pub struct SubscribeFilter {
    pub sources: Option<HashSet<EventSource>>,
    pub severities: Option<HashSet<EventSeverity>>,
}

impl SubscribeFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches only the given severities.
    pub fn severities(severities: impl IntoIterator<Item = EventSeverity>) -> Self {
        Self {
            sources: None,
            severities: Some(severities.into_iter().collect()),
        }
    }

    /// Matches only the given sources.
    pub fn sources(sources: impl IntoIterator<Item = EventSource>) -> Self {
        Self {
            sources: Some(sources.into_iter().collect()),
            severities: None,
        }
    }
}

/// In-process publish/subscribe hub.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    ring: Mutex<VecDeque<Event>>,
    dropped: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Registers a handler with optional source/severity filters.
    ///
    /// The handler runs on a dedicated drain task. Panics inside a handler
    /// are caught per event and logged; they never take down the drain task
    /// or the bus.
    pub fn subscribe<F>(&self, name: impl Into<String>, filter: SubscribeFilter, handler: F)
    where
        F: Fn(Event) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let name = name.into();
        let handler: EventHandler = Arc::new(handler);
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let drain_name = name.clone();
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // One task per event so a panic is contained and surfaced
                // without killing this subscriber's queue.
                let fut = handler(event);
                if let Err(e) = tokio::spawn(fut).await {
                    warn!(subscriber = %drain_name, error = %e, "Event handler panicked");
                }
            }
        });

        let mut subs = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subs.push(Subscriber {
            name,
            sources: filter.sources,
            severities: filter.severities,
            queue: tx,
            drain,
        });
    }

    /// Publishes an event to all matching subscribers.
    ///
    /// Never blocks on subscriber progress: the event is enqueued on each
    /// matching subscriber's own queue and retained in the ring buffer.
    pub fn publish(&self, event: Event) {
        {
            let mut ring = self.ring.lock().unwrap_or_else(|p| p.into_inner());
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            ring.push_back(event.clone());
        }

        let subs = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        for sub in subs.iter() {
            if !sub.matches(&event) {
                continue;
            }
            if sub.queue.send(event.clone()).is_err() {
                debug!(subscriber = %sub.name, "Subscriber queue closed, skipping");
            }
        }
    }

    /// Returns up to `limit` most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let ring = self.ring.lock().unwrap_or_else(|p| p.into_inner());
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Total events evicted from the ring so far.
    pub fn dropped_from_ring(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Removes all subscribers and aborts their drain tasks.
    pub fn clear(&self) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        for sub in subs.drain(..) {
            sub.drain.abort();
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventType;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::{sleep, Duration};

    fn metric_event() -> Event {
        Event::new(EventSource::SystemMetrics, EventType::MetricCollected).with_message("test")
    }

    async fn settle() {
        // Let drain tasks run
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::new();
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();

        bus.subscribe("test", SubscribeFilter::all(), move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.push(event);
            })
        });

        bus.publish(metric_event());
        settle().await;

        let got = received.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, "test");
    }

    #[tokio::test]
    async fn test_source_filter() {
        let bus = EventBus::new();
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();

        bus.subscribe(
            "logs_only",
            SubscribeFilter::sources([EventSource::LogWatcher]),
            move |event| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event);
                })
            },
        );

        bus.publish(metric_event());
        bus.publish(Event::new(EventSource::LogWatcher, EventType::LogLine));
        settle().await;

        let got = received.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source, EventSource::LogWatcher);
    }

    #[tokio::test]
    async fn test_severity_filter() {
        let bus = EventBus::new();
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();

        bus.subscribe(
            "urgent_only",
            SubscribeFilter::severities([EventSeverity::Urgent]),
            move |event| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event);
                })
            },
        );

        bus.publish(metric_event());
        bus.publish(
            Event::new(EventSource::SystemMetrics, EventType::CpuHigh)
                .with_severity(EventSeverity::Urgent),
        );
        settle().await;

        let got = received.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].severity, EventSeverity::Urgent);
    }

    #[tokio::test]
    async fn test_recent_events() {
        let bus = EventBus::new();
        for i in 0..5 {
            bus.publish(metric_event().with_message(format!("event-{i}")));
        }

        let recent = bus.recent_events(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent.last().unwrap().message, "event-4");
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_break_bus() {
        let bus = EventBus::new();
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();

        bus.subscribe("bad", SubscribeFilter::all(), |_event| {
            Box::pin(async move {
                panic!("oops");
            })
        });
        bus.subscribe("good", SubscribeFilter::all(), move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.push(event);
            })
        });

        bus.publish(metric_event());
        // The panicking subscriber stays alive for subsequent events too
        bus.publish(metric_event());
        settle().await;

        assert_eq!(received.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_per_subscriber_fifo() {
        let bus = EventBus::new();
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();

        bus.subscribe("ordered", SubscribeFilter::all(), move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.push(event.message.clone());
            })
        });

        for i in 0..20 {
            bus.publish(metric_event().with_message(format!("{i}")));
        }
        settle().await;

        let got = received.lock().await;
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(*got, expected);
    }

    #[tokio::test]
    async fn test_ring_eviction() {
        let bus = EventBus::new();
        for _ in 0..(RING_CAPACITY + 10) {
            bus.publish(metric_event());
        }
        assert_eq!(bus.recent_events(usize::MAX).len(), RING_CAPACITY);
        assert_eq!(bus.dropped_from_ring(), 10);
    }

    #[tokio::test]
    async fn test_clear() {
        let bus = EventBus::new();
        bus.subscribe("temp", SubscribeFilter::all(), |_| Box::pin(async {}));
        assert_eq!(bus.subscriber_count(), 1);
        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
