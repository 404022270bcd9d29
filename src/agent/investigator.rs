// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Autonomous AI investigation pipeline.
//!
//! A bounded queue feeds a fixed worker pool. Admission is non-blocking and
//! budget-gated: requests that do not fit the urgent budget or the queue are
//! dropped with an explicit status, never silently. Workers stream their
//! reasoning through the broadcaster and hand the final summary to the alert
//! formatter for external delivery.

use super::memory::ConversationMemory;
use super::prompt::build_system_prompt;
use super::react::{AgentEvent, AgentLoop, EventCallback};
use crate::budget::{BudgetPriority, TokenBudget};
use crate::config::Mode;
use crate::events::{Event, EventType};
use crate::llm::LlmProvider;
use crate::protocol::{Broadcaster, ServerMessage};
use crate::storage::models::InvestigationRow;
use crate::storage::OperationalRepository;
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Maximum queued investigations before drops kick in.
const QUEUE_CAPACITY: usize = 32;
/// Fixed worker pool size.
const WORKER_COUNT: usize = 2;
/// Estimated token cost used for admission checks.
const ESTIMATED_INVESTIGATION_TOKENS: u64 = 4000;

/// Priority carried by an investigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigationPriority {
    Normal,
    Urgent,
}

impl From<InvestigationPriority> for BudgetPriority {
    fn from(p: InvestigationPriority) -> Self {
        match p {
            InvestigationPriority::Normal => BudgetPriority::Normal,
            InvestigationPriority::Urgent => BudgetPriority::Urgent,
        }
    }
}

/// A queued investigation.
#[derive(Debug, Clone)]
pub struct InvestigationRequest {
    pub investigation_id: String,
    pub event: Event,
    pub priority: InvestigationPriority,
    pub enqueued_at: DateTime<Utc>,
}

impl InvestigationRequest {
    pub fn new(event: Event, priority: InvestigationPriority) -> Self {
        Self {
            investigation_id: Uuid::new_v4().to_string(),
            event,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    Queued,
    DroppedBudget,
    DroppedQueueFull,
}

/// Narrow capability the alert engine holds to trigger investigations.
pub trait InvestigationEnqueuer: Send + Sync {
    fn enqueue_investigation(&self, request: InvestigationRequest) -> EnqueueStatus;
}

/// Narrow capability for delivering finished reports externally.
#[async_trait]
pub trait InvestigationReportSink: Send + Sync {
    async fn send_investigation_report(&self, event: &Event, summary: &str);
}

/// Orchestrates autonomous AI investigations.
pub struct Investigator {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Arc<ToolRegistry>,
    budget: Arc<TokenBudget>,
    broadcaster: Broadcaster,
    repo: Arc<dyn OperationalRepository>,
    report_sink: Mutex<Option<Arc<dyn InvestigationReportSink>>>,
    mode: Mode,
    queue_tx: mpsc::Sender<InvestigationRequest>,
    queue_rx: Mutex<Option<mpsc::Receiver<InvestigationRequest>>>,
    cancel: CancellationToken,
}

impl Investigator {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        tools: Arc<ToolRegistry>,
        budget: Arc<TokenBudget>,
        broadcaster: Broadcaster,
        repo: Arc<dyn OperationalRepository>,
        mode: Mode,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            provider,
            tools,
            budget,
            broadcaster,
            repo,
            report_sink: Mutex::new(None),
            mode,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Wires the external report sink (the alert formatter).
    pub async fn set_report_sink(&self, sink: Arc<dyn InvestigationReportSink>) {
        *self.report_sink.lock().await = Some(sink);
    }

    /// Starts the worker pool. Workers share one queue receiver.
    pub async fn start(self: &Arc<Self>) {
        let rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .expect("Investigator already started");
        let shared_rx = Arc::new(Mutex::new(rx));

        for _ in 0..WORKER_COUNT {
            let this = self.clone();
            let rx = shared_rx.clone();
            tokio::spawn(async move {
                this.worker_loop(rx).await;
            });
        }
        info!(workers = WORKER_COUNT, "Investigator started");
    }

    /// Cancels all workers. In-flight runs stop at their next await point;
    /// partial progress is discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
        info!("Investigator stopped");
    }

    async fn worker_loop(self: Arc<Self>, rx: Arc<Mutex<mpsc::Receiver<InvestigationRequest>>>) {
        loop {
            // Workers contend on the receiver lock only while idle, so two
            // investigations still run concurrently and dequeue stays FIFO.
            let request = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    request = rx.recv() => request,
                }
            };
            let Some(request) = request else { return };

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.run_investigation(request) => {}
            }
        }
    }

    async fn run_investigation(&self, request: InvestigationRequest) {
        let Some(provider) = self.provider.clone() else {
            warn!("No LLM provider available for investigation");
            return;
        };
        let event = &request.event;
        let investigation_id = request.investigation_id.clone();

        self.broadcaster.send(ServerMessage::InvestigationStart {
            investigation_id: investigation_id.clone(),
            trigger: if event.message.is_empty() {
                event.event_type.to_string()
            } else {
                event.message.clone()
            },
            severity: event.severity,
        });

        let prompt = build_investigation_prompt(event);
        let mut memory = ConversationMemory::new("investigation");

        let broadcaster = self.broadcaster.clone();
        let stream_id = investigation_id.clone();
        let callback: EventCallback = Arc::new(move |agent_event| {
            let broadcaster = broadcaster.clone();
            let stream_id = stream_id.clone();
            Box::pin(async move {
                if let AgentEvent::MessageDelta { content } = agent_event {
                    broadcaster.send(ServerMessage::InvestigationUpdate {
                        investigation_id: stream_id,
                        content,
                    });
                }
            })
        });

        let agent = AgentLoop::new(
            provider,
            self.tools.clone(),
            build_system_prompt("web", self.mode, ""),
        )
        .with_callback(callback)
        .with_budget(self.budget.clone());

        let outcome = agent.run(&mut memory, &prompt).await;

        let (summary, tokens_used, status) = match &outcome {
            Ok(result) => (
                result.content.clone(),
                result.prompt_tokens + result.completion_tokens,
                "completed",
            ),
            Err(e) => {
                error!(error = %e, event_type = %event.event_type, "Investigation failed");
                ("Investigation failed".to_string(), 0, "failed")
            }
        };

        self.broadcaster.send(ServerMessage::InvestigationEnd {
            investigation_id: investigation_id.clone(),
            summary: summary.clone(),
            tokens_used,
        });

        if let Err(e) = self
            .repo
            .insert_investigation(InvestigationRow {
                investigation_id: investigation_id.clone(),
                trigger: event.event_type.to_string(),
                severity: event.severity.to_string(),
                status: status.to_string(),
                summary: summary.clone(),
                tokens_used,
                timestamp: Utc::now(),
            })
            .await
        {
            error!(error = %e, "Failed to persist investigation record");
        }

        if status == "completed" && !summary.is_empty() {
            if let Some(sink) = self.report_sink.lock().await.clone() {
                sink.send_investigation_report(event, &summary).await;
            }
        }

        info!(
            investigation_id = %investigation_id,
            status,
            tokens_used,
            "Investigation finished"
        );
    }

    /// Tier 3: periodic review of recent events/metrics/alerts.
    pub async fn periodic_review(&self) {
        if !self.budget.can_spend(3000, BudgetPriority::Normal) {
            info!("Budget insufficient for periodic review, skipping");
            return;
        }
        let Some(provider) = self.provider.clone() else { return };

        let prompt = "Review the recent system events, metrics, and alerts. Provide a brief \
                      summary of system health and any concerns. Use the available tools to \
                      check current metrics and recent events.";
        let mut memory = ConversationMemory::new("periodic_review");
        let agent = AgentLoop::new(
            provider,
            self.tools.clone(),
            build_system_prompt("web", self.mode, ""),
        )
        .with_budget(self.budget.clone());

        match agent.run(&mut memory, prompt).await {
            Ok(result) if !result.content.is_empty() => {
                self.broadcaster.send(ServerMessage::InvestigationEnd {
                    investigation_id: Uuid::new_v4().to_string(),
                    summary: result.content,
                    tokens_used: result.prompt_tokens + result.completion_tokens,
                });
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Periodic review failed"),
        }
    }

    /// Tier 3: comprehensive daily report.
    pub async fn daily_digest(&self) {
        if !self.budget.can_spend(5000, BudgetPriority::Normal) {
            info!("Budget insufficient for daily digest, skipping");
            return;
        }
        let Some(provider) = self.provider.clone() else { return };

        let prompt = "Generate a comprehensive daily system report. Include: \
                      1) Overall system health assessment \
                      2) Key metrics trends (CPU, memory, disk) \
                      3) Notable events and alerts from the past 24 hours \
                      4) Security observations \
                      5) Recommendations for improvement. \
                      Use the available tools to gather current data.";
        let mut memory = ConversationMemory::new("daily_digest");
        let agent = AgentLoop::new(
            provider,
            self.tools.clone(),
            build_system_prompt("web", self.mode, ""),
        )
        .with_budget(self.budget.clone());

        match agent.run(&mut memory, prompt).await {
            Ok(result) if !result.content.is_empty() => {
                self.broadcaster.send(ServerMessage::InvestigationEnd {
                    investigation_id: Uuid::new_v4().to_string(),
                    summary: result.content,
                    tokens_used: result.prompt_tokens + result.completion_tokens,
                });
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Daily digest failed"),
        }
    }
}

impl InvestigationEnqueuer for Investigator {
    /// Non-blocking admission: budget first, then queue capacity.
    fn enqueue_investigation(&self, request: InvestigationRequest) -> EnqueueStatus {
        if !self
            .budget
            .can_spend(ESTIMATED_INVESTIGATION_TOKENS, request.priority.into())
        {
            warn!(event_type = %request.event.event_type, "Investigation dropped: budget");
            return EnqueueStatus::DroppedBudget;
        }

        match self.queue_tx.try_send(request) {
            Ok(()) => EnqueueStatus::Queued,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(event_type = %request.event.event_type, "Investigation dropped: queue full");
                EnqueueStatus::DroppedQueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueStatus::DroppedQueueFull,
        }
    }
}

/// Builds the focused prompt for an event investigation.
fn build_investigation_prompt(event: &Event) -> String {
    let mut lines = vec![
        "URGENT INVESTIGATION REQUIRED".to_string(),
        String::new(),
        format!("Event Type: {}", event.event_type),
        format!("Severity: {}", event.severity),
        format!("Source: {}", event.source),
        format!("Message: {}", event.message),
    ];
    if !event.data.is_empty() {
        lines.push(format!(
            "Data: {}",
            serde_json::to_string(&event.data).unwrap_or_default()
        ));
    }
    lines.extend([
        String::new(),
        "Investigate this issue using the available tools. Check relevant metrics, logs, \
         processes, and network connections. Provide a clear summary of:"
            .to_string(),
        "1. What is happening".to_string(),
        "2. Likely root cause".to_string(),
        "3. Recommended actions".to_string(),
    ]);

    if event.event_type == EventType::SdkTrafficBurst {
        lines.extend([
            String::new(),
            "TRAFFIC BURST INVESTIGATION GUIDANCE:".to_string(),
            "Determine whether this is a DDoS attack or an organic traffic surge.".to_string(),
            "DDoS indicators: single-IP concentration, repeated identical requests, unusual \
             user agents, high error rates under load."
                .to_string(),
            "Organic surge indicators: gradual ramp-up, diverse source IPs, normal error \
             rates, recognizable referrer patterns."
                .to_string(),
            "Check request logs for IP distribution, path patterns, and error rates.".to_string(),
        ]);
    }

    lines.join("\n")
}
