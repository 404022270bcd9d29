// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Application state: one root struct wiring every component.
//!
//! Construction is dependency-ordered (storage → bus → alerting → AI →
//! actions → tools); the call cycles from the design are broken with narrow
//! capability traits wired after construction (`set_investigator`,
//! `set_report_sink`).

use crate::actions::{ActionEngine, AuditLogger, CommandSandbox};
use crate::agent::{InvestigationEnqueuer, Investigator};
use crate::alerting::{
    default_rules, AlertEngine, AlertFormatter, NotificationChannel, StreamChannel, WebhookChannel,
};
use crate::baseline::{AnomalyDetector, BaselineTracker};
use crate::budget::TokenBudget;
use crate::collectors::{
    spawn_collector, Collector, LogWatcher, ProcessMonitor, SdkTelemetryMonitor, SecurityScanner,
    SystemMetricsCollector,
};
use crate::config::Settings;
use crate::events::{EventBus, EventClassifier, EventSeverity};
use crate::ingest::IngestService;
use crate::llm::{build_provider, LlmProvider};
use crate::protocol::{Broadcaster, ClientMessage, ServerMessage};
use crate::scheduler;
use crate::storage::surreal::{SurrealMetricsRepository, SurrealOperationalRepository};
use crate::storage::{MetricsRepository, OperationalRepository};
use crate::tools::{
    alert_management::AlertManagementTool, deploys::DependencyTool, deploys::DeployHistoryTool,
    log_search::LogSearchTool, metrics::FunctionMetricsTool, metrics::QueryMetricsTool,
    metrics::ServiceSummaryTool, recent_events::RecentEventsTool, run_command::RunCommandTool,
    traces::ErrorGroupsTool, traces::ListTracesTool, traces::SlowSpansTool, ToolRegistry,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Interval between baseline refreshes.
const BASELINE_REFRESH_HOURS: u64 = 6;
/// Tier 1 health check interval.
const HEALTH_CHECK_SECS: u64 = 300;
/// Tier 2 trend analysis interval.
const TREND_ANALYSIS_SECS: u64 = 1800;

/// Root application state shared across the transports.
pub struct AppState {
    pub settings: Settings,
    pub bus: Arc<EventBus>,
    pub classifier: Arc<EventClassifier>,
    pub metrics_repo: Arc<dyn MetricsRepository>,
    pub operational_repo: Arc<dyn OperationalRepository>,
    pub budget: Arc<TokenBudget>,
    pub broadcaster: Broadcaster,
    pub formatter: Arc<AlertFormatter>,
    pub alert_engine: Arc<AlertEngine>,
    pub investigator: Arc<Investigator>,
    pub action_engine: Arc<ActionEngine>,
    pub tools: Arc<ToolRegistry>,
    pub baseline_tracker: Arc<BaselineTracker>,
    pub ingest: Arc<IngestService>,
    provider: Option<Arc<dyn LlmProvider>>,
    cancel: CancellationToken,
    chat_cancel: Mutex<Option<CancellationToken>>,
}

impl AppState {
    /// Builds and wires every component. Nothing is running yet; call
    /// [`AppState::start`] afterwards.
    pub async fn new(settings: Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.storage.data_dir)
            .with_context(|| format!("Failed to create data dir {}", settings.storage.data_dir))?;

        // Storage
        let metrics_repo: Arc<dyn MetricsRepository> = Arc::new(
            SurrealMetricsRepository::open(
                settings
                    .storage
                    .metrics_db_path()
                    .to_str()
                    .context("Invalid metrics db path")?,
            )
            .await?,
        );
        let operational_repo: Arc<dyn OperationalRepository> = Arc::new(
            SurrealOperationalRepository::open(
                settings
                    .storage
                    .operational_db_path()
                    .to_str()
                    .context("Invalid operational db path")?,
            )
            .await?,
        );

        // Pipeline primitives
        let bus = Arc::new(EventBus::new());
        let classifier = Arc::new(EventClassifier::new());
        let broadcaster = Broadcaster::default();
        let budget = Arc::new(TokenBudget::new(
            settings.ai_budget.daily_token_limit,
            settings.ai_budget.hourly_token_limit,
            settings.ai_budget.priority_reserve,
        ));
        let provider = build_provider(&settings.llm);

        // Baselines
        let baseline_tracker = Arc::new(BaselineTracker::new(metrics_repo.clone()));

        // Delivery channels
        let http = Arc::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("Failed to build HTTP client")?,
        );
        let mut channels: Vec<Arc<dyn NotificationChannel>> =
            vec![Arc::new(StreamChannel::new(broadcaster.clone()))];
        for url in &settings.alerting.webhook_urls {
            channels.push(Arc::new(WebhookChannel::new(url.clone(), http.clone())));
        }

        let min_severity = settings
            .alerting
            .min_external_severity
            .parse()
            .unwrap_or(EventSeverity::Notable);
        let mut formatter = AlertFormatter::new(
            channels,
            Duration::from_secs(settings.alerting.batch_window),
            min_severity,
            settings.alerting.ai_enhance,
        );
        if settings.alerting.ai_enhance {
            if let Some(provider) = provider.clone() {
                formatter = formatter.with_ai(provider, budget.clone());
            }
        }
        let formatter = Arc::new(formatter);

        // Alerting
        let alert_engine = Arc::new(AlertEngine::new(
            default_rules(),
            formatter.clone(),
            operational_repo.clone(),
        ));

        // Actions
        let action_engine = Arc::new(ActionEngine::new(
            CommandSandbox::new(&settings.collector.host_root),
            AuditLogger::new(operational_repo.clone()),
            broadcaster.clone(),
        ));

        // Tools
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(QueryMetricsTool::new(metrics_repo.clone())));
        tools.register(Arc::new(ServiceSummaryTool::new(metrics_repo.clone())));
        tools.register(Arc::new(FunctionMetricsTool::new(metrics_repo.clone())));
        tools.register(Arc::new(ListTracesTool::new(metrics_repo.clone())));
        tools.register(Arc::new(SlowSpansTool::new(metrics_repo.clone())));
        tools.register(Arc::new(ErrorGroupsTool::new(metrics_repo.clone())));
        tools.register(Arc::new(DeployHistoryTool::new(metrics_repo.clone())));
        tools.register(Arc::new(DependencyTool::new(metrics_repo.clone())));
        tools.register(Arc::new(LogSearchTool::new(
            settings.collector.log_paths.clone(),
        )));
        tools.register(Arc::new(AlertManagementTool::new(alert_engine.clone())));
        tools.register(Arc::new(RecentEventsTool::new(bus.clone())));
        tools.register(Arc::new(RunCommandTool::new(action_engine.clone())));
        let tools = Arc::new(tools);

        // AI pipeline
        let investigator = Arc::new(Investigator::new(
            provider.clone(),
            tools.clone(),
            budget.clone(),
            broadcaster.clone(),
            operational_repo.clone(),
            settings.mode,
        ));

        // Break the cycles with narrow capabilities
        alert_engine.set_investigator(investigator.clone() as Arc<dyn InvestigationEnqueuer>);
        investigator.set_report_sink(formatter.clone()).await;

        let ingest = Arc::new(IngestService::new(metrics_repo.clone()));

        let state = Self {
            bus,
            classifier,
            metrics_repo,
            operational_repo,
            budget,
            broadcaster,
            formatter,
            alert_engine,
            investigator,
            action_engine,
            tools,
            baseline_tracker,
            ingest,
            provider,
            cancel: CancellationToken::new(),
            chat_cancel: Mutex::new(None),
            settings,
        };
        info!(mode = ?state.settings.mode, "Application state initialized");
        Ok(state)
    }

    /// Starts subscribers, collectors, and periodic loops.
    pub async fn start(self: &Arc<Self>) {
        self.alert_engine.start(&self.bus).await;
        self.formatter.start();
        self.investigator.start().await;
        self.baseline_tracker.load_persisted().await;

        let detector = Arc::new(AnomalyDetector::new(self.baseline_tracker.clone()));

        // Collectors (host collectors only in full mode)
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
        if self.settings.mode == crate::config::Mode::Full {
            collectors.push(Arc::new(SystemMetricsCollector::new(
                self.bus.clone(),
                self.classifier.clone(),
                self.metrics_repo.clone(),
                Some(detector),
                Duration::from_secs(self.settings.collector.metrics_interval),
            )));
            collectors.push(Arc::new(ProcessMonitor::new(
                self.bus.clone(),
                self.classifier.clone(),
                Duration::from_secs(self.settings.collector.process_interval),
            )));
            collectors.push(Arc::new(LogWatcher::new(
                self.bus.clone(),
                self.classifier.clone(),
                self.metrics_repo.clone(),
                self.settings.collector.log_paths.clone(),
                Duration::from_secs(self.settings.collector.metrics_interval.max(10)),
            )));
            collectors.push(Arc::new(SecurityScanner::new(
                self.bus.clone(),
                self.classifier.clone(),
                self.settings
                    .collector
                    .log_paths
                    .iter()
                    .find(|p| p.contains("auth"))
                    .cloned()
                    .unwrap_or_else(|| "/var/log/auth.log".to_string()),
                Duration::from_secs(HEALTH_CHECK_SECS),
            )));
        }
        collectors.push(Arc::new(SdkTelemetryMonitor::new(
            self.bus.clone(),
            self.classifier.clone(),
            self.metrics_repo.clone(),
            Duration::from_secs(60),
        )));
        for collector in collectors {
            spawn_collector(collector, self.cancel.clone());
        }

        // Baseline refresh loop; first refresh happens shortly after boot
        {
            let tracker = self.baseline_tracker.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut tick =
                    tokio::time::interval(Duration::from_secs(BASELINE_REFRESH_HOURS * 3600));
                tick.tick().await;
                tracker.update_baselines().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tick.tick() => tracker.update_baselines().await,
                    }
                }
            });
        }

        // Tier 1/2 scheduler loops
        {
            let bus = self.bus.clone();
            let repo = self.metrics_repo.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut health = tokio::time::interval(Duration::from_secs(HEALTH_CHECK_SECS));
                let mut trend = tokio::time::interval(Duration::from_secs(TREND_ANALYSIS_SECS));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = health.tick() => scheduler::quick_health_check(&bus).await,
                        _ = trend.tick() => scheduler::trend_analysis(&bus, &repo).await,
                    }
                }
            });
        }

        // Tier 3 review loops plus periodic budget frames
        {
            let investigator = self.investigator.clone();
            let broadcaster = self.broadcaster.clone();
            let budget = self.budget.clone();
            let cancel = self.cancel.clone();
            let review_secs = (self.settings.ai_budget.review_frequency_hours * 3600).max(60);
            let digest_secs = (self.settings.ai_budget.digest_frequency_hours * 3600).max(60);
            tokio::spawn(async move {
                let mut review = tokio::time::interval(Duration::from_secs(review_secs));
                let mut digest = tokio::time::interval(Duration::from_secs(digest_secs));
                let mut budget_tick = tokio::time::interval(Duration::from_secs(600));
                // Skip the immediate first firing of the review/digest timers
                review.tick().await;
                digest.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = review.tick() => investigator.periodic_review().await,
                        _ = digest.tick() => investigator.daily_digest().await,
                        _ = budget_tick.tick() => {
                            let snapshot = budget.snapshot();
                            broadcaster.send(ServerMessage::BudgetUpdate {
                                data: serde_json::to_value(&snapshot).unwrap_or_default(),
                            });
                        }
                    }
                }
            });
        }

        info!("Agent started");
    }

    /// Stops everything with a bounded drain.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.investigator.stop();
        self.formatter.stop().await;
        if let Err(e) = self.metrics_repo.flush().await {
            warn!(error = %e, "Final metrics flush failed");
        }
        info!("Agent stopped");
    }

    /// Routes one client frame from the transport.
    pub async fn handle_client_message(self: &Arc<Self>, message: ClientMessage) {
        match message {
            ClientMessage::Ping => self.broadcaster.send(ServerMessage::Pong),
            ClientMessage::ActionResponse {
                action_id,
                approved,
                user,
            } => {
                // Stale ids are expected after timeouts; a false return is fine
                self.action_engine
                    .handle_response(&action_id, approved, &user);
            }
            ClientMessage::Cancel => {
                if let Some(token) = self.chat_cancel.lock().await.take() {
                    token.cancel();
                }
            }
            ClientMessage::UserMessage { content } => self.spawn_chat(content).await,
        }
    }

    /// Runs one chat turn on its own task, streaming through the broadcaster.
    async fn spawn_chat(self: &Arc<Self>, content: String) {
        let Some(provider) = self.provider.clone() else {
            self.broadcaster.send(ServerMessage::Error {
                message: "No LLM provider configured".to_string(),
            });
            return;
        };

        let cancel = CancellationToken::new();
        *self.chat_cancel.lock().await = Some(cancel.clone());

        let this = self.clone();
        tokio::spawn(async move {
            use crate::agent::{AgentEvent, AgentLoop, ConversationMemory, EventCallback};

            let broadcaster = this.broadcaster.clone();
            let callback: EventCallback = Arc::new(move |event| {
                let broadcaster = broadcaster.clone();
                Box::pin(async move {
                    let frame = match event {
                        AgentEvent::ThinkingStart => ServerMessage::ThinkingStart,
                        AgentEvent::ThinkingEnd => ServerMessage::ThinkingEnd,
                        AgentEvent::MessageDelta { content } => {
                            ServerMessage::AssistantMessageDelta { content }
                        }
                        AgentEvent::ToolCallStarted {
                            id,
                            name,
                            arguments,
                        } => ServerMessage::ToolCall {
                            id,
                            name,
                            arguments,
                        },
                        AgentEvent::ToolCallFinished {
                            id,
                            name,
                            result,
                            display_type,
                        } => ServerMessage::ToolResult {
                            id,
                            name,
                            result,
                            display_type,
                        },
                    };
                    broadcaster.send(frame);
                })
            });

            let system_prompt = crate::agent::prompt::build_system_prompt(
                "web",
                this.settings.mode,
                &this.baseline_tracker.format_for_prompt(),
            );
            let agent = AgentLoop::new(provider, this.tools.clone(), system_prompt)
                .with_callback(callback)
                .with_budget(this.budget.clone());
            let mut memory = ConversationMemory::new("user_chat");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Chat turn cancelled");
                }
                result = agent.run(&mut memory, &content) => {
                    if let Err(e) = result {
                        this.broadcaster.send(ServerMessage::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
        });
    }
}
