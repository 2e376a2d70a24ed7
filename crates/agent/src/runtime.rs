//! Request lifecycle manager
//!
//! Drives one request through `pending -> processing -> completed|failed`:
//! route, raise worker load, fan out to every selected expert and wait for
//! all of them to settle, restore worker load, aggregate, finish.
//!
//! A failing expert is logged once and left out of aggregation. Only a defect
//! in the orchestration itself (an invalid transition or a panic) ends a
//! request as `failed`.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use arbiter_core::aggregation::DecisionAggregator;
use arbiter_core::config::AppConfig;
use arbiter_core::domain::analysis::AnalysisResult;
use arbiter_core::domain::decision::AggregateOutcome;
use arbiter_core::domain::log::{LogEntry, LogLevel};
use arbiter_core::domain::request::{Priority, Request, RequestId, RequestStatus};
use arbiter_core::domain::worker::{Worker, WorkerId};
use arbiter_core::errors::{ApplicationError, DomainError};
use arbiter_core::events::{EventCategory, EventOutcome, EventSink, PipelineEvent};
use arbiter_core::load::AgentLoadModel;
use arbiter_core::metrics::SystemMetrics;
use arbiter_core::routing::{RoutingPlan, RoutingSource};
use arbiter_db::repositories::{
    InMemoryLogRepository, InMemoryRequestRepository, InMemoryWorkerRepository, LogRepository,
    RequestRepository, RequestUpdate, WorkerRepository, WorkerUpdate,
};

use crate::experts::ExpertExecutor;
use crate::llm::InferenceProvider;
use crate::rate_limit::{RateLimitPolicy, RateLimitedClient};
use crate::router::RoutingEngine;

const LOG_SOURCE: &str = "orchestrator";

#[derive(Clone)]
pub struct PipelineStores {
    pub workers: Arc<dyn WorkerRepository>,
    pub requests: Arc<dyn RequestRepository>,
    pub logs: Arc<dyn LogRepository>,
}

impl PipelineStores {
    pub fn in_memory(config: &AppConfig, workers: Vec<Worker>) -> Self {
        Self {
            workers: Arc::new(InMemoryWorkerRepository::with_workers(workers)),
            requests: Arc::new(InMemoryRequestRepository::with_capacity(
                config.pipeline.history_capacity,
            )),
            logs: Arc::new(InMemoryLogRepository::with_capacity(config.pipeline.log_capacity)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerFailure {
    pub worker_id: WorkerId,
    pub error_class: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub request: Request,
    pub routing: Option<RoutingPlan>,
    pub results: Vec<AnalysisResult>,
    pub failures: Vec<WorkerFailure>,
    pub outcome: AggregateOutcome,
}

pub struct DispatchRuntime {
    router: RoutingEngine,
    experts: BTreeMap<WorkerId, ExpertExecutor>,
    load: Arc<AgentLoadModel>,
    aggregator: DecisionAggregator,
    stores: PipelineStores,
    events: Arc<dyn EventSink>,
}

impl DispatchRuntime {
    pub fn new(
        router: RoutingEngine,
        experts: Vec<ExpertExecutor>,
        load: Arc<AgentLoadModel>,
        aggregator: DecisionAggregator,
        stores: PipelineStores,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let experts = experts.into_iter().map(|expert| (expert.worker_id(), expert)).collect();
        Self { router, experts, load, aggregator, stores, events }
    }

    /// Wires the whole pipeline around `provider` with in-memory stores.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn InferenceProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let client = Arc::new(RateLimitedClient::new(
            provider,
            RateLimitPolicy::from_config(&config.inference),
        ));
        let load = Arc::new(AgentLoadModel::new(config.load.clone()));
        let stores = PipelineStores::in_memory(config, load.snapshot());

        Self::new(
            RoutingEngine::from_config(config, Arc::clone(&client)),
            ExpertExecutor::panel(&config.models, &config.inference, client),
            load,
            DecisionAggregator::default(),
            stores,
            events,
        )
    }

    pub fn load(&self) -> &AgentLoadModel {
        &self.load
    }

    pub fn stores(&self) -> &PipelineStores {
        &self.stores
    }

    pub async fn metrics(&self) -> Result<SystemMetrics, ApplicationError> {
        let requests = self
            .stores
            .requests
            .list_requests()
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        Ok(SystemMetrics::compute(&requests, &self.load.snapshot()))
    }

    /// Accepts a request and runs its pipeline in the background.
    pub fn accept(
        self: &Arc<Self>,
        request_type: impl Into<String>,
        priority: Priority,
    ) -> (RequestId, JoinHandle<PipelineReport>) {
        let request = Request::new(request_type, priority);
        let id = request.id.clone();
        let runtime = Arc::clone(self);
        let handle = tokio::spawn(async move { runtime.run(request).await });
        (id, handle)
    }

    /// Accepts a request and waits for it to reach a terminal status.
    pub async fn submit(&self, request_type: impl Into<String>, priority: Priority) -> PipelineReport {
        self.run(Request::new(request_type, priority)).await
    }

    async fn run(&self, request: Request) -> PipelineReport {
        if let Err(error) = self.stores.requests.add_request(request.clone()).await {
            warn!(
                event_name = "request.store.failed",
                request_id = %request.id,
                error = %error,
                "request could not be recorded"
            );
        }
        self.log(
            LogEntry::new(
                LogLevel::Info,
                LOG_SOURCE,
                format!(
                    "New request {}: {} ({} priority)",
                    request.id,
                    request.request_type,
                    request.priority.as_str()
                ),
            )
            .for_request(&request.id),
        )
        .await;
        self.events.publish(
            PipelineEvent::new("request.lifecycle.submitted", EventCategory::Request, EventOutcome::Success)
                .for_request(&request.id)
                .with_payload("request_type", request.request_type.clone())
                .with_payload("priority", request.priority.as_str()),
        );

        let mut progress = Progress::new(request);
        let orchestrated = AssertUnwindSafe(self.orchestrate(&mut progress)).catch_unwind().await;

        match orchestrated {
            Ok(Ok(outcome)) => progress.into_report(outcome),
            Ok(Err(defect)) => {
                self.recover(progress, defect.error_class(), defect.to_string()).await
            }
            Err(panic) => {
                let defect = format!("orchestration panicked: {}", panic_message(panic.as_ref()));
                self.recover(progress, "panic", defect).await
            }
        }
    }

    async fn orchestrate(&self, progress: &mut Progress) -> Result<AggregateOutcome, ApplicationError> {
        let plan = self.router.route(&progress.request, &self.load.snapshot()).await;
        let request_id = progress.request.id.clone();

        self.log(
            LogEntry::new(
                LogLevel::Info,
                "router",
                format!("Routing {} to {}: {}", request_id, join_ids(&plan.workers), plan.reasoning),
            )
            .for_request(&request_id),
        )
        .await;
        self.events.publish(
            PipelineEvent::new(
                "routing.plan.selected",
                EventCategory::Routing,
                match plan.source {
                    RoutingSource::Inference => EventOutcome::Success,
                    RoutingSource::Fallback => EventOutcome::Degraded,
                },
            )
            .for_request(&request_id)
            .with_payload("workers", join_ids(&plan.workers))
            .with_payload("reasoning", plan.reasoning.clone()),
        );

        progress.request.begin_processing(plan.workers.clone())?;
        progress.routing = Some(plan.clone());
        self.persist_request(&progress.request).await;

        for worker_id in &plan.workers {
            match self.load.dispatch(worker_id, &request_id) {
                Ok(worker) => {
                    progress.dispatched.push(worker_id.clone());
                    self.persist_worker(&worker).await;
                    if worker.is_scaling {
                        self.log(
                            LogEntry::new(
                                LogLevel::Warning,
                                "autoscaler",
                                format!(
                                    "Auto-scaling triggered for {} at {}% load",
                                    worker.name, worker.current_load
                                ),
                            )
                            .for_worker(worker_id),
                        )
                        .await;
                        self.events.publish(
                            PipelineEvent::new("load.worker.scaling", EventCategory::Load, EventOutcome::Degraded)
                                .for_worker(worker_id)
                                .with_payload("current_load", worker.current_load.to_string()),
                        );
                    }
                }
                Err(error) => {
                    self.record_failure(progress, worker_id, "unknown_worker", error.to_string()).await;
                }
            }
        }

        let request = progress.request.clone();
        let settled = join_all(progress.dispatched.iter().map(|worker_id| {
            let request = &request;
            async move {
                let outcome = match self.experts.get(worker_id) {
                    Some(expert) => match AssertUnwindSafe(expert.execute(request)).catch_unwind().await {
                        Ok(result) => result
                            .map_err(|error| (error.error_class().to_string(), error.to_string())),
                        Err(panic) => Err((
                            "panic".to_string(),
                            format!("worker panicked: {}", panic_message(panic.as_ref())),
                        )),
                    },
                    None => Err((
                        "unknown_worker".to_string(),
                        DomainError::UnknownWorker(worker_id.0.clone()).to_string(),
                    )),
                };
                (worker_id.clone(), outcome)
            }
        }))
        .await;

        for (worker_id, outcome) in settled {
            match outcome {
                Ok(result) => {
                    self.log(
                        LogEntry::new(
                            LogLevel::Success,
                            worker_id.0.clone(),
                            format!(
                                "{} analysis complete for {}{}",
                                result.specialization.display_name(),
                                request_id,
                                if result.stub { " (stub)" } else { "" }
                            ),
                        )
                        .for_request(&request_id)
                        .for_worker(&worker_id),
                    )
                    .await;
                    progress.results.push(result);
                }
                Err((error_class, message)) => {
                    self.record_failure(progress, &worker_id, &error_class, message).await;
                }
            }
        }

        self.restore_load(progress).await;

        let outcome = self.aggregator.aggregate(&progress.results);
        let (level, event_outcome) = match &outcome {
            AggregateOutcome::Decided(_) => (LogLevel::Success, EventOutcome::Success),
            AggregateOutcome::Incomplete { .. } => (LogLevel::Info, EventOutcome::Degraded),
        };
        self.log(
            LogEntry::new(level, "aggregator", format!("{} for {}", outcome.summary(), request_id))
                .for_request(&request_id),
        )
        .await;
        self.events.publish(
            PipelineEvent::new("decision.aggregate.recorded", EventCategory::Decision, event_outcome)
                .for_request(&request_id)
                .with_payload("summary", outcome.summary()),
        );

        progress.request.finish(RequestStatus::Completed, Utc::now())?;
        self.persist_request(&progress.request).await;

        info!(
            event_name = "request.lifecycle.completed",
            request_id = %request_id,
            processing_time_ms = progress.request.processing_time_ms.unwrap_or_default(),
            results = progress.results.len(),
            failures = progress.failures.len(),
            "request completed"
        );
        self.events.publish(
            PipelineEvent::new("request.lifecycle.completed", EventCategory::Request, EventOutcome::Success)
                .for_request(&request_id),
        );

        Ok(outcome)
    }

    async fn restore_load(&self, progress: &mut Progress) {
        for worker_id in std::mem::take(&mut progress.dispatched) {
            match self.load.complete(&worker_id, &progress.request.id) {
                Ok(worker) => self.persist_worker(&worker).await,
                Err(error) => warn!(
                    event_name = "load.worker.restore_failed",
                    worker_id = %worker_id,
                    error = %error,
                    "worker load could not be restored"
                ),
            }
        }
    }

    async fn recover(
        &self,
        mut progress: Progress,
        error_class: &'static str,
        defect: String,
    ) -> PipelineReport {
        let request_id = progress.request.id.clone();
        error!(
            event_name = "request.lifecycle.defect",
            request_id = %request_id,
            error_class,
            defect = %defect,
            "orchestration defect, marking request failed"
        );

        self.restore_load(&mut progress).await;

        if progress.request.can_transition_to(RequestStatus::Failed) {
            if let Err(error) = progress.request.finish(RequestStatus::Failed, Utc::now()) {
                warn!(
                    event_name = "request.lifecycle.defect",
                    request_id = %request_id,
                    error = %error,
                    "failed status could not be applied"
                );
            }
            self.persist_request(&progress.request).await;
        }

        self.log(
            LogEntry::new(
                LogLevel::Error,
                LOG_SOURCE,
                format!("Request {request_id} failed: {defect}"),
            )
            .for_request(&request_id),
        )
        .await;
        self.events.publish(
            PipelineEvent::new("request.lifecycle.failed", EventCategory::Request, EventOutcome::Failed)
                .for_request(&request_id)
                .with_payload("error_class", error_class)
                .with_payload("defect", defect.clone()),
        );

        progress.into_report(AggregateOutcome::Incomplete { reason: format!("pipeline defect: {defect}") })
    }

    async fn record_failure(
        &self,
        progress: &mut Progress,
        worker_id: &WorkerId,
        error_class: &str,
        message: String,
    ) {
        let request_id = progress.request.id.clone();
        warn!(
            event_name = "execution.worker.failed",
            request_id = %request_id,
            worker_id = %worker_id,
            error_class,
            error = %message,
            "worker execution failed"
        );
        self.log(
            LogEntry::new(
                LogLevel::Error,
                worker_id.0.clone(),
                format!("{worker_id} failed on {request_id}: {message}"),
            )
            .for_request(&request_id)
            .for_worker(worker_id),
        )
        .await;
        self.events.publish(
            PipelineEvent::new("execution.worker.failed", EventCategory::Execution, EventOutcome::Failed)
                .for_request(&request_id)
                .for_worker(worker_id)
                .with_payload("error_class", error_class)
                .with_payload("error", message.clone()),
        );
        progress.failures.push(WorkerFailure {
            worker_id: worker_id.clone(),
            error_class: error_class.to_string(),
            message,
        });
    }

    async fn log(&self, entry: LogEntry) {
        if let Err(error) = self.stores.logs.append_log(entry).await {
            warn!(event_name = "log.store.failed", error = %error, "log entry dropped");
        }
    }

    async fn persist_request(&self, request: &Request) {
        if let Err(error) =
            self.stores.requests.update_request(&request.id, RequestUpdate::from(request)).await
        {
            warn!(
                event_name = "request.store.failed",
                request_id = %request.id,
                error = %error,
                "request update not persisted"
            );
        }
    }

    async fn persist_worker(&self, worker: &Worker) {
        if let Err(error) =
            self.stores.workers.update_worker(&worker.id, WorkerUpdate::from(worker)).await
        {
            warn!(
                event_name = "worker.store.failed",
                worker_id = %worker.id,
                error = %error,
                "worker update not persisted"
            );
        }
    }
}

/// Per-request working state, kept outside `orchestrate` so a defect can
/// still see what was dispatched.
struct Progress {
    request: Request,
    routing: Option<RoutingPlan>,
    dispatched: Vec<WorkerId>,
    results: Vec<AnalysisResult>,
    failures: Vec<WorkerFailure>,
}

impl Progress {
    fn new(request: Request) -> Self {
        Self { request, routing: None, dispatched: Vec::new(), results: Vec::new(), failures: Vec::new() }
    }

    fn into_report(self, outcome: AggregateOutcome) -> PipelineReport {
        PipelineReport {
            request: self.request,
            routing: self.routing,
            results: self.results,
            failures: self.failures,
            outcome,
        }
    }
}

fn join_ids(ids: &[WorkerId]) -> String {
    ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", ")
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
