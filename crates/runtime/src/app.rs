// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! [`AppRoot`]: wires C1-C9 together and drives the request/response surface
//! (spec.md §6.1), the in-process analogue of `oj-daemon`'s `DaemonState`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_backend::{AgentBackend, BackendRegistry};
use loom_collab::{CritiqueEngine, CritiqueId, DiscussionConfig, DiscussionEngine, DiscussionId, SelfCritiqueConfig};
use loom_core::{BackendKind, Clock, Config, ErrorKind, Job, JobId, JobStatus, OrchestrationError, UserId};
use loom_engine::event_bus::recv_or_dropped;
use loom_engine::{EventBus, JobManager, Scheduler, SubmitRequest};
use loom_metrics::{MetricsAggregator, Scope};
use loom_store::{with_retry, RateLimiter, StateStore};
use loom_wire::{
    scope_counters_key, scope_samples_key, CancelOutcome, CritiqueState, DiscussionState, HealthStatus, JobState,
    ListQuery, MetricsQuery, Page, QueuedHandle, Request, Response, WorkflowState,
};
use loom_workflow::{ExecutionId, WorkflowDefinition, WorkflowEngine};

/// Backend instances to register at construction time, keyed implicitly by
/// each instance's own [`AgentBackend::kind`].
pub struct Backends(pub Vec<Arc<dyn AgentBackend>>);

/// Owns every wired-up component (C1-C9) and answers the request surface
/// (spec.md §6.1). Generic over [`Clock`] so tests can drive it with
/// [`loom_core::FakeClock`].
pub struct AppRoot<C: Clock> {
    config: Config,
    store: Arc<dyn StateStore>,
    registry: Arc<BackendRegistry>,
    scheduler: Arc<Scheduler>,
    #[allow(dead_code)]
    bus: Arc<EventBus>,
    job_manager: Arc<JobManager<C>>,
    workflow_engine: Arc<WorkflowEngine<C>>,
    critique_engine: Arc<CritiqueEngine<C>>,
    discussion_engine: Arc<DiscussionEngine<C>>,
    metrics: Arc<MetricsAggregator>,
    heavy_limiter: RateLimiter,
    workflow_limiter: RateLimiter,
    clock: C,
    /// Cleared at the start of [`AppRoot::shutdown`] (spec.md §5 "stop
    /// accepting new submissions"); every submission-shaped request checks
    /// it first.
    accepting: AtomicBool,
}

const ALL_BACKEND_KINDS: [BackendKind; 3] = [BackendKind::Cli, BackendKind::Dsl, BackendKind::Custom];

impl<C: Clock> AppRoot<C> {
    pub fn new(config: Config, store: Arc<dyn StateStore>, backends: Backends, clock: C) -> Arc<Self> {
        let mut registry = BackendRegistry::new();
        for backend in backends.0 {
            registry.register(backend);
        }
        let registry = Arc::new(registry);

        let scheduler = Arc::new(Scheduler::with_queue_limits(
            config.cli.max_concurrent,
            config.cli.queue_max,
            config.dsl.max_concurrent,
            config.dsl.queue_max,
        ));
        let bus = Arc::new(EventBus::new(config.subscriber_outbound_queue_max));

        let job_manager = JobManager::new(
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            Arc::clone(&bus),
            Arc::clone(&store),
            clock.clone(),
            config.retention_ttl_sec,
        );
        let workflow_engine = WorkflowEngine::new(Arc::clone(&job_manager), Arc::clone(&bus), Arc::clone(&store), clock.clone());
        let critique_engine = CritiqueEngine::new(Arc::clone(&job_manager), Arc::clone(&bus), Arc::clone(&store), clock.clone());
        let discussion_engine = DiscussionEngine::new(Arc::clone(&job_manager), Arc::clone(&bus), Arc::clone(&store), clock.clone());

        let metrics = Arc::new(MetricsAggregator::new());
        job_manager.set_metrics(Arc::clone(&metrics));
        workflow_engine.set_metrics(Arc::clone(&metrics));
        critique_engine.set_metrics(Arc::clone(&metrics));
        discussion_engine.set_metrics(Arc::clone(&metrics));

        let window = Duration::from_secs(config.rate.window_sec);
        let heavy_limiter = RateLimiter::new(Arc::clone(&store), window, config.rate.heavy_max, "heavy");
        let workflow_limiter = RateLimiter::new(Arc::clone(&store), window, config.rate.workflow_max, "workflow");

        Arc::new(Self {
            config,
            store,
            registry,
            scheduler,
            bus,
            job_manager,
            workflow_engine,
            critique_engine,
            discussion_engine,
            metrics,
            heavy_limiter,
            workflow_limiter,
            clock,
            accepting: AtomicBool::new(true),
        })
    }

    /// Spawns the periodic queue-position heartbeat and metrics-persistence
    /// tasks (spec.md §4.5 heartbeat, §4.9/§6.3 persisted metrics). Intended
    /// to be called once right after construction.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        self.spawn_heartbeat_task();
        self.spawn_metrics_persistence_task();
    }

    fn spawn_heartbeat_task(self: &Arc<Self>) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                me.job_manager.heartbeat_queue_positions();
            }
        });
    }

    fn spawn_metrics_persistence_task(self: &Arc<Self>) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                me.persist_metrics_snapshot().await;
            }
        });
    }

    /// Write-through every scope's counters and duration stats to the
    /// shared store (spec.md §6.3 "metrics:<scope>:counters",
    /// "metrics:<scope>:samples").
    async fn persist_metrics_snapshot(&self) {
        let now_ms = self.clock.epoch_ms();
        for scope in [Scope::Cli, Scope::Dsl, Scope::Workflow, Scope::SelfCritique, Scope::Discussion] {
            let snapshot = self.metrics.snapshot(scope, None, false, now_ms);
            self.persist_scope_field(scope_counters_key(scope), &snapshot.counters).await;
            self.persist_scope_field(scope_samples_key(scope), &snapshot.duration).await;
        }
    }

    async fn persist_scope_field<T: serde::Serialize>(&self, key: String, value: &T) {
        let Ok(payload) = serde_json::to_string(value) else { return };
        let result = with_retry(|| {
            let store = Arc::clone(&self.store);
            let key = key.clone();
            let payload = payload.clone();
            async move { store.set(&key, payload, None).await }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "failed to persist metrics snapshot");
        }
    }

    /// Stops accepting new submissions, cancels every queued and running job,
    /// waits up to `shutdown_drain_timeout_ms` for running work to settle,
    /// then flushes a final metrics snapshot (spec.md §5 "Shutdown").
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.job_manager.shutdown();

        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        let deadline = Duration::from_millis(self.config.shutdown_drain_timeout_ms);
        while waited < deadline {
            let still_active: usize = ALL_BACKEND_KINDS.iter().map(|k| self.scheduler.active_count(*k)).sum();
            if still_active == 0 {
                break;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }

        self.persist_metrics_snapshot().await;
    }

    /// Answers every request on the synchronous surface (spec.md §6.1).
    pub async fn dispatch(self: &Arc<Self>, request: Request) -> Response {
        match request {
            Request::Submit { user_id, backend_kind, input, priority, timeout_ms } => {
                self.submit_sync(user_id, backend_kind, input, priority, timeout_ms).await
            }
            Request::SubmitAsync { user_id, backend_kind, input, priority, timeout_ms } => {
                self.submit_async(user_id, backend_kind, input, priority, timeout_ms).await
            }
            Request::Status { job_id, caller } => self.job_status(&job_id, &caller),
            Request::Cancel { job_id, caller } => self.job_cancel(&job_id, &caller),
            Request::List { user_id, query } => self.job_list(&user_id, query),
            Request::WorkflowExecute { user_id, definition } => self.workflow_execute(user_id, definition).await,
            Request::WorkflowStatus { execution_id, caller } => {
                self.workflow_status(&ExecutionId::from_string(execution_id), &caller)
            }
            Request::WorkflowCancel { execution_id, caller } => {
                self.workflow_cancel(&ExecutionId::from_string(execution_id), &caller)
            }
            Request::WorkflowPause { execution_id, caller } => {
                self.workflow_pause(&ExecutionId::from_string(execution_id), &caller)
            }
            Request::WorkflowResume { execution_id, caller } => {
                self.workflow_resume(&ExecutionId::from_string(execution_id), &caller)
            }
            Request::SelfCritiqueExecute { user_id, config } => self.critique_execute(user_id, config).await,
            Request::DiscussionExecute { user_id, config } => self.discussion_execute(user_id, config).await,
            Request::Metrics { query } => self.metrics_snapshot(query),
            Request::Health => Response::Health { status: self.health() },
        }
    }

    async fn check_rate_limit(&self, limiter: &RateLimiter, user_id: &UserId) -> std::result::Result<(), Response> {
        let admission = limiter.check(user_id, self.clock.epoch_ms()).await;
        if admission.allowed {
            Ok(())
        } else {
            let retry_after_sec = admission.reset_at_ms.saturating_sub(self.clock.epoch_ms()) / 1_000;
            Err(Response::RateLimited { retry_after_sec })
        }
    }

    fn queued_handle(&self, job: &Job) -> QueuedHandle {
        let (position, estimated_wait_seconds) = self
            .scheduler
            .queue_status(job.backend_kind, &job.id)
            .unwrap_or((job.queue_position.unwrap_or(0), 0));
        QueuedHandle { job_id: job.id, queue_position: position, estimated_wait_seconds }
    }

    /// Submit, then either return a queued handle immediately or wait up to
    /// `timeout_ms` for the job's terminal event before reporting its
    /// current state (spec.md §6.1 "Submit (synchronous)").
    async fn submit_sync(
        self: &Arc<Self>,
        user_id: UserId,
        backend_kind: BackendKind,
        input: serde_json::Value,
        priority: i32,
        timeout_ms: u64,
    ) -> Response {
        if !self.accepting.load(Ordering::SeqCst) {
            return shutting_down_response();
        }
        if let Err(resp) = self.check_rate_limit(&self.heavy_limiter, &user_id).await {
            return resp;
        }

        let job_id = match self.submit(user_id, backend_kind, input, priority, timeout_ms).await {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let Some(job) = self.job_manager.get_state(&job_id) else {
            return job_vanished_response(&job_id);
        };
        if job.status == JobStatus::Queued {
            return Response::Queued { handle: self.queued_handle(&job) };
        }

        let mut sub = self.job_manager.subscribe(&job_id);
        let wait_for_terminal = async {
            loop {
                match recv_or_dropped(job_id, &mut sub.receiver).await {
                    Some(seq_event) if seq_event.event.is_terminal() => break,
                    Some(_) => continue,
                    None => break,
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_millis(timeout_ms), wait_for_terminal).await;

        let job = self.job_manager.get_state(&job_id).unwrap_or(job);
        Response::JobResult { job: Box::new(JobState::from(&job)) }
    }

    /// Submit and return a queued handle right away without waiting for
    /// completion (spec.md §6.1 "Submit (async)").
    async fn submit_async(
        self: &Arc<Self>,
        user_id: UserId,
        backend_kind: BackendKind,
        input: serde_json::Value,
        priority: i32,
        timeout_ms: u64,
    ) -> Response {
        if !self.accepting.load(Ordering::SeqCst) {
            return shutting_down_response();
        }
        if let Err(resp) = self.check_rate_limit(&self.heavy_limiter, &user_id).await {
            return resp;
        }

        let job_id = match self.submit(user_id, backend_kind, input, priority, timeout_ms).await {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.job_manager.get_state(&job_id) {
            Some(job) => Response::Queued { handle: self.queued_handle(&job) },
            None => job_vanished_response(&job_id),
        }
    }

    async fn submit(
        self: &Arc<Self>,
        user_id: UserId,
        backend_kind: BackendKind,
        input: serde_json::Value,
        priority: i32,
        timeout_ms: u64,
    ) -> std::result::Result<JobId, Response> {
        let req = SubmitRequest {
            user_id,
            backend_kind,
            input,
            priority,
            timeout_ms,
            buffer_cap_bytes: self.config.buffer_per_job_max_bytes,
        };
        self.job_manager.submit(req).await.map_err(|e| error_response(&e))
    }

    fn job_status(&self, job_id: &JobId, caller: &UserId) -> Response {
        match self.job_manager.get_state(job_id) {
            None => not_found_response(job_id),
            Some(job) if &job.user_id != caller => forbidden_response(),
            Some(job) => Response::JobState { job: Box::new(JobState::from(&job)) },
        }
    }

    fn job_cancel(&self, job_id: &JobId, caller: &UserId) -> Response {
        let Some(job) = self.job_manager.get_state(job_id) else {
            return Response::Cancel { outcome: CancelOutcome::NotFound };
        };
        if &job.user_id != caller {
            return Response::Cancel { outcome: CancelOutcome::Forbidden };
        }
        let was_already_terminal = job.status.is_terminal();
        let result = self.job_manager.cancel(job_id);
        Response::Cancel { outcome: CancelOutcome::from_result(was_already_terminal, &result) }
    }

    fn job_list(&self, user_id: &UserId, query: ListQuery) -> Response {
        let mut jobs = self.job_manager.list_for_user(user_id);
        if let Some(status) = query.status_filter {
            jobs.retain(|j| j.status == status);
        }
        let states: Vec<JobState> = jobs.iter().map(JobState::from).collect();
        Response::JobList { page: Page::paginate(states, query.page, query.page_size) }
    }

    async fn workflow_execute(self: &Arc<Self>, user_id: UserId, definition: WorkflowDefinition) -> Response {
        if !self.accepting.load(Ordering::SeqCst) {
            return shutting_down_response();
        }
        if let Err(resp) = self.check_rate_limit(&self.workflow_limiter, &user_id).await {
            return resp;
        }
        match self.workflow_engine.start(user_id, definition).await {
            Ok(id) => match self.workflow_engine.get_state(&id) {
                Some(exec) => Response::WorkflowState { execution: Box::new(WorkflowState::from(&exec)) },
                None => execution_vanished_response(&id),
            },
            Err(e) => error_response(&e),
        }
    }

    fn workflow_status(&self, id: &ExecutionId, caller: &UserId) -> Response {
        match self.workflow_engine.get_state(id) {
            None => not_found_response(id),
            Some(exec) if &exec.user_id != caller => forbidden_response(),
            Some(exec) => Response::WorkflowState { execution: Box::new(WorkflowState::from(&exec)) },
        }
    }

    fn workflow_cancel(&self, id: &ExecutionId, caller: &UserId) -> Response {
        if let Some(resp) = self.check_workflow_ownership(id, caller) {
            return resp;
        }
        self.workflow_engine.cancel(id);
        self.workflow_status(id, caller)
    }

    fn workflow_pause(&self, id: &ExecutionId, caller: &UserId) -> Response {
        if let Some(resp) = self.check_workflow_ownership(id, caller) {
            return resp;
        }
        self.workflow_engine.pause(id);
        self.workflow_status(id, caller)
    }

    fn workflow_resume(&self, id: &ExecutionId, caller: &UserId) -> Response {
        if let Some(resp) = self.check_workflow_ownership(id, caller) {
            return resp;
        }
        self.workflow_engine.resume(id);
        self.workflow_status(id, caller)
    }

    fn check_workflow_ownership(&self, id: &ExecutionId, caller: &UserId) -> Option<Response> {
        match self.workflow_engine.get_state(id) {
            None => Some(not_found_response(id)),
            Some(exec) if &exec.user_id != caller => Some(forbidden_response()),
            Some(_) => None,
        }
    }

    async fn critique_execute(self: &Arc<Self>, user_id: UserId, config: SelfCritiqueConfig) -> Response {
        if !self.accepting.load(Ordering::SeqCst) {
            return shutting_down_response();
        }
        if let Err(resp) = self.check_rate_limit(&self.workflow_limiter, &user_id).await {
            return resp;
        }
        match self.critique_engine.start(user_id, config).await {
            Ok(id) => match self.critique_engine.get_state(&id) {
                Some(exec) => Response::CritiqueState { execution: Box::new(CritiqueState::from(&exec)) },
                None => critique_vanished_response(&id),
            },
            Err(e) => error_response(&e),
        }
    }

    /// Direct status lookup for a self-critique run. `Request` has no
    /// variant for this (only `SelfCritiqueExecute`); transports that want
    /// to poll a running critique call this instead of `dispatch`.
    pub fn critique_status(&self, id: &CritiqueId, caller: &UserId) -> Response {
        match self.critique_engine.get_state(id) {
            None => not_found_response(id),
            Some(exec) if &exec.user_id != caller => forbidden_response(),
            Some(exec) => Response::CritiqueState { execution: Box::new(CritiqueState::from(&exec)) },
        }
    }

    /// Direct cancel for a self-critique run (see [`AppRoot::critique_status`]).
    pub fn critique_cancel(&self, id: &CritiqueId, caller: &UserId) -> Response {
        match self.critique_engine.get_state(id) {
            None => return not_found_response(id),
            Some(exec) if &exec.user_id != caller => return forbidden_response(),
            Some(_) => {}
        }
        self.critique_engine.cancel(id);
        self.critique_status(id, caller)
    }

    async fn discussion_execute(self: &Arc<Self>, user_id: UserId, config: DiscussionConfig) -> Response {
        if !self.accepting.load(Ordering::SeqCst) {
            return shutting_down_response();
        }
        if let Err(resp) = self.check_rate_limit(&self.workflow_limiter, &user_id).await {
            return resp;
        }
        match self.discussion_engine.start(user_id, config).await {
            Ok(id) => match self.discussion_engine.get_state(&id) {
                Some(exec) => Response::DiscussionState { execution: Box::new(DiscussionState::from(&exec)) },
                None => discussion_vanished_response(&id),
            },
            Err(e) => error_response(&e),
        }
    }

    /// Direct status lookup for a discussion run (see
    /// [`AppRoot::critique_status`] for why this isn't on `dispatch`).
    pub fn discussion_status(&self, id: &DiscussionId, caller: &UserId) -> Response {
        match self.discussion_engine.get_state(id) {
            None => not_found_response(id),
            Some(exec) if &exec.user_id != caller => forbidden_response(),
            Some(exec) => Response::DiscussionState { execution: Box::new(DiscussionState::from(&exec)) },
        }
    }

    /// Direct cancel for a discussion run (see [`AppRoot::critique_status`]).
    pub fn discussion_cancel(&self, id: &DiscussionId, caller: &UserId) -> Response {
        match self.discussion_engine.get_state(id) {
            None => return not_found_response(id),
            Some(exec) if &exec.user_id != caller => return forbidden_response(),
            Some(_) => {}
        }
        self.discussion_engine.cancel(id);
        self.discussion_status(id, caller)
    }

    fn metrics_snapshot(&self, query: MetricsQuery) -> Response {
        let snapshot = self.metrics.snapshot(query.scope, query.period_seconds, query.include_recent, self.clock.epoch_ms());
        Response::MetricsSnapshot { snapshot: Box::new(snapshot) }
    }

    /// Aggregates backend availability and load into the health surface
    /// (spec.md §6.1 `health()`, §6.5 "200 when all backends are at least
    /// available or fallback, 503 otherwise").
    pub fn health(&self) -> HealthStatus {
        let mut backends = HashMap::new();
        for kind in ALL_BACKEND_KINDS {
            if let Some(backend) = self.registry.get(kind) {
                backends.insert(kind.to_string(), backend.is_available());
            }
        }
        let healthy = backends.values().all(|available| *available);
        let active_jobs: usize = ALL_BACKEND_KINDS.iter().map(|k| self.scheduler.active_count(*k)).sum();
        let queue_size: usize = ALL_BACKEND_KINDS.iter().map(|k| self.scheduler.waiting_count(*k)).sum();
        HealthStatus { healthy, active_jobs, queue_size, backends }
    }
}

fn shutting_down_response() -> Response {
    Response::Error { kind: ErrorKind::InternalError, message: "the service is shutting down".into() }
}

fn error_response(err: &OrchestrationError) -> Response {
    match err {
        OrchestrationError::ValidationFailed { reason } => Response::ValidationFailed { reason: reason.clone() },
        OrchestrationError::RateLimitExceeded { retry_after_sec } => {
            Response::RateLimited { retry_after_sec: *retry_after_sec }
        }
        other => Response::from(other),
    }
}

fn not_found_response(id: &impl std::fmt::Display) -> Response {
    Response::Error { kind: ErrorKind::NotFound, message: format!("{id} not found") }
}

fn forbidden_response() -> Response {
    Response::Error { kind: ErrorKind::Forbidden, message: "caller does not own this resource".into() }
}

fn job_vanished_response(job_id: &JobId) -> Response {
    Response::Error {
        kind: ErrorKind::InternalError,
        message: format!("job {job_id} disappeared immediately after submit"),
    }
}

fn execution_vanished_response(id: &ExecutionId) -> Response {
    Response::Error {
        kind: ErrorKind::InternalError,
        message: format!("workflow execution {id} disappeared immediately after start"),
    }
}

fn critique_vanished_response(id: &CritiqueId) -> Response {
    Response::Error {
        kind: ErrorKind::InternalError,
        message: format!("self-critique run {id} disappeared immediately after start"),
    }
}

fn discussion_vanished_response(id: &DiscussionId) -> Response {
    Response::Error {
        kind: ErrorKind::InternalError,
        message: format!("discussion run {id} disappeared immediately after start"),
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
