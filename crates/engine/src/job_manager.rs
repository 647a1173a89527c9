// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Ties the scheduler, event bus, backend registry, and state store into
//! the job lifecycle contract (spec.md §4.4, C4).

use crate::event_bus::EventBus;
use crate::scheduler::{Admission, Scheduler};
use loom_backend::{BackendRegistry, EventSink, ExecutionContext};
use loom_core::{
    BackendEvent, BackendKind, Clock, Event, Job, JobConfig, JobId, JobStatus, OrchestrationError,
    Result, UserId,
};
use loom_metrics::{MetricsAggregator, MetricsSample, Scope};
use loom_store::{with_retry, StateStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// TTL applied to `job:<id>` state while the job is still active (spec.md
/// §4.1 "configurable TTL, default 1h while active"). Once terminal, the
/// caller-configured `retention_ttl_sec` takes over instead.
const ACTIVE_JOB_TTL: Duration = Duration::from_secs(3_600);

/// Parameters for [`JobManager::submit`], mirroring spec.md §4.4's
/// "submit(userId, backendKind, input, priority?, timeoutMs?)".
pub struct SubmitRequest {
    pub user_id: UserId,
    pub backend_kind: BackendKind,
    pub input: serde_json::Value,
    pub priority: i32,
    pub timeout_ms: u64,
    pub buffer_cap_bytes: usize,
}

/// Drives jobs from `pending` through a terminal state (spec.md §4.4).
///
/// Held behind an `Arc` so the background execution task spawned by
/// [`JobManager::submit`] can hold a handle back to the manager to chain
/// into the next queued job once its slot frees up.
pub struct JobManager<C: Clock> {
    registry: Arc<BackendRegistry>,
    scheduler: Arc<Scheduler>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    clock: C,
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
    cancels: Mutex<HashMap<JobId, CancellationToken>>,
    metrics: Mutex<Option<Arc<MetricsAggregator>>>,
    retention_ttl_sec: u64,
}

/// `Custom` backends have no fixed metrics scope in spec.md §4.9's list
/// (`cli`, `dsl`, `workflow`, `self-critique`, `discussion`); they are
/// simply not observed.
/// Synthesizes the `job:snapshot` event a late subscriber sees before any
/// live event on the topic (spec.md §4.6).
fn job_snapshot_event(job: &Job) -> Event {
    Event::JobSnapshot {
        job_id: job.id,
        progress: job.progress,
        stdout_so_far: job.stdout.as_str().to_string(),
        truncated: job.stdout.truncated(),
    }
}

/// Maps a DSL backend's reported progress stage onto the `validating`/
/// `rendering` refinements of `running` (spec.md §3 "For the DSL backend,
/// Validating and Rendering refine Running").
fn dsl_stage_status(stage: Option<&str>) -> Option<JobStatus> {
    match stage {
        Some("validating") => Some(JobStatus::Validating),
        Some("rendering") => Some(JobStatus::Rendering),
        _ => None,
    }
}

fn metrics_scope(kind: BackendKind) -> Option<Scope> {
    match kind {
        BackendKind::Cli => Some(Scope::Cli),
        BackendKind::Dsl => Some(Scope::Dsl),
        BackendKind::Custom => None,
    }
}

impl<C: Clock> JobManager<C> {
    pub fn new(
        registry: Arc<BackendRegistry>,
        scheduler: Arc<Scheduler>,
        bus: Arc<EventBus>,
        store: Arc<dyn StateStore>,
        clock: C,
        retention_ttl_sec: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            scheduler,
            bus,
            store,
            clock,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            cancels: Mutex::new(HashMap::new()),
            metrics: Mutex::new(None),
            retention_ttl_sec,
        })
    }

    /// Attaches the shared metrics aggregator (spec.md §4.9, C9); until
    /// this is called, terminal transitions simply aren't observed.
    pub fn set_metrics(&self, aggregator: Arc<MetricsAggregator>) {
        *self.metrics.lock() = Some(aggregator);
    }

    /// Validate, admit, and (if capacity allows) start a new job (spec.md
    /// §4.4 "On submit").
    pub async fn submit(self: &Arc<Self>, req: SubmitRequest) -> Result<JobId> {
        let backend = self
            .registry
            .get(req.backend_kind)
            .ok_or_else(|| OrchestrationError::BackendUnavailable(req.backend_kind.to_string()))?;

        let validation = backend.validate(&req.input).await;
        if !validation.is_valid {
            let reason = validation
                .errors
                .iter()
                .map(|d| d.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestrationError::ValidationFailed { reason });
        }

        let config = JobConfig::builder(req.user_id, req.backend_kind)
            .input(req.input)
            .priority(req.priority)
            .timeout_ms(req.timeout_ms)
            .buffer_cap_bytes(req.buffer_cap_bytes)
            .build();
        let job_id = config.id;
        let mut job = Job::new(config, &self.clock);

        let admission = self.scheduler.submit(req.backend_kind, job_id, req.priority, self.clock.now());
        match admission {
            Admission::StartNow => {
                job.status = JobStatus::Running;
                job.started_at_ms = Some(self.clock.epoch_ms());
                self.jobs.lock().insert(job_id, job.clone());
                self.persist_job(&job);
                self.bump_gauge(req.backend_kind, |m, scope| m.incr_active(scope));
                self.spawn_execute(job_id, req.backend_kind);
            }
            Admission::Queued { position, estimated_wait_seconds } => {
                job.status = JobStatus::Queued;
                job.queue_position = Some(position);
                self.jobs.lock().insert(job_id, job.clone());
                self.persist_job(&job);
                self.bump_gauge(req.backend_kind, |m, scope| m.incr_queued(scope));
                self.bus.publish(
                    job_id.as_str(),
                    Event::CliQueued { job_id, queue_position: position, estimated_wait_seconds },
                );
            }
            Admission::Rejected => return Err(OrchestrationError::QueueFull),
        }
        Ok(job_id)
    }

    /// Cancel a job, wherever it is in its lifecycle (spec.md §4.4 "On
    /// cancel"). Queued jobs transition immediately; running jobs are asked
    /// to cooperatively cancel.
    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(job_id).ok_or_else(|| OrchestrationError::NotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if job.status == JobStatus::Queued {
            self.scheduler.remove_queued(job.backend_kind, job_id);
            let epoch_ms = self.clock.epoch_ms();
            job.mark_terminal(JobStatus::Cancelled, Some(loom_core::ErrorKind::Cancelled), None, epoch_ms);
            self.bus.publish(
                job_id.as_str(),
                Event::CliError {
                    job_id: *job_id,
                    code: loom_core::ErrorKind::Cancelled.to_string(),
                    message: "cancelled while queued".into(),
                },
            );
            return Ok(());
        }
        if let Some(token) = self.cancels.lock().get(job_id) {
            token.cancel();
        }
        Ok(())
    }

    pub fn get_state(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.lock().get(job_id).cloned()
    }

    /// All jobs owned by `user_id`, most-recently-created first. Backs the
    /// `list` surface (spec.md §6.1); pagination is the caller's concern.
    pub fn list_for_user(&self, user_id: &UserId) -> Vec<Job> {
        let mut jobs: Vec<Job> =
            self.jobs.lock().values().filter(|j| &j.user_id == user_id).cloned().collect();
        jobs.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        jobs
    }

    /// Subscribe to a job's event topic. A subscriber joining after the job
    /// already has state receives a synthesized `job:snapshot` replay built
    /// from the job's current progress/output before any live event
    /// (spec.md §4.4, §4.6 "late subscribers receive a synthesized
    /// snapshot event").
    pub fn subscribe(&self, job_id: &JobId) -> crate::event_bus::Subscription {
        match self.jobs.lock().get(job_id) {
            Some(job) => self.bus.subscribe_with_snapshot(job_id.as_str(), job_snapshot_event(job)),
            None => self.bus.subscribe(job_id.as_str()),
        }
    }

    /// Re-derive and persist every still-queued job's `(queuePosition,
    /// estimatedWaitSeconds)` (spec.md §4.5 "Queued jobs heartbeat their
    /// position into state so clients polling via C1 see current
    /// queuePosition"). Intended to be called on a periodic tick by
    /// `loom-runtime`'s application root.
    pub fn heartbeat_queue_positions(&self) {
        let queued: Vec<(JobId, BackendKind)> = self
            .jobs
            .lock()
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| (j.id, j.backend_kind))
            .collect();
        for (job_id, kind) in queued {
            let Some((position, estimated_wait_seconds)) = self.scheduler.queue_status(kind, &job_id) else {
                continue;
            };
            let persisted = {
                let mut jobs = self.jobs.lock();
                let Some(job) = jobs.get_mut(&job_id) else { continue };
                if job.queue_position == Some(position) {
                    continue;
                }
                job.queue_position = Some(position);
                job.clone()
            };
            self.persist_job(&persisted);
            self.bus.publish(
                job_id.as_str(),
                Event::CliQueued { job_id, queue_position: position, estimated_wait_seconds },
            );
        }
    }

    /// Drain every queued job with `errorKind=Cancelled` (shutdown maps onto
    /// the existing `Cancelled` wire kind; spec.md §4.4 "On shutdown") and
    /// signal every running job's cancellation token so backends unwind
    /// cooperatively. Does not wait for them to finish; the runtime crate
    /// owns the drain-timeout policy (spec.md §5).
    pub fn shutdown(&self) {
        for (_, job_id) in self.scheduler.drain_all_queued() {
            let mut jobs = self.jobs.lock();
            if let Some(job) = jobs.get_mut(&job_id) {
                let epoch_ms = self.clock.epoch_ms();
                job.mark_terminal(JobStatus::Cancelled, Some(loom_core::ErrorKind::Cancelled), None, epoch_ms);
                drop(jobs);
                self.bus.publish(
                    job_id.as_str(),
                    Event::CliError {
                        job_id,
                        code: loom_core::ErrorKind::Cancelled.to_string(),
                        message: "queued job drained on shutdown".into(),
                    },
                );
            }
        }
        for token in self.cancels.lock().values() {
            token.cancel();
        }
    }

    fn spawn_execute(self: &Arc<Self>, job_id: JobId, kind: BackendKind) {
        let me = Arc::clone(self);
        tokio::spawn(async move { me.run_job(job_id, kind).await });
    }

    async fn run_job(self: Arc<Self>, job_id: JobId, kind: BackendKind) {
        // The scheduler's active slot must be freed exactly once no matter
        // how this job ends, so every branch below falls through to the
        // single `scheduler.complete` call at the bottom.
        match self.registry.get(kind) {
            Some(backend) => {
                let timeout_ms = self.jobs.lock().get(&job_id).map(|j| j.timeout_ms).unwrap_or(300_000);
                let ctx = ExecutionContext::new(job_id, Duration::from_millis(timeout_ms));
                self.cancels.lock().insert(job_id, ctx.cancel.clone());

                let input =
                    self.jobs.lock().get(&job_id).map(|j| j.input.clone()).unwrap_or(serde_json::Value::Null);
                let sink = self.make_sink(job_id, kind);

                let outcome = backend.execute(&ctx, input, sink).await;
                self.cancels.lock().remove(&job_id);

                match outcome {
                    Ok(result) => self.finish_with_result(job_id, kind, result),
                    Err(e) => self.finish_with_error(job_id, kind, e),
                }
            }
            None => {
                self.finish_with_error(job_id, kind, OrchestrationError::BackendUnavailable(kind.to_string()));
            }
        }

        let duration_ms = self
            .jobs
            .lock()
            .get(&job_id)
            .map(|j| j.completed_at_ms.unwrap_or(0).saturating_sub(j.started_at_ms.unwrap_or(0)))
            .unwrap_or(0);
        let next = self.scheduler.complete(kind, &job_id, duration_ms);
        if let Some(next_job_id) = next {
            let mut jobs = self.jobs.lock();
            if let Some(job) = jobs.get_mut(&next_job_id) {
                job.status = JobStatus::Running;
                job.started_at_ms = Some(self.clock.epoch_ms());
                let next_kind = job.backend_kind;
                drop(jobs);
                self.bump_gauge(next_kind, |m, scope| m.decr_queued(scope));
                self.bump_gauge(next_kind, |m, scope| m.incr_active(scope));
                self.spawn_execute(next_job_id, next_kind);
            }
        }
    }

    fn make_sink(&self, job_id: JobId, kind: BackendKind) -> EventSink {
        let jobs = Arc::clone(&self.jobs);
        let bus = Arc::clone(&self.bus);
        Arc::new(move |event: BackendEvent| match event {
            BackendEvent::Start | BackendEvent::Partial(_) | BackendEvent::End(_) => {}
            BackendEvent::Stdout(line) => {
                if let Some(job) = jobs.lock().get_mut(&job_id) {
                    job.stdout.push(&line);
                    job.stdout.push("\n");
                }
                if kind == BackendKind::Cli {
                    bus.publish(job_id.as_str(), Event::CliProgress { job_id, data: line });
                }
            }
            BackendEvent::Stderr(line) => {
                if let Some(job) = jobs.lock().get_mut(&job_id) {
                    job.stderr.push(&line);
                    job.stderr.push("\n");
                }
            }
            BackendEvent::Progress { percent, stage } => {
                let (stdout_so_far, truncated) = {
                    let mut guard = jobs.lock();
                    if let Some(job) = guard.get_mut(&job_id) {
                        job.set_progress(percent);
                        if kind == BackendKind::Dsl {
                            if let Some(status) = dsl_stage_status(stage.as_deref()) {
                                job.status = status;
                            }
                        }
                        (job.stdout.as_str().to_string(), job.stdout.truncated())
                    } else {
                        (String::new(), false)
                    }
                };
                match kind {
                    BackendKind::Dsl => {
                        bus.publish(
                            job_id.as_str(),
                            Event::DslProgress { job_id, percent, stage: stage.unwrap_or_default() },
                        );
                    }
                    _ => {
                        bus.publish(
                            job_id.as_str(),
                            Event::JobSnapshot { job_id, progress: percent, stdout_so_far, truncated },
                        );
                    }
                }
            }
        })
    }

    /// Calls `f` with the attached aggregator and `kind`'s metrics scope,
    /// when both exist.
    fn bump_gauge(&self, kind: BackendKind, f: impl FnOnce(&MetricsAggregator, Scope)) {
        let Some(scope) = metrics_scope(kind) else { return };
        if let Some(m) = &*self.metrics.lock() {
            f(m, scope);
        }
    }

    fn record_terminal(&self, job: &Job) {
        let Some(scope) = metrics_scope(job.backend_kind) else { return };
        let Some(m) = self.metrics.lock().clone() else { return };
        m.decr_active(scope);
        let duration_ms = job.completed_at_ms.unwrap_or(0).saturating_sub(job.started_at_ms.unwrap_or(0));
        m.record_terminal(
            scope,
            MetricsSample {
                job_type: job.backend_kind.to_string(),
                status: job.status,
                duration_ms,
                input_size: job.input.to_string().len(),
                output_size: job.result_payload.as_ref().map(|v| v.to_string().len()).unwrap_or(0),
                timestamp_ms: job.completed_at_ms.unwrap_or(0),
            },
        );
    }

    fn finish_with_result(&self, job_id: JobId, kind: BackendKind, result: loom_core::BackendResult) {
        let epoch_ms = self.clock.epoch_ms();
        let (wire_event, persisted) = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&job_id) else { return };
            job.exit_code = result.exit_code;
            job.result_payload = Some(result.payload.clone());
            job.mark_terminal(JobStatus::Completed, None, None, epoch_ms);
            job.set_progress(100);
            let event = match kind {
                BackendKind::Dsl => Event::DslComplete {
                    job_id,
                    success: true,
                    audio_data: result
                        .payload
                        .get("audioData")
                        .and_then(|v| v.as_array())
                        .map(|arr| arr.iter().filter_map(|n| n.as_u64().map(|v| v as u8)).collect())
                        .unwrap_or_default(),
                    duration_ms: result.duration_ms,
                    sample_rate: result
                        .payload
                        .get("sampleRate")
                        .and_then(|v| v.as_u64())
                        .map(|v| v as u32)
                        .unwrap_or(44_100),
                    channels: result
                        .payload
                        .get("channels")
                        .and_then(|v| v.as_u64())
                        .map(|v| v as u8)
                        .unwrap_or(2),
                    format: result
                        .payload
                        .get("format")
                        .and_then(|v| v.as_str())
                        .unwrap_or("wav")
                        .to_string(),
                    file_size: result
                        .payload
                        .get("fileSize")
                        .and_then(|v| v.as_u64())
                        .map(|v| v as usize)
                        .unwrap_or(0),
                },
                _ => Event::CliComplete {
                    job_id,
                    stdout: job.stdout.as_str().to_string(),
                    stderr: job.stderr.as_str().to_string(),
                    exit_code: result.exit_code.unwrap_or(0),
                    duration_ms: result.duration_ms,
                },
            };
            (event, job.clone())
        };
        self.persist_job(&persisted);
        self.record_terminal(&persisted);
        self.bus.publish(job_id.as_str(), wire_event);
    }

    fn finish_with_error(&self, job_id: JobId, _kind: BackendKind, error: OrchestrationError) {
        let epoch_ms = self.clock.epoch_ms();
        let kind_tag = error.kind();
        let status = match kind_tag {
            loom_core::ErrorKind::Timeout => JobStatus::Timeout,
            loom_core::ErrorKind::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };
        let persisted = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&job_id) else { return };
            job.mark_terminal(status, Some(kind_tag), Some(error.to_string()), epoch_ms);
            job.clone()
        };
        self.persist_job(&persisted);
        self.record_terminal(&persisted);
        self.bus.publish(
            job_id.as_str(),
            Event::CliError { job_id, code: kind_tag.to_string(), message: error.to_string() },
        );
    }

    /// Write-through the job's current state to the shared store (spec.md
    /// §6.3 "job:<id>"), retrying transient failures in the background so
    /// the caller's lifecycle transition is never blocked on store latency.
    ///
    /// TTL is `ACTIVE_JOB_TTL` while the job is still running and the
    /// caller-configured `retention_ttl_sec` once it reaches a terminal
    /// status (spec.md §4.1 "configurable TTL, default 1h while active,
    /// extended to the retention TTL on terminal").
    fn persist_job(&self, job: &Job) {
        let store = Arc::clone(&self.store);
        let key = format!("job:{}", job.id);
        let ttl = if job.status.is_terminal() {
            Duration::from_secs(self.retention_ttl_sec)
        } else {
            ACTIVE_JOB_TTL
        };
        match serde_json::to_string(job) {
            Ok(payload) => {
                tokio::spawn(async move {
                    let result = with_retry(|| {
                        let store = Arc::clone(&store);
                        let key = key.clone();
                        let payload = payload.clone();
                        async move { store.set(&key, payload, Some(ttl)).await }
                    })
                    .await;
                    if let Err(e) = result {
                        tracing::warn!(key = %key, error = %e, "failed to persist job state");
                    }
                });
            }
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "failed to serialize job state"),
        }
    }
}

#[cfg(test)]
#[path = "job_manager_tests.rs"]
mod tests;
