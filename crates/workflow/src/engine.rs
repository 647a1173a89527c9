// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Drives a [`WorkflowExecution`] to completion: starts ready steps by
//! submitting them through the shared [`JobManager`] (so per-backend
//! concurrency stays capped by the same scheduler every other job goes
//! through), folds completions back into `context`, and emits
//! workflow-scoped events (spec.md §4.7, C7).

use crate::definition::{OnError, StepDefinition, WorkflowDefinition};
use crate::execution::{ExecutionId, StepState, StepStatus, WorkflowExecution, WorkflowStatus};
use crate::{condition, template};
use loom_core::{BackendKind, Clock, Event, JobId, JobStatus, Result, UserId};
use loom_engine::event_bus::recv_or_dropped;
use loom_engine::{EventBus, JobManager, SubmitRequest, Subscription};
use loom_metrics::{MetricsAggregator, MetricsSample, Scope};
use loom_store::{with_retry, StateStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Synthesizes the `workflow:snapshot` event a late subscriber sees before
/// any live event on the topic (spec.md §4.6).
fn workflow_snapshot_event(exec: &WorkflowExecution) -> Event {
    Event::WorkflowSnapshot {
        execution_id: exec.id.to_string(),
        status: exec.status.to_string(),
        step_states: exec.step_states.iter().map(|(step_id, state)| (step_id.clone(), state.status.to_string())).collect(),
    }
}

struct RuntimeState {
    paused: bool,
    cancel_requested: bool,
    running_job_ids: HashMap<String, JobId>,
    wake: Arc<Notify>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            paused: false,
            cancel_requested: false,
            running_job_ids: HashMap::new(),
            wake: Arc::new(Notify::new()),
        }
    }
}

struct StepOutcome {
    step_id: String,
    status: StepStatus,
    output: Option<serde_json::Value>,
    error: Option<String>,
}

/// Owns every in-flight [`WorkflowExecution`] and the task driving it.
pub struct WorkflowEngine<C: Clock> {
    job_manager: Arc<JobManager<C>>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    clock: C,
    executions: Mutex<HashMap<ExecutionId, WorkflowExecution>>,
    runtime: Mutex<HashMap<ExecutionId, RuntimeState>>,
    metrics: Mutex<Option<Arc<MetricsAggregator>>>,
}

impl<C: Clock> WorkflowEngine<C> {
    pub fn new(
        job_manager: Arc<JobManager<C>>,
        bus: Arc<EventBus>,
        store: Arc<dyn StateStore>,
        clock: C,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_manager,
            bus,
            store,
            clock,
            executions: Mutex::new(HashMap::new()),
            runtime: Mutex::new(HashMap::new()),
            metrics: Mutex::new(None),
        })
    }

    /// Attaches the shared metrics aggregator (spec.md §4.9's `workflow`
    /// scope); until this is called, terminal transitions aren't observed.
    pub fn set_metrics(&self, aggregator: Arc<MetricsAggregator>) {
        *self.metrics.lock() = Some(aggregator);
    }

    /// Validate and start a new execution; returns immediately, the DAG runs
    /// on a background task.
    pub async fn start(self: &Arc<Self>, user_id: UserId, definition: WorkflowDefinition) -> Result<ExecutionId> {
        definition.validate()?;
        let id = ExecutionId::new();
        let execution = WorkflowExecution::new(id, user_id, definition, self.clock.epoch_ms());
        self.executions.lock().insert(id, execution);
        self.runtime.lock().insert(id, RuntimeState::new());
        self.persist(&id);
        self.bus.publish(id.as_str(), Event::WorkflowQueued { execution_id: id.to_string() });

        let me = Arc::clone(self);
        tokio::spawn(async move { me.run(id).await });
        Ok(id)
    }

    pub fn get_state(&self, id: &ExecutionId) -> Option<WorkflowExecution> {
        self.executions.lock().get(id).cloned()
    }

    /// Subscribe to an execution's event topic. A subscriber joining after
    /// the execution already has state receives a synthesized
    /// `workflow:snapshot` replay of its current status and per-step
    /// states before any live event (spec.md §4.6).
    pub fn subscribe(&self, id: &ExecutionId) -> Subscription {
        match self.executions.lock().get(id) {
            Some(exec) => self.bus.subscribe_with_snapshot(id.as_str(), workflow_snapshot_event(exec)),
            None => self.bus.subscribe(id.as_str()),
        }
    }

    /// Sets a flag; no new steps start, steps already running continue.
    pub fn pause(&self, id: &ExecutionId) {
        if let Some(rt) = self.runtime.lock().get_mut(id) {
            rt.paused = true;
        }
        if let Some(exec) = self.executions.lock().get_mut(id) {
            if exec.status == WorkflowStatus::Running {
                exec.status = WorkflowStatus::Paused;
            }
        }
    }

    pub fn resume(&self, id: &ExecutionId) {
        let wake = {
            let mut guard = self.runtime.lock();
            guard.get_mut(id).map(|rt| {
                rt.paused = false;
                Arc::clone(&rt.wake)
            })
        };
        if let Some(exec) = self.executions.lock().get_mut(id) {
            if exec.status == WorkflowStatus::Paused {
                exec.status = WorkflowStatus::Running;
            }
        }
        if let Some(wake) = wake {
            wake.notify_one();
        }
    }

    /// Propagates cancellation to every currently running step and
    /// transitions the execution to `cancelled` once they settle.
    pub fn cancel(&self, id: &ExecutionId) {
        let (running, wake) = {
            let mut guard = self.runtime.lock();
            match guard.get_mut(id) {
                Some(rt) => {
                    rt.cancel_requested = true;
                    (rt.running_job_ids.clone(), Arc::clone(&rt.wake))
                }
                None => return,
            }
        };
        for job_id in running.values() {
            let _ = self.job_manager.cancel(job_id);
        }
        wake.notify_one();
    }

    async fn run(self: Arc<Self>, id: ExecutionId) {
        if let Some(exec) = self.executions.lock().get_mut(&id) {
            exec.status = WorkflowStatus::Running;
        }
        self.persist(&id);
        self.bus.publish(id.as_str(), Event::WorkflowStarted { execution_id: id.to_string() });

        let (tx, mut rx) = mpsc::unbounded_channel::<StepOutcome>();
        let mut running_count = 0usize;

        loop {
            let (paused, cancel_requested, wake) = {
                let guard = self.runtime.lock();
                let rt = guard.get(&id).expect("runtime state must exist while an execution is running");
                (rt.paused, rt.cancel_requested, Arc::clone(&rt.wake))
            };

            if !paused && !cancel_requested {
                let ready: Vec<StepDefinition> = {
                    let guard = self.executions.lock();
                    let exec = guard.get(&id).expect("execution must exist while running");
                    exec.ready_steps().into_iter().cloned().collect()
                };
                for step in ready {
                    self.start_or_skip_step(&id, step, &tx, &mut running_count);
                }
            }

            let all_done = {
                let guard = self.executions.lock();
                guard.get(&id).expect("execution must exist while running").all_steps_terminal()
            };
            if running_count == 0 && (all_done || cancel_requested) {
                break;
            }

            tokio::select! {
                Some(outcome) = rx.recv(), if running_count > 0 => {
                    running_count -= 1;
                    self.apply_outcome(&id, outcome);
                }
                _ = wake.notified() => {}
            }
        }

        self.finalize(&id);
    }

    fn start_or_skip_step(
        self: &Arc<Self>,
        id: &ExecutionId,
        step: StepDefinition,
        tx: &mpsc::UnboundedSender<StepOutcome>,
        running_count: &mut usize,
    ) {
        let (context, user_id) = {
            let guard = self.executions.lock();
            let exec = guard.get(id).expect("execution must exist");
            (exec.context(), exec.user_id)
        };

        let condition_result = match &step.condition {
            Some(expr) => condition::evaluate(expr, &context),
            None => Ok(true),
        };

        match condition_result {
            Ok(true) => {
                let rendered_input = template::render(&step.input, &context);
                {
                    let mut guard = self.executions.lock();
                    let exec = guard.get_mut(id).expect("execution must exist");
                    exec.step_states.insert(step.id.clone(), StepState { status: StepStatus::Running, output: None, error: None });
                }
                self.bus.publish(
                    id.as_str(),
                    Event::WorkflowStepStarted { execution_id: id.to_string(), step_id: step.id.clone() },
                );
                *running_count += 1;

                let me = Arc::clone(self);
                let execution_id = *id;
                let tx = tx.clone();
                let step_id = step.id;
                let agent_type = step.agent_type;
                let timeout_ms = step.timeout_ms;
                tokio::spawn(async move {
                    me.drive_step(execution_id, step_id, user_id, agent_type, rendered_input, timeout_ms, tx).await;
                });
            }
            Ok(false) => {
                self.set_step_state(id, &step.id, StepStatus::Skipped, None, None);
                self.bus.publish(
                    id.as_str(),
                    Event::WorkflowStepSkipped { execution_id: id.to_string(), step_id: step.id.clone() },
                );
            }
            Err(e) => {
                self.set_step_state(id, &step.id, StepStatus::Failed, None, Some(e.to_string()));
                self.bus.publish(
                    id.as_str(),
                    Event::WorkflowStepFailed { execution_id: id.to_string(), step_id: step.id.clone(), error: e.to_string() },
                );
            }
        }
    }

    async fn drive_step(
        self: Arc<Self>,
        execution_id: ExecutionId,
        step_id: String,
        user_id: UserId,
        agent_type: BackendKind,
        input: serde_json::Value,
        timeout_ms: u64,
        tx: mpsc::UnboundedSender<StepOutcome>,
    ) {
        let req = SubmitRequest {
            user_id,
            backend_kind: agent_type,
            input,
            priority: 0,
            timeout_ms,
            buffer_cap_bytes: 1024 * 1024,
        };
        let job_id = match self.job_manager.submit(req).await {
            Ok(job_id) => job_id,
            Err(e) => {
                let _ = tx.send(StepOutcome { step_id, status: StepStatus::Failed, output: None, error: Some(e.to_string()) });
                return;
            }
        };

        if let Some(rt) = self.runtime.lock().get_mut(&execution_id) {
            rt.running_job_ids.insert(step_id.clone(), job_id);
        }

        let mut sub = self.job_manager.subscribe(&job_id);
        loop {
            match recv_or_dropped(job_id, &mut sub.receiver).await {
                Some(seq_event) => {
                    if let Event::JobSnapshot { progress, .. } = &seq_event.event {
                        self.bus.publish(
                            execution_id.as_str(),
                            Event::WorkflowStepProgress {
                                execution_id: execution_id.to_string(),
                                step_id: step_id.clone(),
                                percent: *progress,
                            },
                        );
                    }
                    if seq_event.event.is_terminal() {
                        break;
                    }
                }
                None => break,
            }
        }

        let outcome = match self.job_manager.get_state(&job_id) {
            Some(job) if job.status == loom_core::JobStatus::Completed => {
                StepOutcome { step_id: step_id.clone(), status: StepStatus::Completed, output: job.result_payload, error: None }
            }
            Some(job) => StepOutcome {
                step_id: step_id.clone(),
                status: StepStatus::Failed,
                output: None,
                error: Some(job.error_message.unwrap_or_else(|| format!("step job ended in status {}", job.status))),
            },
            None => StepOutcome {
                step_id: step_id.clone(),
                status: StepStatus::Failed,
                output: None,
                error: Some("step job disappeared before completion".to_string()),
            },
        };

        if let Some(rt) = self.runtime.lock().get_mut(&execution_id) {
            rt.running_job_ids.remove(&step_id);
        }
        let _ = tx.send(outcome);
    }

    fn set_step_state(
        &self,
        id: &ExecutionId,
        step_id: &str,
        status: StepStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let mut guard = self.executions.lock();
        let exec = guard.get_mut(id).expect("execution must exist");
        exec.step_states.insert(step_id.to_string(), StepState { status, output, error });
    }

    fn apply_outcome(&self, id: &ExecutionId, outcome: StepOutcome) {
        self.set_step_state(id, &outcome.step_id, outcome.status, outcome.output, outcome.error.clone());
        self.persist(id);
        match outcome.status {
            StepStatus::Completed => {
                self.bus.publish(
                    id.as_str(),
                    Event::WorkflowStepCompleted { execution_id: id.to_string(), step_id: outcome.step_id },
                );
            }
            StepStatus::Failed => {
                self.bus.publish(
                    id.as_str(),
                    Event::WorkflowStepFailed {
                        execution_id: id.to_string(),
                        step_id: outcome.step_id,
                        error: outcome.error.unwrap_or_default(),
                    },
                );
            }
            StepStatus::Pending | StepStatus::Running | StepStatus::Skipped => {
                unreachable!("a step outcome is always Completed or Failed")
            }
        }
    }

    fn finalize(&self, id: &ExecutionId) {
        let cancel_requested = self.runtime.lock().get(id).map(|rt| rt.cancel_requested).unwrap_or(false);
        let final_status = {
            let guard = self.executions.lock();
            let exec = guard.get(id).expect("execution must exist");
            let any_failed_abort = exec.definition.steps.iter().any(|s| {
                matches!(exec.step_states.get(&s.id).map(|st| st.status), Some(StepStatus::Failed))
                    && s.on_error == OnError::Abort
            });
            if cancel_requested {
                WorkflowStatus::Cancelled
            } else if any_failed_abort {
                WorkflowStatus::Failed
            } else {
                WorkflowStatus::Completed
            }
        };
        let epoch_ms = self.clock.epoch_ms();

        let created_at_ms = {
            let mut guard = self.executions.lock();
            let exec = guard.get_mut(id).expect("execution must exist");
            exec.status = final_status;
            exec.completed_at_ms = Some(epoch_ms);
            exec.created_at_ms
        };
        self.persist(id);
        self.runtime.lock().remove(id);

        if let Some(m) = self.metrics.lock().clone() {
            let status = match final_status {
                WorkflowStatus::Completed => JobStatus::Completed,
                WorkflowStatus::Cancelled => JobStatus::Cancelled,
                _ => JobStatus::Failed,
            };
            m.record_terminal(
                Scope::Workflow,
                MetricsSample {
                    job_type: "workflow".to_string(),
                    status,
                    duration_ms: epoch_ms.saturating_sub(created_at_ms),
                    input_size: 0,
                    output_size: 0,
                    timestamp_ms: epoch_ms,
                },
            );
        }

        let event = match final_status {
            WorkflowStatus::Completed => Event::WorkflowCompleted { execution_id: id.to_string() },
            WorkflowStatus::Cancelled => Event::WorkflowCancelled { execution_id: id.to_string() },
            WorkflowStatus::Failed => {
                Event::WorkflowFailed { execution_id: id.to_string(), error: "one or more steps failed".to_string() }
            }
            WorkflowStatus::Pending | WorkflowStatus::Queued | WorkflowStatus::Running | WorkflowStatus::Paused => {
                unreachable!("finalize only produces terminal statuses")
            }
        };
        self.bus.publish(id.as_str(), event);
        self.bus.retire(id.as_str());
    }

    fn persist(&self, id: &ExecutionId) {
        let Some(execution) = self.executions.lock().get(id).cloned() else { return };
        let store = Arc::clone(&self.store);
        let key = format!("workflow:{id}");
        match serde_json::to_string(&execution) {
            Ok(payload) => {
                tokio::spawn(async move {
                    let result = with_retry(|| {
                        let store = Arc::clone(&store);
                        let key = key.clone();
                        let payload = payload.clone();
                        async move { store.set(&key, payload, None).await }
                    })
                    .await;
                    if let Err(e) = result {
                        tracing::warn!(key = %key, error = %e, "failed to persist workflow execution state");
                    }
                });
            }
            Err(e) => tracing::warn!(execution_id = %id, error = %e, "failed to serialize workflow execution state"),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
