// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Drives one [`SelfCritiqueExecution`] to completion by submitting each
//! iteration's task and critique invocations as ordinary jobs through the
//! shared [`JobManager`] (spec.md §4.8 "Self-critique loop").

use crate::critique::{Critique, CritiqueId, CritiqueStatus, Iteration, SelfCritiqueConfig, SelfCritiqueExecution};
use crate::invocation::{AgentInvocation, DEFAULT_TIMEOUT_MS};
use loom_core::{Clock, Event, JobId, JobStatus, Result, UserId};
use loom_engine::event_bus::recv_or_dropped;
use loom_engine::{EventBus, JobManager, SubmitRequest};
use loom_metrics::{MetricsAggregator, MetricsSample, PatternObservation, Scope};
use loom_store::{with_retry, StateStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct RuntimeState {
    cancel_requested: bool,
    current_job_id: Option<JobId>,
}

/// Synthesizes the `critique:snapshot` event a late subscriber sees before
/// any live event on the topic (spec.md §4.6).
fn critique_snapshot_event(exec: &SelfCritiqueExecution) -> Event {
    Event::CritiqueSnapshot {
        execution_id: exec.id.to_string(),
        status: exec.status.to_string(),
        iterations: exec.iterations.len() as u32,
    }
}

enum InvocationOutcome {
    Completed(serde_json::Value),
    Failed(String),
    Cancelled,
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct CritiqueEngine<C: Clock> {
    job_manager: Arc<JobManager<C>>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    clock: C,
    runs: Mutex<HashMap<CritiqueId, SelfCritiqueExecution>>,
    runtime: Mutex<HashMap<CritiqueId, RuntimeState>>,
    metrics: Mutex<Option<Arc<MetricsAggregator>>>,
}

impl<C: Clock> CritiqueEngine<C> {
    pub fn new(job_manager: Arc<JobManager<C>>, bus: Arc<EventBus>, store: Arc<dyn StateStore>, clock: C) -> Arc<Self> {
        Arc::new(Self {
            job_manager,
            bus,
            store,
            clock,
            runs: Mutex::new(HashMap::new()),
            runtime: Mutex::new(HashMap::new()),
            metrics: Mutex::new(None),
        })
    }

    /// Attaches the shared metrics aggregator (spec.md §4.9's
    /// `self-critique` scope); until this is called, terminal transitions
    /// aren't observed.
    pub fn set_metrics(&self, aggregator: Arc<MetricsAggregator>) {
        *self.metrics.lock() = Some(aggregator);
    }

    pub async fn start(self: &Arc<Self>, user_id: UserId, config: SelfCritiqueConfig) -> Result<CritiqueId> {
        config.validate()?;
        let id = CritiqueId::new();
        let execution = SelfCritiqueExecution::new(id, user_id, config, self.clock.epoch_ms());
        self.runs.lock().insert(id, execution);
        self.runtime.lock().insert(id, RuntimeState { cancel_requested: false, current_job_id: None });
        self.persist(&id);

        let me = Arc::clone(self);
        tokio::spawn(async move { me.run(id).await });
        Ok(id)
    }

    pub fn get_state(&self, id: &CritiqueId) -> Option<SelfCritiqueExecution> {
        self.runs.lock().get(id).cloned()
    }

    /// Subscribe to a run's event topic. A subscriber joining after the run
    /// already has state receives a synthesized `critique:snapshot` replay
    /// of its current status and iteration count before any live event
    /// (spec.md §4.6).
    pub fn subscribe(&self, id: &CritiqueId) -> loom_engine::Subscription {
        match self.runs.lock().get(id) {
            Some(exec) => self.bus.subscribe_with_snapshot(id.as_str(), critique_snapshot_event(exec)),
            None => self.bus.subscribe(id.as_str()),
        }
    }

    /// Cancels the run; the currently in-flight invocation is cancelled
    /// cooperatively and no further iterations start.
    pub fn cancel(&self, id: &CritiqueId) {
        let current = {
            let mut guard = self.runtime.lock();
            match guard.get_mut(id) {
                Some(rt) => {
                    rt.cancel_requested = true;
                    rt.current_job_id
                }
                None => return,
            }
        };
        if let Some(job_id) = current {
            let _ = self.job_manager.cancel(&job_id);
        }
    }

    async fn run(self: Arc<Self>, id: CritiqueId) {
        if let Some(exec) = self.runs.lock().get_mut(&id) {
            exec.status = CritiqueStatus::Running;
        }
        self.persist(&id);

        let (config, user_id) = {
            let guard = self.runs.lock();
            let exec = guard.get(&id).expect("execution must exist while running");
            (exec.config.clone(), exec.user_id)
        };

        let mut previous: Option<(serde_json::Value, Critique)> = None;
        let mut converged = false;
        let mut cancelled = false;
        let mut terminal_error: Option<String> = None;

        for index in 1..=config.max_iterations {
            if self.runtime.lock().get(&id).map(|rt| rt.cancel_requested).unwrap_or(true) {
                cancelled = true;
                break;
            }

            let task_input = match &previous {
                None => config.task.input.clone(),
                Some((output, critique)) => serde_json::json!({
                    "input": config.task.input,
                    "previousOutput": output,
                    "previousCritique": critique,
                }),
            };
            let task = AgentInvocation { backend_kind: config.task.backend_kind, input: task_input };
            let output = match self.invoke(&id, user_id, &task).await {
                InvocationOutcome::Completed(v) => v,
                InvocationOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
                InvocationOutcome::Failed(e) => {
                    terminal_error = Some(e);
                    break;
                }
            };

            let critic = config.critic.clone().unwrap_or_else(|| config.task.clone());
            let critic_input = serde_json::json!({
                "task": config.task.input,
                "output": output,
                "criteria": config.quality_criteria.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
            });
            let critic_invocation = AgentInvocation { backend_kind: critic.backend_kind, input: critic_input };
            let critique_payload = match self.invoke(&id, user_id, &critic_invocation).await {
                InvocationOutcome::Completed(v) => v,
                InvocationOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
                InvocationOutcome::Failed(e) => {
                    terminal_error = Some(e);
                    break;
                }
            };

            let criteria_scores: HashMap<String, f64> = critique_payload
                .get("criteriaScores")
                .and_then(|v| v.as_object())
                .map(|obj| obj.iter().filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n))).collect())
                .unwrap_or_default();
            let feedback = critique_payload.get("feedback").and_then(|v| v.as_str()).unwrap_or_default().to_string();

            let (weighted_sum, weight_total) = config.quality_criteria.iter().fold((0.0, 0.0), |(sum, total), c| {
                let score = criteria_scores.get(&c.name).copied().unwrap_or(0.0);
                (sum + c.weight * score, total + c.weight)
            });
            let overall_score = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
            let meets_threshold = overall_score >= config.quality_threshold;
            let critique = Critique { overall_score, criteria_scores, feedback, meets_threshold };

            {
                let mut guard = self.runs.lock();
                let exec = guard.get_mut(&id).expect("execution must exist");
                exec.iterations.push(Iteration { index, output: output.clone(), critique: critique.clone() });
            }
            self.persist(&id);
            self.bus.publish(
                id.as_str(),
                Event::CritiqueIteration {
                    execution_id: id.to_string(),
                    iteration: index,
                    output: stringify(&output),
                    overall_score,
                    feedback: critique.feedback.clone(),
                },
            );

            previous = Some((output, critique));

            if config.stop_on_quality_threshold && meets_threshold {
                converged = true;
                self.bus.publish(
                    id.as_str(),
                    Event::CritiqueConverged { execution_id: id.to_string(), iteration: index, final_score: overall_score },
                );
                break;
            }
        }

        self.finalize(&id, converged, cancelled, terminal_error);
    }

    /// Submits one agent call as a job and awaits its terminal state,
    /// tracking the job id so `cancel` can reach it.
    async fn invoke(self: &Arc<Self>, id: &CritiqueId, user_id: UserId, invocation: &AgentInvocation) -> InvocationOutcome {
        let req = SubmitRequest {
            user_id,
            backend_kind: invocation.backend_kind,
            input: invocation.input.clone(),
            priority: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            buffer_cap_bytes: 1024 * 1024,
        };
        let job_id = match self.job_manager.submit(req).await {
            Ok(job_id) => job_id,
            Err(e) => return InvocationOutcome::Failed(e.to_string()),
        };
        if let Some(rt) = self.runtime.lock().get_mut(id) {
            rt.current_job_id = Some(job_id);
        }

        let mut sub = self.job_manager.subscribe(&job_id);
        loop {
            match recv_or_dropped(job_id, &mut sub.receiver).await {
                Some(seq_event) if seq_event.event.is_terminal() => break,
                Some(_) => continue,
                None => break,
            }
        }
        if let Some(rt) = self.runtime.lock().get_mut(id) {
            rt.current_job_id = None;
        }

        match self.job_manager.get_state(&job_id) {
            Some(job) if job.status == JobStatus::Completed => {
                InvocationOutcome::Completed(job.result_payload.unwrap_or(serde_json::Value::Null))
            }
            Some(job) if job.status == JobStatus::Cancelled => InvocationOutcome::Cancelled,
            Some(job) => InvocationOutcome::Failed(
                job.error_message.unwrap_or_else(|| format!("invocation job ended in status {}", job.status)),
            ),
            None => InvocationOutcome::Failed("invocation job disappeared before completion".to_string()),
        }
    }

    fn finalize(&self, id: &CritiqueId, converged: bool, cancelled: bool, terminal_error: Option<String>) {
        let epoch_ms = self.clock.epoch_ms();
        let (final_score, status, created_at_ms, iteration_count, quality_improvement) = {
            let mut guard = self.runs.lock();
            let exec = guard.get_mut(id).expect("execution must exist");

            let mut best: Option<usize> = None;
            for (i, iter) in exec.iterations.iter().enumerate() {
                let keep = match best {
                    Some(b) => iter.critique.overall_score >= exec.iterations[b].critique.overall_score,
                    None => true,
                };
                if keep {
                    best = Some(i);
                }
            }
            let (final_output, final_score) = match best {
                Some(i) => (Some(exec.iterations[i].output.clone()), Some(exec.iterations[i].critique.overall_score)),
                None => (None, None),
            };
            let quality_improvement = match (exec.iterations.first(), exec.iterations.last()) {
                (Some(first), Some(last)) => Some(last.critique.overall_score - first.critique.overall_score),
                _ => None,
            };

            exec.converged = converged;
            exec.final_output = final_output;
            exec.final_score = final_score;
            exec.status = if cancelled {
                CritiqueStatus::Cancelled
            } else if terminal_error.is_some() {
                CritiqueStatus::Failed
            } else {
                CritiqueStatus::Completed
            };
            exec.completed_at_ms = Some(epoch_ms);
            (final_score, exec.status, exec.created_at_ms, exec.iterations.len() as u32, quality_improvement)
        };
        self.persist(id);
        self.runtime.lock().remove(id);

        if let Some(m) = self.metrics.lock().clone() {
            let job_status = match status {
                CritiqueStatus::Completed => JobStatus::Completed,
                CritiqueStatus::Cancelled => JobStatus::Cancelled,
                _ => JobStatus::Failed,
            };
            m.record_terminal(
                Scope::SelfCritique,
                MetricsSample {
                    job_type: "self-critique".to_string(),
                    status: job_status,
                    duration_ms: epoch_ms.saturating_sub(created_at_ms),
                    input_size: 0,
                    output_size: 0,
                    timestamp_ms: epoch_ms,
                },
            );
            if iteration_count > 0 {
                m.record_pattern(
                    Scope::SelfCritique,
                    PatternObservation {
                        converged,
                        rounds_or_iterations: iteration_count,
                        consensus_score: None,
                        quality_improvement,
                    },
                );
            }
        }

        self.bus.publish(
            id.as_str(),
            Event::CritiqueCompleted { execution_id: id.to_string(), final_score: final_score.unwrap_or(0.0), converged },
        );
        self.bus.retire(id.as_str());
    }

    fn persist(&self, id: &CritiqueId) {
        let Some(execution) = self.runs.lock().get(id).cloned() else { return };
        let store = Arc::clone(&self.store);
        let key = format!("critique:{id}");
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
                        tracing::warn!(key = %key, error = %e, "failed to persist self-critique run state");
                    }
                });
            }
            Err(e) => tracing::warn!(execution_id = %id, error = %e, "failed to serialize self-critique run state"),
        }
    }
}

#[cfg(test)]
#[path = "critique_engine_tests.rs"]
mod tests;
