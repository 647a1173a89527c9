// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Drives one [`DiscussionExecution`] to completion: each round invokes
//! every participant concurrently through the shared [`JobManager`], then
//! synthesizes a consensus score (spec.md §4.8 "Discussion loop").

use crate::discussion::{
    Contribution, ConsensusStrategy, DiscussionConfig, DiscussionExecution, DiscussionId, DiscussionStatus,
    ParticipantSummary, Round,
};
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
    current_job_ids: Vec<JobId>,
}

/// Synthesizes the `discussion:snapshot` event a late subscriber sees
/// before any live event on the topic (spec.md §4.6).
fn discussion_snapshot_event(exec: &DiscussionExecution) -> Event {
    Event::DiscussionSnapshot {
        execution_id: exec.id.to_string(),
        status: exec.status.to_string(),
        round: exec.rounds.len() as u32,
    }
}

enum InvocationOutcome {
    Completed(serde_json::Value),
    Failed(String),
    Cancelled,
}

pub struct DiscussionEngine<C: Clock> {
    job_manager: Arc<JobManager<C>>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    clock: C,
    runs: Mutex<HashMap<DiscussionId, DiscussionExecution>>,
    runtime: Mutex<HashMap<DiscussionId, RuntimeState>>,
    metrics: Mutex<Option<Arc<MetricsAggregator>>>,
}

impl<C: Clock> DiscussionEngine<C> {
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

    /// Attaches the shared metrics aggregator (spec.md §4.9's `discussion`
    /// scope); until this is called, terminal transitions aren't observed.
    pub fn set_metrics(&self, aggregator: Arc<MetricsAggregator>) {
        *self.metrics.lock() = Some(aggregator);
    }

    pub async fn start(self: &Arc<Self>, user_id: UserId, config: DiscussionConfig) -> Result<DiscussionId> {
        config.validate()?;
        let id = DiscussionId::new();
        let execution = DiscussionExecution::new(id, user_id, config, self.clock.epoch_ms());
        self.runs.lock().insert(id, execution);
        self.runtime.lock().insert(id, RuntimeState { cancel_requested: false, current_job_ids: Vec::new() });
        self.persist(&id);

        let me = Arc::clone(self);
        tokio::spawn(async move { me.run(id).await });
        Ok(id)
    }

    pub fn get_state(&self, id: &DiscussionId) -> Option<DiscussionExecution> {
        self.runs.lock().get(id).cloned()
    }

    /// Subscribe to a run's event topic. A subscriber joining after the run
    /// already has state receives a synthesized `discussion:snapshot`
    /// replay of its current status and round count before any live event
    /// (spec.md §4.6).
    pub fn subscribe(&self, id: &DiscussionId) -> loom_engine::Subscription {
        match self.runs.lock().get(id) {
            Some(exec) => self.bus.subscribe_with_snapshot(id.as_str(), discussion_snapshot_event(exec)),
            None => self.bus.subscribe(id.as_str()),
        }
    }

    pub fn cancel(&self, id: &DiscussionId) {
        let jobs = {
            let mut guard = self.runtime.lock();
            match guard.get_mut(id) {
                Some(rt) => {
                    rt.cancel_requested = true;
                    rt.current_job_ids.clone()
                }
                None => return,
            }
        };
        for job_id in jobs {
            let _ = self.job_manager.cancel(&job_id);
        }
    }

    async fn run(self: Arc<Self>, id: DiscussionId) {
        if let Some(exec) = self.runs.lock().get_mut(&id) {
            exec.status = DiscussionStatus::Running;
        }
        self.persist(&id);

        let (config, user_id) = {
            let guard = self.runs.lock();
            let exec = guard.get(&id).expect("execution must exist while running");
            (exec.config.clone(), exec.user_id)
        };

        let mut prior_rounds: Vec<Round> = Vec::new();
        let mut running_consensus = 0.0f64;
        let mut converged = false;
        let mut cancelled = false;
        let mut terminal_error: Option<String> = None;

        for round_index in 1..=config.max_rounds {
            if self.runtime.lock().get(&id).map(|rt| rt.cancel_requested).unwrap_or(true) {
                cancelled = true;
                break;
            }

            self.bus.publish(id.as_str(), Event::DiscussionRoundStarted { execution_id: id.to_string(), round: round_index });

            let gathered = self.gather_contributions(&id, user_id, &config, &prior_rounds, running_consensus).await;
            let contributions = match gathered {
                Ok(c) => c,
                Err(GatherError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(GatherError::Failed(e)) => {
                    terminal_error = Some(e);
                    break;
                }
            };

            for contribution in &contributions {
                self.bus.publish(
                    id.as_str(),
                    Event::DiscussionContribution {
                        execution_id: id.to_string(),
                        round: round_index,
                        participant_id: contribution.participant_id.clone(),
                        content: contribution.content.clone(),
                        agreement_score: contribution.agreement_score,
                    },
                );
            }

            let (synthesis, consensus_score) = match config.consensus_strategy {
                ConsensusStrategy::Facilitator => {
                    let facilitator = config.facilitator.clone().expect("validated at start");
                    match self.invoke_facilitator(&id, user_id, &facilitator, &config, &prior_rounds, &contributions).await {
                        Ok((synthesis, score)) => (synthesis, score),
                        Err(GatherError::Cancelled) => {
                            cancelled = true;
                            break;
                        }
                        Err(GatherError::Failed(e)) => {
                            terminal_error = Some(e);
                            break;
                        }
                    }
                }
                other => {
                    let score = aggregate_consensus(other, &contributions, &config);
                    (default_synthesis(&contributions), score)
                }
            };

            let round = Round { index: round_index, contributions, synthesis: Some(synthesis.clone()), consensus_score };
            {
                let mut guard = self.runs.lock();
                let exec = guard.get_mut(&id).expect("execution must exist");
                exec.rounds.push(round.clone());
            }
            self.persist(&id);
            self.bus.publish(
                id.as_str(),
                Event::DiscussionRoundCompleted { execution_id: id.to_string(), round: round_index, consensus_score },
            );

            running_consensus = consensus_score;
            prior_rounds.push(round);

            if consensus_score >= config.convergence_threshold {
                converged = true;
                self.bus.publish(
                    id.as_str(),
                    Event::DiscussionConverged { execution_id: id.to_string(), round: round_index, consensus_score },
                );
                break;
            }
        }

        self.finalize(&id, &config, prior_rounds, converged, cancelled, terminal_error);
    }

    /// Invokes every participant concurrently, then resolves them in
    /// declaration order regardless of completion order (spec.md §5
    /// "Discussion contributions within a round are emitted in
    /// participant-declaration order regardless of completion order").
    async fn gather_contributions(
        self: &Arc<Self>,
        id: &DiscussionId,
        user_id: UserId,
        config: &DiscussionConfig,
        prior_rounds: &[Round],
        emerging_consensus: f64,
    ) -> std::result::Result<Vec<Contribution>, GatherError> {
        let mut handles = Vec::with_capacity(config.participants.len());
        for participant in &config.participants {
            let me = Arc::clone(self);
            let id = *id;
            let participant = participant.clone();
            let topic = config.topic.clone();
            let transcript = prior_rounds.to_vec();
            handles.push(tokio::spawn(async move {
                let input = serde_json::json!({
                    "topic": topic,
                    "role": participant.role,
                    "perspective": participant.perspective,
                    "transcript": transcript,
                    "emergingConsensus": emerging_consensus,
                });
                let invocation = AgentInvocation { backend_kind: participant.agent.backend_kind, input };
                let outcome = me.invoke(&id, user_id, &invocation).await;
                (participant, outcome)
            }));
        }

        let mut contributions = Vec::with_capacity(handles.len());
        for handle in handles {
            let (participant, outcome) = handle.await.map_err(|e| GatherError::Failed(e.to_string()))?;
            match outcome {
                InvocationOutcome::Completed(payload) => {
                    let content = payload.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let agreement_score = payload.get("agreementScore").and_then(|v| v.as_f64());
                    contributions.push(Contribution { participant_id: participant.id, role: participant.role, content, agreement_score });
                }
                InvocationOutcome::Cancelled => return Err(GatherError::Cancelled),
                InvocationOutcome::Failed(e) => return Err(GatherError::Failed(e)),
            }
        }
        Ok(contributions)
    }

    async fn invoke_facilitator(
        self: &Arc<Self>,
        id: &DiscussionId,
        user_id: UserId,
        facilitator: &AgentInvocation,
        config: &DiscussionConfig,
        prior_rounds: &[Round],
        contributions: &[Contribution],
    ) -> std::result::Result<(String, f64), GatherError> {
        let input = serde_json::json!({
            "topic": config.topic,
            "transcript": prior_rounds,
            "contributions": contributions,
        });
        let invocation = AgentInvocation { backend_kind: facilitator.backend_kind, input };
        match self.invoke(id, user_id, &invocation).await {
            InvocationOutcome::Completed(payload) => {
                let synthesis = payload.get("synthesis").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let consensus_score = payload.get("consensusScore").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok((synthesis, consensus_score))
            }
            InvocationOutcome::Cancelled => Err(GatherError::Cancelled),
            InvocationOutcome::Failed(e) => Err(GatherError::Failed(e)),
        }
    }

    async fn invoke(self: &Arc<Self>, id: &DiscussionId, user_id: UserId, invocation: &AgentInvocation) -> InvocationOutcome {
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
            rt.current_job_ids.push(job_id);
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
            rt.current_job_ids.retain(|j| j != &job_id);
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

    fn finalize(
        &self,
        id: &DiscussionId,
        config: &DiscussionConfig,
        rounds: Vec<Round>,
        converged: bool,
        cancelled: bool,
        terminal_error: Option<String>,
    ) {
        let epoch_ms = self.clock.epoch_ms();
        let final_consensus = rounds.last().and_then(|r| r.synthesis.clone());
        let last_consensus_score = rounds.last().map(|r| r.consensus_score).unwrap_or(0.0);
        let summaries = summarize_participants(config, &rounds);
        let round_count = rounds.len() as u32;

        let created_at_ms = {
            let mut guard = self.runs.lock();
            let exec = guard.get_mut(id).expect("execution must exist");
            exec.converged = converged;
            exec.final_consensus = final_consensus;
            exec.participant_summaries = summaries;
            exec.status = if cancelled {
                DiscussionStatus::Cancelled
            } else if terminal_error.is_some() {
                DiscussionStatus::Failed
            } else {
                DiscussionStatus::Completed
            };
            exec.completed_at_ms = Some(epoch_ms);
            exec.created_at_ms
        };
        self.persist(id);
        self.runtime.lock().remove(id);

        if let Some(m) = self.metrics.lock().clone() {
            let job_status = match (cancelled, terminal_error.is_some()) {
                (true, _) => JobStatus::Cancelled,
                (false, true) => JobStatus::Failed,
                (false, false) => JobStatus::Completed,
            };
            m.record_terminal(
                Scope::Discussion,
                MetricsSample {
                    job_type: "discussion".to_string(),
                    status: job_status,
                    duration_ms: epoch_ms.saturating_sub(created_at_ms),
                    input_size: 0,
                    output_size: 0,
                    timestamp_ms: epoch_ms,
                },
            );
            if round_count > 0 {
                m.record_pattern(
                    Scope::Discussion,
                    PatternObservation {
                        converged,
                        rounds_or_iterations: round_count,
                        consensus_score: Some(last_consensus_score),
                        quality_improvement: None,
                    },
                );
            }
        }

        self.bus.publish(
            id.as_str(),
            Event::DiscussionCompleted { execution_id: id.to_string(), final_consensus: last_consensus_score, converged },
        );
        self.bus.retire(id.as_str());
    }

    fn persist(&self, id: &DiscussionId) {
        let Some(execution) = self.runs.lock().get(id).cloned() else { return };
        let store = Arc::clone(&self.store);
        let key = format!("discussion:{id}");
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
                        tracing::warn!(key = %key, error = %e, "failed to persist discussion run state");
                    }
                });
            }
            Err(e) => tracing::warn!(execution_id = %id, error = %e, "failed to serialize discussion run state"),
        }
    }
}

enum GatherError {
    Cancelled,
    Failed(String),
}

/// Aggregates round contributions into a consensus score per strategy
/// (spec.md §4.8's four formulas); `Facilitator` is handled by its own
/// invocation path and never reaches here.
fn aggregate_consensus(strategy: ConsensusStrategy, contributions: &[Contribution], config: &DiscussionConfig) -> f64 {
    let scores: Vec<f64> = contributions.iter().map(|c| c.agreement_score.unwrap_or(0.0)).collect();
    match strategy {
        ConsensusStrategy::Unanimous => scores.iter().cloned().fold(f64::INFINITY, f64::min).min(1.0).max(0.0),
        ConsensusStrategy::Majority => {
            if scores.is_empty() {
                0.0
            } else {
                scores.iter().filter(|&&s| s >= 0.5).count() as f64 / scores.len() as f64
            }
        }
        ConsensusStrategy::Weighted => {
            let (sum, total) = contributions.iter().zip(config.participants.iter()).fold((0.0, 0.0), |(sum, total), (c, p)| {
                (sum + p.weight * c.agreement_score.unwrap_or(0.0), total + p.weight)
            });
            if total > 0.0 {
                sum / total
            } else {
                0.0
            }
        }
        ConsensusStrategy::Facilitator => unreachable!("facilitator strategy is aggregated by invoke_facilitator"),
    }
}

/// Absent a separate synthesizer agent, the default synthesis is the
/// content of whichever participant declared the highest agreement,
/// ties broken toward the first participant in declaration order.
///
/// `Iterator::max_by` keeps the *last* of equally-maximal elements, which
/// would break ties toward the last-declared participant instead; a manual
/// fold that only replaces the best-so-far on a strict `>` keeps the first.
fn default_synthesis(contributions: &[Contribution]) -> String {
    let mut best: Option<(usize, f64)> = None;
    for (index, contribution) in contributions.iter().enumerate() {
        let score = contribution.agreement_score.unwrap_or(0.0);
        let is_new_best = match best {
            Some((_, best_score)) => score > best_score,
            None => true,
        };
        if is_new_best {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| contributions[index].content.clone()).unwrap_or_default()
}

fn summarize_participants(config: &DiscussionConfig, rounds: &[Round]) -> Vec<ParticipantSummary> {
    config
        .participants
        .iter()
        .map(|participant| {
            let scores: Vec<f64> = rounds
                .iter()
                .flat_map(|r| &r.contributions)
                .filter(|c| c.participant_id == participant.id)
                .filter_map(|c| c.agreement_score)
                .collect();
            let average = if scores.is_empty() { 0.0 } else { scores.iter().sum::<f64>() / scores.len() as f64 };
            ParticipantSummary {
                participant_id: participant.id.clone(),
                role: participant.role.clone(),
                rounds_contributed: scores.len() as u32,
                average_agreement_score: average,
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "discussion_engine_tests.rs"]
mod tests;
