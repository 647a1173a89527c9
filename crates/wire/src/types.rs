// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Read-model DTOs projected off the domain execution types (spec.md §6.1,
//! §3). Each has a `From<&Domain>` conversion, the same shape
//! `oj-wire`'s `status.rs` uses for its `JobStatusEntry`/`OrphanSummary`
//! projections.

use std::collections::HashMap;

use loom_collab::{CritiqueId, CritiqueStatus, DiscussionId, DiscussionStatus, ParticipantSummary, SelfCritiqueExecution, DiscussionExecution};
use loom_core::{BackendKind, ErrorKind, Job, JobId, JobStatus, UserId};
use loom_workflow::{ExecutionId, StepState, WorkflowExecution, WorkflowStatus};
use serde::{Deserialize, Serialize};

/// A job's externally observable state (spec.md §6.1 `getState`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    pub id: JobId,
    pub user_id: UserId,
    pub backend_kind: BackendKind,
    pub status: JobStatus,
    pub progress: u8,
    pub queue_position: Option<usize>,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub exit_code: Option<i32>,
    pub result_payload: Option<serde_json::Value>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl From<&Job> for JobState {
    fn from(job: &Job) -> Self {
        JobState {
            id: job.id,
            user_id: job.user_id,
            backend_kind: job.backend_kind,
            status: job.status,
            progress: job.progress,
            queue_position: job.queue_position,
            created_at_ms: job.created_at_ms,
            started_at_ms: job.started_at_ms,
            completed_at_ms: job.completed_at_ms,
            stdout: job.stdout.as_str().to_string(),
            stdout_truncated: job.stdout.truncated(),
            stderr: job.stderr.as_str().to_string(),
            stderr_truncated: job.stderr.truncated(),
            exit_code: job.exit_code,
            result_payload: job.result_payload.clone(),
            error_kind: job.error_kind,
            error_message: job.error_message.clone(),
        }
    }
}

/// Returned instead of a synchronous `JobState` when a submit downgrades to
/// queued (spec.md §6.1 "Submit (synchronous)").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedHandle {
    pub job_id: JobId,
    pub queue_position: usize,
    pub estimated_wait_seconds: u64,
}

/// A workflow execution's externally observable state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub id: ExecutionId,
    pub user_id: UserId,
    pub status: WorkflowStatus,
    pub step_states: HashMap<String, StepState>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl From<&WorkflowExecution> for WorkflowState {
    fn from(exec: &WorkflowExecution) -> Self {
        WorkflowState {
            id: exec.id,
            user_id: exec.user_id,
            status: exec.status,
            step_states: exec.step_states.clone(),
            created_at_ms: exec.created_at_ms,
            completed_at_ms: exec.completed_at_ms,
        }
    }
}

/// A self-critique run's externally observable state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CritiqueState {
    pub id: CritiqueId,
    pub user_id: UserId,
    pub status: CritiqueStatus,
    pub iteration_count: u32,
    pub converged: bool,
    pub final_output: Option<serde_json::Value>,
    pub final_score: Option<f64>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl From<&SelfCritiqueExecution> for CritiqueState {
    fn from(exec: &SelfCritiqueExecution) -> Self {
        CritiqueState {
            id: exec.id,
            user_id: exec.user_id,
            status: exec.status,
            iteration_count: exec.iterations.len() as u32,
            converged: exec.converged,
            final_output: exec.final_output.clone(),
            final_score: exec.final_score,
            created_at_ms: exec.created_at_ms,
            completed_at_ms: exec.completed_at_ms,
        }
    }
}

/// A discussion run's externally observable state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscussionState {
    pub id: DiscussionId,
    pub user_id: UserId,
    pub status: DiscussionStatus,
    pub round_count: u32,
    pub converged: bool,
    pub final_consensus: Option<String>,
    pub participant_summaries: Vec<ParticipantSummary>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl From<&DiscussionExecution> for DiscussionState {
    fn from(exec: &DiscussionExecution) -> Self {
        DiscussionState {
            id: exec.id,
            user_id: exec.user_id,
            status: exec.status,
            round_count: exec.rounds.len() as u32,
            converged: exec.converged,
            final_consensus: exec.final_consensus.clone(),
            participant_summaries: exec.participant_summaries.clone(),
            created_at_ms: exec.created_at_ms,
            completed_at_ms: exec.completed_at_ms,
        }
    }
}

/// Health surface (spec.md §6.1 `health()`, §6.5 "200 when all backends are
/// at least available or fallback, 503 otherwise").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub active_jobs: usize,
    pub queue_size: usize,
    pub backends: HashMap<String, bool>,
}

/// Paginated listing (spec.md §6.1 `list` → `Page<JobState>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Slice `all` into the requested page. `page` is 1-indexed; a page past
    /// the end returns an empty `items` rather than an error.
    pub fn paginate(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let total = all.len();
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = (page - 1).saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        let items = all.into_iter().skip(start).take(end - start).collect();
        Page { items, page, page_size, total }
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
