// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use loom_core::{ErrorKind, OrchestrationError};
use loom_metrics::Snapshot;
use serde::{Deserialize, Serialize};

use crate::types::{CritiqueState, DiscussionState, HealthStatus, JobState, Page, QueuedHandle, WorkflowState};

/// Outcome of `cancel(jobId, caller)` (spec.md §6.1). `JobManager::cancel`
/// itself only reports `Ok(())` (including on an already-terminal job, its
/// idempotent no-op case) or `NotFound`/`Forbidden`; a transport adapter
/// calling this needs to have checked the job's prior status itself to
/// distinguish `Cancelled` from `AlreadyTerminal`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
    NotFound,
    Forbidden,
}

impl CancelOutcome {
    /// `was_already_terminal` is the job's status (read before the cancel
    /// call) — `JobManager::cancel` itself can't distinguish the two `Ok`
    /// cases after the fact.
    pub fn from_result(was_already_terminal: bool, result: &Result<(), OrchestrationError>) -> Self {
        match result {
            Ok(()) if was_already_terminal => CancelOutcome::AlreadyTerminal,
            Ok(()) => CancelOutcome::Cancelled,
            Err(OrchestrationError::Forbidden) => CancelOutcome::Forbidden,
            Err(_) => CancelOutcome::NotFound,
        }
    }
}

/// The full response surface (spec.md §6.1), one variant per documented
/// return shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    JobResult { job: Box<JobState> },
    Queued { handle: QueuedHandle },
    RateLimited { retry_after_sec: u64 },
    ValidationFailed { reason: String },

    JobState { job: Box<JobState> },
    Cancel { outcome: CancelOutcome },
    JobList { page: Page<JobState> },

    WorkflowState { execution: Box<WorkflowState> },
    CritiqueState { execution: Box<CritiqueState> },
    DiscussionState { execution: Box<DiscussionState> },

    MetricsSnapshot { snapshot: Box<Snapshot> },
    Health { status: HealthStatus },

    Error { kind: ErrorKind, message: String },
}

impl From<&OrchestrationError> for Response {
    fn from(err: &OrchestrationError) -> Self {
        Response::Error { kind: err.kind(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
