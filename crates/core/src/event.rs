// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Event types for the orchestration layer.
//!
//! [`BackendEvent`] is the synchronous callback vocabulary an
//! [`AgentBackend`](crate) implementation reports through (spec.md §4.3).
//! [`Event`] is the typed fan-out vocabulary the event bus (C6) delivers to
//! subscribers (spec.md §6.2); it is what a transport adapter would render
//! onto the wire, but the exact wire encoding stays the transport's concern.

use crate::job::JobId;
use crate::validation::ValidationReport;
use serde::{Deserialize, Serialize};

/// Ordered callback events a backend reports during `execute` (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendEvent {
    Start,
    Stdout(String),
    Stderr(String),
    Progress { percent: u8, stage: Option<String> },
    /// Incremental structured delta (e.g. a partial token or render frame).
    Partial(serde_json::Value),
    End(BackendResult),
}

/// Normalized backend outcome (spec.md §9 "Ad-hoc JSON shape drift").
///
/// The contract always returns this typed shape; a stdout-shaped or
/// wrapped-object shape is never exposed past the backend boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResult {
    pub exit_code: Option<i32>,
    pub payload: serde_json::Value,
    pub duration_ms: u64,
}

/// Returns ` job={id}` for compact structured log lines, matching the
/// teacher's `ns_fragment`-style helper.
pub fn job_fragment(id: &JobId) -> String {
    format!(" job={id}")
}

/// Fan-out events delivered to job/workflow/collaboration subscribers
/// (spec.md §6.2). Serializes with `{"type": "cli:progress", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- cli backend --
    #[serde(rename = "cli:queued")]
    CliQueued { job_id: JobId, queue_position: usize, estimated_wait_seconds: u64 },

    #[serde(rename = "cli:progress")]
    CliProgress { job_id: JobId, data: String },

    #[serde(rename = "cli:complete")]
    CliComplete {
        job_id: JobId,
        stdout: String,
        stderr: String,
        exit_code: i32,
        duration_ms: u64,
    },

    #[serde(rename = "cli:error")]
    CliError { job_id: JobId, code: String, message: String },

    // -- dsl backend --
    #[serde(rename = "dsl:validated")]
    DslValidated { job_id: JobId, validation: ValidationReport },

    #[serde(rename = "dsl:progress")]
    DslProgress { job_id: JobId, percent: u8, stage: String },

    #[serde(rename = "dsl:complete")]
    DslComplete {
        job_id: JobId,
        success: bool,
        audio_data: Vec<u8>,
        duration_ms: u64,
        sample_rate: u32,
        channels: u8,
        format: String,
        file_size: usize,
    },

    // -- job lifecycle (backend-agnostic) --
    #[serde(rename = "job:snapshot")]
    JobSnapshot { job_id: JobId, progress: u8, stdout_so_far: String, truncated: bool },

    #[serde(rename = "job:dropped")]
    JobDropped { job_id: JobId, dropped: u64 },

    // -- workflow --
    #[serde(rename = "workflow:snapshot")]
    WorkflowSnapshot {
        execution_id: String,
        status: String,
        step_states: std::collections::BTreeMap<String, String>,
    },

    #[serde(rename = "workflow:queued")]
    WorkflowQueued { execution_id: String },

    #[serde(rename = "workflow:started")]
    WorkflowStarted { execution_id: String },

    #[serde(rename = "workflow:step:started")]
    WorkflowStepStarted { execution_id: String, step_id: String },

    #[serde(rename = "workflow:step:progress")]
    WorkflowStepProgress { execution_id: String, step_id: String, percent: u8 },

    #[serde(rename = "workflow:step:completed")]
    WorkflowStepCompleted { execution_id: String, step_id: String },

    #[serde(rename = "workflow:step:failed")]
    WorkflowStepFailed { execution_id: String, step_id: String, error: String },

    #[serde(rename = "workflow:step:skipped")]
    WorkflowStepSkipped { execution_id: String, step_id: String },

    #[serde(rename = "workflow:completed")]
    WorkflowCompleted { execution_id: String },

    #[serde(rename = "workflow:failed")]
    WorkflowFailed { execution_id: String, error: String },

    #[serde(rename = "workflow:cancelled")]
    WorkflowCancelled { execution_id: String },

    // -- self-critique --
    #[serde(rename = "critique:snapshot")]
    CritiqueSnapshot { execution_id: String, status: String, iterations: u32 },

    #[serde(rename = "critique:iteration")]
    CritiqueIteration {
        execution_id: String,
        iteration: u32,
        output: String,
        overall_score: f64,
        feedback: String,
    },

    #[serde(rename = "critique:converged")]
    CritiqueConverged { execution_id: String, iteration: u32, final_score: f64 },

    #[serde(rename = "critique:completed")]
    CritiqueCompleted { execution_id: String, final_score: f64, converged: bool },

    // -- discussion --
    #[serde(rename = "discussion:snapshot")]
    DiscussionSnapshot { execution_id: String, status: String, round: u32 },

    #[serde(rename = "discussion:round-started")]
    DiscussionRoundStarted { execution_id: String, round: u32 },

    #[serde(rename = "discussion:contribution")]
    DiscussionContribution {
        execution_id: String,
        round: u32,
        participant_id: String,
        content: String,
        agreement_score: Option<f64>,
    },

    #[serde(rename = "discussion:round-completed")]
    DiscussionRoundCompleted { execution_id: String, round: u32, consensus_score: f64 },

    #[serde(rename = "discussion:converged")]
    DiscussionConverged { execution_id: String, round: u32, consensus_score: f64 },

    #[serde(rename = "discussion:completed")]
    DiscussionCompleted { execution_id: String, final_consensus: f64, converged: bool },

    /// Catch-all for forward-compatible deserialization (extensibility).
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    /// Terminal events are the last event a subscriber sees for their topic
    /// (spec.md §8 "exactly one terminal event ... and it is the last").
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::CliComplete { .. }
                | Event::CliError { .. }
                | Event::DslComplete { .. }
                | Event::WorkflowCompleted { .. }
                | Event::WorkflowFailed { .. }
                | Event::WorkflowCancelled { .. }
                | Event::CritiqueCompleted { .. }
                | Event::DiscussionCompleted { .. }
        )
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
