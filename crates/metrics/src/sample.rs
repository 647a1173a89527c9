// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Recorded observations (spec.md §3 "MetricsSample").

use loom_core::JobStatus;
use serde::{Deserialize, Serialize};

/// A top-level metrics bucket (spec.md §4.9 "Scopes: cli, dsl, workflow,
/// self-critique, discussion").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Cli,
    Dsl,
    Workflow,
    SelfCritique,
    Discussion,
}

loom_core::simple_display! {
    Scope {
        Cli => "cli",
        Dsl => "dsl",
        Workflow => "workflow",
        SelfCritique => "self-critique",
        Discussion => "discussion",
    }
}

/// One terminal job's record (spec.md §3 "MetricsSample — jobType, status,
/// durationMs, inputSize, outputSize, timestamp").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub job_type: String,
    pub status: JobStatus,
    pub duration_ms: u64,
    pub input_size: usize,
    pub output_size: usize,
    pub timestamp_ms: u64,
}

/// A collaboration-pattern-specific observation, recorded alongside a
/// terminal sample for the `self-critique`/`discussion` scopes (spec.md
/// §4.9's "scope-specific ratios").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatternObservation {
    pub converged: bool,
    /// Discussion rounds run, or self-critique iterations run.
    pub rounds_or_iterations: u32,
    /// Discussion only: the final round's consensus score.
    pub consensus_score: Option<f64>,
    /// Self-critique only: final iteration's overall score minus the
    /// first iteration's.
    pub quality_improvement: Option<f64>,
}
