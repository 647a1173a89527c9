// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Self-critique loop types (spec.md §4.8 "Self-critique loop").

use crate::invocation::AgentInvocation;
use loom_core::{OrchestrationError, Result, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

loom_core::define_id! {
    /// Unique identifier for a self-critique run.
    #[derive(Default)]
    pub struct CritiqueId("crt-");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCriterion {
    pub name: String,
    pub weight: f64,
}

/// A single self-critique run's configuration (spec.md §4.8 inputs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfCritiqueConfig {
    /// The agent invocation that produces each iteration's candidate output.
    pub task: AgentInvocation,
    /// The agent invocation that scores a candidate; defaults to `task`
    /// itself when absent ("same agent or a designated critic agent").
    pub critic: Option<AgentInvocation>,
    pub max_iterations: u32,
    pub quality_criteria: Vec<QualityCriterion>,
    pub quality_threshold: f64,
    pub stop_on_quality_threshold: bool,
}

impl SelfCritiqueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(OrchestrationError::ValidationFailed {
                reason: "maxIterations must be at least 1".to_string(),
            });
        }
        if self.quality_criteria.is_empty() {
            return Err(OrchestrationError::ValidationFailed {
                reason: "qualityCriteria must not be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(OrchestrationError::ValidationFailed {
                reason: "qualityThreshold must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl CritiqueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

loom_core::simple_display! {
    CritiqueStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// One iteration's critique result (spec.md §3 "critique{...}").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub overall_score: f64,
    pub criteria_scores: HashMap<String, f64>,
    pub feedback: String,
    pub meets_threshold: bool,
}

/// One completed iteration (spec.md §3 "iterations[]").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub index: u32,
    pub output: serde_json::Value,
    pub critique: Critique,
}

/// One run of a [`SelfCritiqueConfig`] (spec.md §3 "Self-critique").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfCritiqueExecution {
    pub id: CritiqueId,
    pub user_id: UserId,
    pub config: SelfCritiqueConfig,
    pub iterations: Vec<Iteration>,
    pub converged: bool,
    pub final_output: Option<serde_json::Value>,
    pub final_score: Option<f64>,
    pub status: CritiqueStatus,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl SelfCritiqueExecution {
    pub fn new(id: CritiqueId, user_id: UserId, config: SelfCritiqueConfig, created_at_ms: u64) -> Self {
        Self {
            id,
            user_id,
            config,
            iterations: Vec::new(),
            converged: false,
            final_output: None,
            final_score: None,
            status: CritiqueStatus::Pending,
            created_at_ms,
            completed_at_ms: None,
        }
    }
}

#[cfg(test)]
#[path = "critique_tests.rs"]
mod tests;
