// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! `WorkflowExecution`: one run of a [`WorkflowDefinition`] (spec.md §3
//! "WorkflowExecution").

use crate::definition::{OnError, StepDefinition, WorkflowDefinition};
use loom_core::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

loom_core::define_id! {
    /// Unique identifier for a workflow execution.
    #[derive(Default)]
    pub struct ExecutionId("exe-");
}

/// Per-step status (spec.md §3 "stepStates").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

loom_core::simple_display! {
    StepStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

loom_core::simple_display! {
    WorkflowStatus {
        Pending => "pending",
        Queued => "queued",
        Running => "running",
        Paused => "paused",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StepState {
    fn pending() -> Self {
        Self { status: StepStatus::Pending, output: None, error: None }
    }
}

/// Execution-level status machine (spec.md §3 "WorkflowExecution").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One run of a [`WorkflowDefinition`] (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub user_id: UserId,
    pub definition: WorkflowDefinition,
    pub step_states: HashMap<String, StepState>,
    pub status: WorkflowStatus,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl WorkflowExecution {
    pub fn new(
        id: ExecutionId,
        user_id: UserId,
        definition: WorkflowDefinition,
        created_at_ms: u64,
    ) -> Self {
        let step_states =
            definition.steps.iter().map(|s| (s.id.clone(), StepState::pending())).collect();
        Self {
            id,
            user_id,
            definition,
            step_states,
            status: WorkflowStatus::Pending,
            created_at_ms,
            completed_at_ms: None,
        }
    }

    /// Build the `context` JSON object from every terminal step's output
    /// (spec.md §4.7 "Context update ... bound into `context` under
    /// `steps[id].out`").
    pub fn context(&self) -> serde_json::Value {
        let steps: serde_json::Map<String, serde_json::Value> = self
            .step_states
            .iter()
            .filter(|(_, state)| state.status.is_terminal())
            .map(|(id, state)| {
                let out = state.output.clone().unwrap_or(serde_json::Value::Null);
                (id.clone(), serde_json::json!({ "out": out }))
            })
            .collect();
        serde_json::json!({ "steps": steps })
    }

    /// Steps that are still `pending` and whose dependencies are all
    /// satisfied (spec.md §4.7 "Scheduling order").
    pub fn ready_steps(&self) -> Vec<&StepDefinition> {
        self.definition
            .steps
            .iter()
            .filter(|step| {
                self.step_states.get(&step.id).map(|s| s.status) == Some(StepStatus::Pending)
                    && step.depends_on.iter().all(|dep| self.dependency_satisfied(dep))
            })
            .collect()
    }

    /// A dependency is satisfied once it is `completed` or `skipped`, or
    /// `failed` with `onError=continue` (treated as completed-with-null-output
    /// for downstream purposes; see DESIGN.md Open Question on this point).
    fn dependency_satisfied(&self, dep_id: &str) -> bool {
        let Some(state) = self.step_states.get(dep_id) else { return false };
        match state.status {
            StepStatus::Completed | StepStatus::Skipped => true,
            StepStatus::Failed => self
                .definition
                .step(dep_id)
                .map(|s| s.on_error == OnError::Continue)
                .unwrap_or(false),
            StepStatus::Pending | StepStatus::Running => false,
        }
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.step_states.values().all(|s| s.status.is_terminal())
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
