// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Workflow definitions: a DAG of named steps (spec.md §4.7).

use loom_core::{BackendKind, OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What happens to the execution when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// The execution transitions to `failed` once currently-running steps settle.
    Abort,
    /// The failure is recorded; dependents still run, treating this step as
    /// satisfied with a `null` output.
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        Self::Abort
    }
}

/// One node in a [`WorkflowDefinition`]'s DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub agent_type: BackendKind,
    /// Input template; string leaves may contain `${steps.<id>.out.<field>}`
    /// placeholders resolved against the execution's `context` (see
    /// `template.rs`).
    pub input: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Pure boolean expression over `context`, e.g. `"steps.A.out.ok == true"`.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    300_000
}

/// A declarative DAG workflow (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self { name: name.into(), steps }
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Validate that the step graph is a DAG (spec.md §9 "Cyclic workflow
    /// detection"): every `dependsOn` reference resolves to a declared step,
    /// step ids are unique, and a topological sort succeeds.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(OrchestrationError::ValidationFailed {
                    reason: format!("duplicate step id: {}", step.id),
                });
            }
        }
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(OrchestrationError::ValidationFailed {
                        reason: format!("step {} depends on unknown step {dep}", step.id),
                    });
                }
            }
        }

        // Kahn's algorithm: a remaining in-degree after exhausting all
        // zero-in-degree nodes means a cycle exists.
        let mut in_degree: HashMap<&str, usize> =
            self.steps.iter().map(|s| (s.id.as_str(), s.depends_on.len())).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
            }
        }

        let mut queue: Vec<&str> =
            in_degree.iter().filter(|(_, deg)| **deg == 0).map(|(id, _)| *id).collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop() {
            visited += 1;
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    let deg = in_degree.get_mut(dependent).expect("dependent must be tracked");
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(dependent);
                    }
                }
            }
        }

        if visited != self.steps.len() {
            return Err(OrchestrationError::ValidationFailed { reason: "cycle".to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
