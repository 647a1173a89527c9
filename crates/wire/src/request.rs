// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Request surface consumed from a transport collaborator (spec.md §6.1).
//! Tagged the way `oj-wire`'s `Query`/`Request` enums are, so a transport
//! adapter can deserialize one frame straight into the right variant.

use loom_collab::{DiscussionConfig, SelfCritiqueConfig};
use loom_core::{BackendKind, JobId, JobStatus, UserId};
use loom_metrics::Scope;
use loom_workflow::WorkflowDefinition;
use serde::{Deserialize, Serialize};

/// Pagination + filter parameters for `list` (spec.md §6.1 "List").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListQuery {
    pub page: usize,
    pub page_size: usize,
    #[serde(default)]
    pub status_filter: Option<JobStatus>,
}

/// Parameters for `metrics(scope, ...)` (spec.md §6.1 "Metrics snapshot").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsQuery {
    pub scope: Scope,
    #[serde(default)]
    pub period_seconds: Option<u64>,
    #[serde(default)]
    pub include_recent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Submit { user_id: UserId, backend_kind: BackendKind, input: serde_json::Value, priority: i32, timeout_ms: u64 },
    SubmitAsync { user_id: UserId, backend_kind: BackendKind, input: serde_json::Value, priority: i32, timeout_ms: u64 },
    Status { job_id: JobId, caller: UserId },
    Cancel { job_id: JobId, caller: UserId },
    List { user_id: UserId, query: ListQuery },

    WorkflowExecute { user_id: UserId, definition: WorkflowDefinition },
    WorkflowStatus { execution_id: String, caller: UserId },
    WorkflowCancel { execution_id: String, caller: UserId },
    WorkflowPause { execution_id: String, caller: UserId },
    WorkflowResume { execution_id: String, caller: UserId },

    SelfCritiqueExecute { user_id: UserId, config: SelfCritiqueConfig },
    DiscussionExecute { user_id: UserId, config: DiscussionConfig },

    Metrics { query: MetricsQuery },
    Health,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
