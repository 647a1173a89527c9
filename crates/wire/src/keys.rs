// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Persisted state key naming (spec.md §6.3 "Persisted state layout
//! (logical)"). Typed constructors so every write-through call site builds
//! the same key a reader would look up, rather than each crate formatting
//! its own ad hoc string.

use loom_core::{BackendKind, JobId, UserId};
use loom_metrics::Scope;

/// `job:<jobId>` (spec.md §6.3).
pub fn job_key(job_id: &JobId) -> String {
    format!("job:{job_id}")
}

/// `queue:<backendKind>` (spec.md §6.3).
pub fn queue_key(kind: BackendKind) -> String {
    format!("queue:{kind}")
}

/// `rate:<userId>:<bucket>` (spec.md §6.3).
pub fn rate_key(user_id: &UserId, bucket: &str) -> String {
    format!("rate:{user_id}:{bucket}")
}

/// `workflow:<executionId>` (spec.md §6.3). Takes the execution id's string
/// form directly since `loom-wire` does not depend on `loom-workflow`'s
/// `ExecutionId` type for this helper alone.
pub fn workflow_key(execution_id: &str) -> String {
    format!("workflow:{execution_id}")
}

/// `events:<jobId>` pub-sub channel (spec.md §6.3).
pub fn events_channel_key(job_id: &JobId) -> String {
    format!("events:{job_id}")
}

/// `metrics:<scope>:samples` (spec.md §6.3).
pub fn scope_samples_key(scope: Scope) -> String {
    format!("metrics:{scope}:samples")
}

/// `metrics:<scope>:counters` (spec.md §6.3).
pub fn scope_counters_key(scope: Scope) -> String {
    format!("metrics:{scope}:counters")
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
