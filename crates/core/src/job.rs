// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Job identifier and state machine (spec.md §3 "Job").

use crate::clock::Clock;
use crate::error::ErrorKind;
use crate::user::UserId;
use serde::{Deserialize, Serialize};
use std::time::Instant;

crate::define_id! {
    /// Unique identifier for a job instance.
    ///
    /// Caller-prefixed and stable for the lifetime of the job, including
    /// across queueing, running, and terminal states.
    #[derive(Default)]
    pub struct JobId("job-");
}

/// Which agent backend drives a job (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Cli,
    Dsl,
    Custom,
}

crate::simple_display! {
    BackendKind {
        Cli => "cli",
        Dsl => "dsl",
        Custom => "custom",
    }
}

/// Job status machine (spec.md §3 Status machine).
///
/// `Pending -> Queued -> Running -> (Completed | Failed | Timeout |
/// Cancelled)`. For the DSL backend, `Validating` and `Rendering` refine
/// `Running`. Terminal variants are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Validating,
    Rendering,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Queued => "queued",
        Running => "running",
        Validating => "validating",
        Rendering => "rendering",
        Completed => "completed",
        Failed => "failed",
        Timeout => "timeout",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    /// Terminal states are absorbing: `completed | failed | timeout | cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// True for the two DSL-only refinements of `running`.
    pub fn is_running_refinement(&self) -> bool {
        matches!(self, Self::Validating | Self::Rendering)
    }
}

/// Captured stdout/stderr with a head-truncating cap (spec.md §4.4 "Buffer caps").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputBuffer {
    data: String,
    cap_bytes: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(cap_bytes: usize) -> Self {
        Self { data: String::new(), cap_bytes, truncated: false }
    }

    /// Append a chunk, truncating from the head on overflow.
    pub fn push(&mut self, chunk: &str) {
        self.data.push_str(chunk);
        if self.data.len() > self.cap_bytes {
            let excess = self.data.len() - self.cap_bytes;
            // Find a char boundary at or after `excess` so we never split a
            // multi-byte UTF-8 sequence.
            let mut cut = excess;
            while cut < self.data.len() && !self.data.is_char_boundary(cut) {
                cut += 1;
            }
            self.data.drain(..cut);
            self.truncated = true;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Configuration used to create a new [`Job`].
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub id: JobId,
    pub user_id: UserId,
    pub backend_kind: BackendKind,
    pub input: serde_json::Value,
    pub priority: i32,
    pub timeout_ms: u64,
    pub buffer_cap_bytes: usize,
}

impl JobConfig {
    pub fn builder(user_id: UserId, backend_kind: BackendKind) -> JobConfigBuilder {
        JobConfigBuilder {
            id: JobId::new(),
            user_id,
            backend_kind,
            input: serde_json::Value::Null,
            priority: 0,
            timeout_ms: 300_000,
            buffer_cap_bytes: 8 * 1024 * 1024,
        }
    }
}

pub struct JobConfigBuilder {
    id: JobId,
    user_id: UserId,
    backend_kind: BackendKind,
    input: serde_json::Value,
    priority: i32,
    timeout_ms: u64,
    buffer_cap_bytes: usize,
}

impl JobConfigBuilder {
    crate::setters! {
        set {
            input: serde_json::Value,
            priority: i32,
            timeout_ms: u64,
            buffer_cap_bytes: usize,
        }
    }

    pub fn build(self) -> JobConfig {
        JobConfig {
            id: self.id,
            user_id: self.user_id,
            backend_kind: self.backend_kind,
            input: self.input,
            priority: self.priority,
            timeout_ms: self.timeout_ms,
            buffer_cap_bytes: self.buffer_cap_bytes,
        }
    }
}

/// A single unit of work on one agent backend (spec.md §3 "Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub backend_kind: BackendKind,
    pub input: serde_json::Value,
    pub priority: i32,
    pub timeout_ms: u64,
    #[serde(default)]
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub status: JobStatus,
    /// Monotonic non-decreasing, 0-100.
    pub progress: u8,
    pub queue_position: Option<usize>,
    pub retry_count: u32,
    pub exit_code: Option<i32>,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
    pub result_payload: Option<serde_json::Value>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    #[serde(skip, default = "Instant::now")]
    pub created_at: Instant,
}

impl Job {
    pub fn new(config: JobConfig, clock: &impl Clock) -> Self {
        Self {
            id: config.id,
            user_id: config.user_id,
            backend_kind: config.backend_kind,
            input: config.input,
            priority: config.priority,
            timeout_ms: config.timeout_ms,
            created_at_ms: clock.epoch_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            status: JobStatus::Pending,
            progress: 0,
            queue_position: None,
            retry_count: 0,
            exit_code: None,
            stdout: OutputBuffer::new(config.buffer_cap_bytes),
            stderr: OutputBuffer::new(config.buffer_cap_bytes),
            result_payload: None,
            error_kind: None,
            error_message: None,
            created_at: clock.now(),
        }
    }

    /// Set progress, enforcing the monotonic non-decreasing invariant
    /// (spec.md §3, §8 "sequence of progress values ... non-decreasing").
    pub fn set_progress(&mut self, value: u8) {
        if value > self.progress {
            self.progress = value.min(100);
        }
    }

    pub fn mark_terminal(
        &mut self,
        status: JobStatus,
        error_kind: Option<ErrorKind>,
        error_message: Option<String>,
        epoch_ms: u64,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error_kind = error_kind;
        self.error_message = error_message;
        self.completed_at_ms = Some(epoch_ms);
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
        }
        set {
            id: JobId = JobId::new(),
            user_id: UserId = UserId::new(),
            backend_kind: BackendKind = BackendKind::Cli,
            input: serde_json::Value = serde_json::Value::Null,
            priority: i32 = 0,
            timeout_ms: u64 = 300_000,
            created_at_ms: u64 = 0,
            started_at_ms: Option<u64> = None,
            completed_at_ms: Option<u64> = None,
            status: JobStatus = JobStatus::Pending,
            progress: u8 = 0,
            queue_position: Option<usize> = None,
            retry_count: u32 = 0,
            exit_code: Option<i32> = None,
            stdout: OutputBuffer = OutputBuffer::new(8 * 1024 * 1024),
            stderr: OutputBuffer = OutputBuffer::new(8 * 1024 * 1024),
            result_payload: Option<serde_json::Value> = None,
            error_kind: Option<ErrorKind> = None,
            error_message: Option<String> = None,
        }
        computed {
            created_at: Instant = Instant::now(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
