// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! loom-backend: the agent backend registry (C3).
//!
//! Every backend satisfies [`AgentBackend`]'s capability set. `loom-engine`
//! drives one through [`AgentBackend::execute`] and forwards the
//! [`BackendEvent`](loom_core::BackendEvent)s its sink receives onto the bus.

pub mod cli;
pub mod dsl;
pub mod post_processor;
pub mod registry;

pub use cli::{ApiFallbackClient, CliBackend, CliSpawnConfig};
pub use dsl::{DslBackend, DslParser};
pub use post_processor::{strip_code_fences, PostProcessor};
pub use registry::BackendRegistry;

use async_trait::async_trait;
use loom_core::{BackendEvent, BackendKind, JobId, OrchestrationError, ValidationReport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Carries per-execution cancellation and deadline (spec.md §4.3 "ctx").
#[derive(Clone)]
pub struct ExecutionContext {
    pub job_id: JobId,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(job_id: JobId, timeout: Duration) -> Self {
        Self { job_id, timeout, cancel: CancellationToken::new() }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Synchronous callback a backend reports ordered [`BackendEvent`]s through
/// (spec.md §4.3 "sink is a synchronous callback").
pub type EventSink = Arc<dyn Fn(BackendEvent) + Send + Sync>;

pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Uniform interface an agent backend exposes to the job manager.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn supports_streaming(&self) -> bool;

    /// Whether this backend can currently accept work (spec.md §6.1
    /// `health()`'s `backends: { cli, dsl, ...: available }`). In-process
    /// backends are always available; [`CliBackend`] overrides this to
    /// reflect whether its subprocess binary or API fallback is usable.
    fn is_available(&self) -> bool {
        true
    }

    async fn validate(&self, input: &serde_json::Value) -> ValidationReport;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: serde_json::Value,
        sink: EventSink,
    ) -> Result<loom_core::BackendResult>;
}

/// Maps a missing required input field onto the wire-stable validation error.
pub(crate) fn missing_field_error(field: &str) -> OrchestrationError {
    OrchestrationError::ValidationFailed { reason: format!("missing required field: {field}") }
}
