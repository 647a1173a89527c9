// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! In-process DSL agent backend (spec.md §4.3 "DSL backend").
//!
//! Unlike [`crate::CliBackend`] this never spawns a subprocess: source is
//! parsed, then a bounded evaluation loop renders an audio artifact while
//! reporting named stage progress.

use crate::{missing_field_error, AgentBackend, EventSink, ExecutionContext, Result};
use async_trait::async_trait;
use loom_core::{BackendEvent, BackendKind, BackendResult, OrchestrationError, ValidationReport};
use std::sync::Arc;
use std::time::Duration;

/// Parses DSL source into a [`ValidationReport`]. Concrete grammars are
/// pluggable; a registry wires in whichever one the deployment needs.
pub trait DslParser: Send + Sync {
    fn parse(&self, source: &str) -> ValidationReport;
}

const SAMPLE_RATE: u32 = 44_100;
const CHANNELS: u8 = 2;
const RENDER_TICKS: u32 = 10;

/// Validates then renders DSL source into a bounded-duration audio artifact.
pub struct DslBackend {
    parser: Arc<dyn DslParser>,
    default_duration_sec: u32,
    min_duration_sec: u32,
    max_duration_sec: u32,
}

impl DslBackend {
    pub fn new(
        parser: Arc<dyn DslParser>,
        default_duration_sec: u32,
        min_duration_sec: u32,
        max_duration_sec: u32,
    ) -> Self {
        Self { parser, default_duration_sec, min_duration_sec, max_duration_sec }
    }

    fn duration_sec(&self, input: &serde_json::Value) -> std::result::Result<u32, OrchestrationError> {
        let duration = input
            .get("durationSec")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(self.default_duration_sec);
        if duration < self.min_duration_sec || duration > self.max_duration_sec {
            return Err(OrchestrationError::ValidationFailed {
                reason: format!(
                    "durationSec must be within [{}, {}], got {}",
                    self.min_duration_sec, self.max_duration_sec, duration
                ),
            });
        }
        Ok(duration)
    }

    fn source(&self, input: &serde_json::Value) -> std::result::Result<String, OrchestrationError> {
        input
            .get("source")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| missing_field_error("source"))
    }
}

#[async_trait]
impl AgentBackend for DslBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dsl
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn validate(&self, input: &serde_json::Value) -> ValidationReport {
        let source = match self.source(input) {
            Ok(s) => s,
            Err(e) => {
                return ValidationReport::failed(vec![loom_core::Diagnostic::new(e.to_string())])
            }
        };
        if let Err(e) = self.duration_sec(input) {
            return ValidationReport::failed(vec![loom_core::Diagnostic::new(e.to_string())]);
        }
        self.parser.parse(&source)
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: serde_json::Value,
        sink: EventSink,
    ) -> Result<BackendResult> {
        let start = std::time::Instant::now();
        let source = self.source(&input)?;
        let duration_sec = self.duration_sec(&input)?;

        sink(BackendEvent::Start);
        sink(BackendEvent::Progress { percent: 0, stage: Some("validating".into()) });

        let report = self.parser.parse(&source);
        if !report.is_valid {
            let reason = report
                .errors
                .iter()
                .map(|d| d.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestrationError::ValidationFailed { reason });
        }

        for tick in 1..=RENDER_TICKS {
            if ctx.is_cancelled() {
                return Err(OrchestrationError::Cancelled);
            }
            if start.elapsed() >= ctx.timeout {
                return Err(OrchestrationError::Timeout);
            }
            let percent = ((tick * 100) / RENDER_TICKS) as u8;
            sink(BackendEvent::Progress { percent, stage: Some("rendering".into()) });
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                _ = ctx.cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            }
        }

        let sample_count = (duration_sec as usize) * SAMPLE_RATE as usize * CHANNELS as usize;
        let audio_data = vec![0u8; sample_count * 2]; // 16-bit PCM frames
        let file_size = audio_data.len();
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = BackendResult {
            exit_code: None,
            payload: serde_json::json!({
                "audioData": audio_data,
                "sampleRate": SAMPLE_RATE,
                "channels": CHANNELS,
                "format": "wav",
                "fileSize": file_size,
            }),
            duration_ms,
        };
        sink(BackendEvent::End(result.clone()));
        Ok(result)
    }
}

#[cfg(test)]
#[path = "dsl_tests.rs"]
mod tests;
