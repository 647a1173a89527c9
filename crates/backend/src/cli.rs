// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! CLI-subprocess agent backend (spec.md §4.3 "CLI backend").

use crate::{missing_field_error, AgentBackend, EventSink, ExecutionContext, PostProcessor, Result};
use async_trait::async_trait;
use loom_core::{
    BackendEvent, BackendKind, BackendResult, Diagnostic, OrchestrationError, ValidationReport,
};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Fallback path for when the CLI binary is absent at startup (spec.md
/// §4.3 "the registry falls back to an SDK-style HTTP client").
#[async_trait]
pub trait ApiFallbackClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<String>;
}

/// Inputs the CLI backend reads off the opaque `input` payload (spec.md
/// §4.3 "Inputs: prompt, optional system prompt, model identifier, token
/// cap, working directory, CLI arguments, environment overlay").
#[derive(Debug, Clone)]
pub struct CliSpawnConfig {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub token_cap: Option<u32>,
    pub working_dir: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl CliSpawnConfig {
    fn from_input(input: &serde_json::Value) -> std::result::Result<Self, OrchestrationError> {
        let prompt = input
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field_error("prompt"))?
            .to_string();
        if prompt.trim().is_empty() {
            return Err(OrchestrationError::ValidationFailed {
                reason: "prompt must not be empty".into(),
            });
        }
        let system_prompt = input.get("systemPrompt").and_then(|v| v.as_str()).map(String::from);
        let model = input.get("model").and_then(|v| v.as_str()).map(String::from);
        let token_cap = input.get("tokenCap").and_then(|v| v.as_u64()).map(|v| v as u32);
        let working_dir = input.get("workingDir").and_then(|v| v.as_str()).map(PathBuf::from);
        let args = input
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let env = input
            .get("env")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { prompt, system_prompt, model, token_cap, working_dir, args, env })
    }
}

/// Spawns an external CLI process per job, or falls through to an API
/// client when the binary is unavailable.
pub struct CliBackend {
    binary: String,
    binary_available: bool,
    api_fallback: Option<std::sync::Arc<dyn ApiFallbackClient>>,
    grace: Duration,
    post_processor: Option<PostProcessor>,
}

impl CliBackend {
    /// Probes `binary --version` once at construction (spec.md §4.3 "If the
    /// CLI executable is absent at startup ...").
    pub fn new(
        binary: impl Into<String>,
        api_fallback: Option<std::sync::Arc<dyn ApiFallbackClient>>,
        grace: Duration,
    ) -> Self {
        let binary = binary.into();
        let binary_available = std::process::Command::new(&binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok();
        Self { binary, binary_available, api_fallback, grace, post_processor: None }
    }

    pub fn with_post_processor(mut self, post_processor: PostProcessor) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    async fn run_subprocess(
        &self,
        ctx: &ExecutionContext,
        config: CliSpawnConfig,
        sink: EventSink,
    ) -> Result<BackendResult> {
        let start = std::time::Instant::now();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &config.working_dir {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(system_prompt) = &config.system_prompt {
            cmd.env("LOOM_CLI_SYSTEM_PROMPT", system_prompt);
        }
        if let Some(model) = &config.model {
            cmd.env("LOOM_CLI_MODEL", model);
        }
        if let Some(cap) = config.token_cap {
            cmd.env("LOOM_CLI_TOKEN_CAP", cap.to_string());
        }
        cmd.env("LOOM_CLI_PROMPT", &config.prompt);

        let mut child = cmd.spawn().map_err(|e| {
            OrchestrationError::BackendUnavailable(format!("failed to spawn {}: {e}", self.binary))
        })?;
        let pid = child.id().map(|id| Pid::from_raw(id as i32));

        let stdout = child.stdout.take().ok_or_else(|| {
            OrchestrationError::Internal("child process missing piped stdout".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            OrchestrationError::Internal("child process missing piped stderr".into())
        })?;

        sink(BackendEvent::Start);

        let stdout_sink = sink.clone();
        let stdout_task = tokio::spawn(async move { collect_lines(stdout, BackendEvent::Stdout, stdout_sink).await });
        let stderr_sink = sink.clone();
        let stderr_task = tokio::spawn(async move { collect_lines(stderr, BackendEvent::Stderr, stderr_sink).await });

        let mut timed_out = false;
        let exit_status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| OrchestrationError::ExecutionFailed(e.to_string()))?
            }
            _ = ctx.cancel.cancelled() => {
                self.terminate(&mut child, pid).await?
            }
            _ = tokio::time::sleep(ctx.timeout) => {
                timed_out = true;
                self.terminate(&mut child, pid).await?
            }
        };

        let stdout_buf = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        if timed_out {
            return Err(OrchestrationError::Timeout);
        }
        if ctx.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        let stdout = if let Some(post) = &self.post_processor {
            post(stdout_buf)
        } else {
            stdout_buf
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = exit_status.code();
        match exit_code {
            Some(0) => {}
            Some(code) => {
                return Err(OrchestrationError::ExecutionFailed(format!(
                    "process exited with {code}: {stderr_buf}"
                )));
            }
            // `ExitStatus::code()` is `None` only when the process was
            // terminated by a signal; the cancel/timeout paths above already
            // returned before reaching here, so this is always an
            // unexpected crash (e.g. a segfault).
            None => {
                return Err(OrchestrationError::Crash(format!(
                    "process terminated by signal: {stderr_buf}"
                )));
            }
        }
        let result = BackendResult {
            exit_code,
            payload: serde_json::json!({ "stdout": stdout, "stderr": stderr_buf }),
            duration_ms,
        };
        sink(BackendEvent::End(result.clone()));
        Ok(result)
    }

    /// Graceful `SIGTERM` then `SIGKILL` after the configured grace period
    /// (spec.md §4.3 "Signal policy").
    async fn terminate(
        &self,
        child: &mut tokio::process::Child,
        pid: Option<Pid>,
    ) -> Result<std::process::ExitStatus> {
        if let Some(pid) = pid {
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => Ok(status),
            _ => {
                if let Some(pid) = pid {
                    let _ = signal::kill(pid, Signal::SIGKILL);
                }
                child
                    .wait()
                    .await
                    .map_err(|e| OrchestrationError::ExecutionFailed(e.to_string()))
            }
        }
    }

    async fn run_api_fallback(
        &self,
        config: CliSpawnConfig,
        sink: EventSink,
    ) -> Result<BackendResult> {
        let start = std::time::Instant::now();
        let client = self
            .api_fallback
            .as_ref()
            .ok_or_else(|| OrchestrationError::BackendUnavailable(self.binary.clone()))?;
        sink(BackendEvent::Start);
        let output = client
            .complete(&config.prompt, config.system_prompt.as_deref(), config.model.as_deref())
            .await?;
        let output =
            if let Some(post) = &self.post_processor { post(output) } else { output };
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = BackendResult {
            exit_code: Some(0),
            payload: serde_json::json!({ "stdout": output, "stderr": "" }),
            duration_ms,
        };
        sink(BackendEvent::End(result.clone()));
        Ok(result)
    }
}

/// Forward each line of `reader` to `sink` via `event_ctor`, accumulating
/// the full text for the final captured buffer.
async fn collect_lines<R, F>(reader: R, event_ctor: F, sink: EventSink) -> String
where
    R: tokio::io::AsyncRead + Unpin,
    F: Fn(String) -> BackendEvent,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        sink(event_ctor(line.clone()));
        collected.push(line);
    }
    collected.join("\n")
}

#[async_trait]
impl AgentBackend for CliBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cli
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.binary_available || self.api_fallback.is_some()
    }

    async fn validate(&self, input: &serde_json::Value) -> ValidationReport {
        if !self.binary_available && self.api_fallback.is_none() {
            return ValidationReport::failed(vec![Diagnostic::new(
                "neither the cli binary nor an api fallback client is available",
            )]);
        }
        match CliSpawnConfig::from_input(input) {
            Ok(_) => ValidationReport::ok(),
            Err(e) => ValidationReport::failed(vec![Diagnostic::new(e.to_string())]),
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: serde_json::Value,
        sink: EventSink,
    ) -> Result<BackendResult> {
        let config = CliSpawnConfig::from_input(&input)?;
        if self.binary_available {
            self.run_subprocess(ctx, config, sink).await
        } else {
            self.run_api_fallback(config, sink).await
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
