// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use super::*;
use loom_core::JobId;
use std::time::Duration;

fn ctx(timeout: Duration) -> ExecutionContext {
    ExecutionContext::new(JobId::new(), timeout)
}

#[tokio::test]
async fn validate_rejects_missing_prompt() {
    let backend = CliBackend::new("sh", None, Duration::from_secs(1));
    let report = backend.validate(&serde_json::json!({})).await;
    assert!(!report.is_valid);
}

#[tokio::test]
async fn validate_rejects_when_no_path_is_available() {
    let backend = CliBackend::new("loom-definitely-not-a-real-binary", None, Duration::from_secs(1));
    let report = backend.validate(&serde_json::json!({"prompt": "hi"})).await;
    assert!(!report.is_valid, "neither cli nor api fallback is available");
}

#[tokio::test]
async fn is_available_reflects_binary_presence() {
    let backend = CliBackend::new("sh", None, Duration::from_secs(1));
    assert!(backend.is_available());
    let missing = CliBackend::new("loom-definitely-not-a-real-binary", None, Duration::from_secs(1));
    assert!(!missing.is_available());
}

#[tokio::test]
async fn execute_captures_stdout_from_the_spawned_process() {
    let backend = CliBackend::new("sh", None, Duration::from_secs(5));
    let input = serde_json::json!({
        "prompt": "hello-world",
        "args": ["-c", "printf %s \"$LOOM_CLI_PROMPT\""],
    });
    let events = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let sink: EventSink = std::sync::Arc::new(move |e| events_clone.lock().push(e));
    let result = backend.execute(&ctx(Duration::from_secs(5)), input, sink).await.unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.payload["stdout"], "hello-world");
    assert!(events.lock().iter().any(|e| matches!(e, BackendEvent::Start)));
}

#[tokio::test]
async fn execute_fails_on_nonzero_exit() {
    let backend = CliBackend::new("sh", None, Duration::from_secs(5));
    let input = serde_json::json!({"prompt": "x", "args": ["-c", "exit 3"]});
    let sink: EventSink = std::sync::Arc::new(|_| {});
    let err = backend.execute(&ctx(Duration::from_secs(5)), input, sink).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::ExecutionFailed(_)));
}

#[tokio::test]
async fn execute_reports_crash_on_signal_death() {
    let backend = CliBackend::new("sh", None, Duration::from_secs(5));
    let input = serde_json::json!({"prompt": "x", "args": ["-c", "kill -SEGV $$"]});
    let sink: EventSink = std::sync::Arc::new(|_| {});
    let err = backend.execute(&ctx(Duration::from_secs(5)), input, sink).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Crash(_)));
    assert_eq!(err.kind(), loom_core::ErrorKind::Crash);
}

#[tokio::test]
async fn execute_times_out_and_kills_the_process() {
    let backend = CliBackend::new("sh", None, Duration::from_millis(50));
    let input = serde_json::json!({"prompt": "x", "args": ["-c", "sleep 5"]});
    let sink: EventSink = std::sync::Arc::new(|_| {});
    let err = backend
        .execute(&ctx(Duration::from_millis(50)), input, sink)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Timeout));
}

#[tokio::test]
async fn execute_honors_cooperative_cancellation() {
    let backend = CliBackend::new("sh", None, Duration::from_secs(30));
    let input = serde_json::json!({"prompt": "x", "args": ["-c", "sleep 5"]});
    let sink: EventSink = std::sync::Arc::new(|_| {});
    let context = ctx(Duration::from_secs(30));
    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let err = backend.execute(&context, input, sink).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Cancelled));
}
