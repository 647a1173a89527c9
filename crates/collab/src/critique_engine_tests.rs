use super::*;
use crate::critique::QualityCriterion;
use crate::invocation::AgentInvocation;
use async_trait::async_trait;
use loom_backend::{AgentBackend, BackendRegistry, ExecutionContext};
use loom_core::{BackendEvent, BackendResult, SystemClock, ValidationReport};
use loom_engine::Scheduler;
use loom_store::MemoryStore;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Always succeeds, echoing a fixed draft as its output.
struct TaskBackend {
    gate: Arc<Notify>,
}

#[async_trait]
impl AgentBackend for TaskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cli
    }
    fn supports_streaming(&self) -> bool {
        false
    }
    async fn validate(&self, _input: &serde_json::Value) -> ValidationReport {
        ValidationReport::ok()
    }
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: serde_json::Value,
        sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        sink(BackendEvent::Start);
        if input.get("gate").and_then(serde_json::Value::as_bool) == Some(true) {
            tokio::select! {
                _ = self.gate.notified() => {}
                _ = ctx.cancel.cancelled() => return Err(loom_core::OrchestrationError::Cancelled),
            }
        }
        Ok(BackendResult { exit_code: Some(0), payload: json!({"text": "draft"}), duration_ms: 1 })
    }
}

/// Hands out the next score from a fixed list on each call (spec.md §8
/// scenario 6's critic scores `[0.5, 0.7, 0.85]`).
struct CriticBackend {
    scores: Vec<f64>,
    next: AtomicUsize,
}

#[async_trait]
impl AgentBackend for CriticBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dsl
    }
    fn supports_streaming(&self) -> bool {
        false
    }
    async fn validate(&self, _input: &serde_json::Value) -> ValidationReport {
        ValidationReport::ok()
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _input: serde_json::Value,
        sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        sink(BackendEvent::Start);
        let idx = self.next.fetch_add(1, Ordering::SeqCst).min(self.scores.len() - 1);
        let score = self.scores[idx];
        let payload = json!({"criteriaScores": {"quality": score}, "feedback": format!("score {score}")});
        Ok(BackendResult { exit_code: Some(0), payload, duration_ms: 1 })
    }
}

fn criteria() -> Vec<QualityCriterion> {
    vec![QualityCriterion { name: "quality".to_string(), weight: 1.0 }]
}

fn new_engine(gate: Arc<Notify>, scores: Vec<f64>) -> Arc<CritiqueEngine<SystemClock>> {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(TaskBackend { gate }));
    registry.register(Arc::new(CriticBackend { scores, next: AtomicUsize::new(0) }));
    let job_manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );
    CritiqueEngine::new(job_manager, Arc::new(EventBus::new(64)), Arc::new(MemoryStore::new()), SystemClock)
}

fn config(scores_len: usize, threshold: f64, stop_on_threshold: bool, gate: bool) -> SelfCritiqueConfig {
    SelfCritiqueConfig {
        task: AgentInvocation { backend_kind: BackendKind::Cli, input: json!({"gate": gate}) },
        critic: Some(AgentInvocation { backend_kind: BackendKind::Dsl, input: json!({}) }),
        max_iterations: scores_len as u32 + 2,
        quality_criteria: criteria(),
        quality_threshold: threshold,
        stop_on_quality_threshold: stop_on_threshold,
    }
}

async fn wait_until_terminal(engine: &CritiqueEngine<SystemClock>, id: &CritiqueId) -> SelfCritiqueExecution {
    for _ in 0..400 {
        if let Some(exec) = engine.get_state(id) {
            if exec.status.is_terminal() {
                return exec;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("self-critique run {id} never reached a terminal state");
}

#[tokio::test]
async fn converges_once_the_quality_threshold_is_met() {
    let engine = new_engine(Arc::new(Notify::new()), vec![0.5, 0.7, 0.85]);
    let id = engine.start(UserId::new(), config(3, 0.8, true, false)).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, CritiqueStatus::Completed);
    assert!(exec.converged);
    assert_eq!(exec.iterations.len(), 3);
    assert_eq!(exec.final_score, Some(0.85));
}

#[tokio::test]
async fn runs_to_max_iterations_when_the_threshold_is_never_met() {
    let engine = new_engine(Arc::new(Notify::new()), vec![0.1, 0.2, 0.3]);
    let mut cfg = config(3, 0.8, true, false);
    cfg.max_iterations = 3;
    let id = engine.start(UserId::new(), cfg).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, CritiqueStatus::Completed);
    assert!(!exec.converged);
    assert_eq!(exec.iterations.len(), 3);
    assert_eq!(exec.final_score, Some(0.3));
}

#[tokio::test]
async fn a_task_invocation_failure_marks_the_run_failed() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(CriticBackend { scores: vec![0.9], next: AtomicUsize::new(0) }));
    // No Cli backend registered, so the task invocation fails immediately.
    let job_manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );
    let engine = CritiqueEngine::new(job_manager, Arc::new(EventBus::new(64)), Arc::new(MemoryStore::new()), SystemClock);

    let id = engine.start(UserId::new(), config(1, 0.8, true, false)).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, CritiqueStatus::Failed);
    assert!(exec.iterations.is_empty());
}

#[tokio::test]
async fn cancelling_mid_iteration_settles_cancelled() {
    let gate = Arc::new(Notify::new());
    let engine = new_engine(Arc::clone(&gate), vec![0.9]);
    let id = engine.start(UserId::new(), config(1, 0.8, true, true)).await.expect("start should succeed");
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.cancel(&id);
    let exec = wait_until_terminal(&engine, &id).await;
    assert_eq!(exec.status, CritiqueStatus::Cancelled);
}
