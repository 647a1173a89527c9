use super::*;
use async_trait::async_trait;
use loom_backend::AgentBackend;
use loom_core::{BackendEvent, BackendResult, Diagnostic, ErrorKind, SystemClock, UserId, ValidationReport};
use loom_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct ImmediateBackend {
    kind: BackendKind,
}

#[async_trait]
impl AgentBackend for ImmediateBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn validate(&self, _input: &serde_json::Value) -> ValidationReport {
        ValidationReport::ok()
    }

    async fn execute(
        &self,
        _ctx: &loom_backend::ExecutionContext,
        _input: serde_json::Value,
        sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        sink(BackendEvent::Start);
        sink(BackendEvent::Stdout("hello".into()));
        Ok(BackendResult { exit_code: Some(0), payload: serde_json::json!({}), duration_ms: 1 })
    }
}

struct RejectingBackend;

#[async_trait]
impl AgentBackend for RejectingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dsl
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn validate(&self, _input: &serde_json::Value) -> ValidationReport {
        ValidationReport::failed(vec![Diagnostic::new("always invalid")])
    }

    async fn execute(
        &self,
        _ctx: &loom_backend::ExecutionContext,
        _input: serde_json::Value,
        _sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        unreachable!("validate always fails, execute should never run")
    }
}

/// Blocks inside `execute` until released, so tests can control exactly
/// when a running job frees its scheduler slot.
struct GatedBackend {
    gate: Arc<Notify>,
}

#[async_trait]
impl AgentBackend for GatedBackend {
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
        _ctx: &loom_backend::ExecutionContext,
        _input: serde_json::Value,
        _sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        self.gate.notified().await;
        Ok(BackendResult { exit_code: Some(0), payload: serde_json::json!({}), duration_ms: 1 })
    }
}

/// Emits a `validating` progress stage, waits to be released, then emits a
/// `rendering` stage before completing.
struct StagedDslBackend {
    gate: Arc<Notify>,
}

#[async_trait]
impl AgentBackend for StagedDslBackend {
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
        _ctx: &loom_backend::ExecutionContext,
        _input: serde_json::Value,
        sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        sink(BackendEvent::Progress { percent: 10, stage: Some("validating".into()) });
        self.gate.notified().await;
        sink(BackendEvent::Progress { percent: 90, stage: Some("rendering".into()) });
        Ok(BackendResult { exit_code: Some(0), payload: serde_json::json!({}), duration_ms: 1 })
    }
}

fn submit_request(kind: BackendKind) -> SubmitRequest {
    SubmitRequest {
        user_id: UserId::new(),
        backend_kind: kind,
        input: serde_json::json!({}),
        priority: 0,
        timeout_ms: 60_000,
        buffer_cap_bytes: 1024,
    }
}

async fn wait_until_terminal<C: loom_core::Clock>(manager: &JobManager<C>, job_id: &loom_core::JobId) -> loom_core::Job {
    for _ in 0..200 {
        if let Some(job) = manager.get_state(job_id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn submit_runs_and_completes_a_job() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(ImmediateBackend { kind: BackendKind::Cli }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let job_id = manager.submit(submit_request(BackendKind::Cli)).await.expect("submit should succeed");
    let job = wait_until_terminal(&manager, &job_id).await;
    assert_eq!(job.status, loom_core::JobStatus::Completed);
    assert_eq!(job.stdout.as_str(), "hello\n");
}

#[tokio::test]
async fn submit_rejects_invalid_input_without_admitting_a_job() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(RejectingBackend));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let err = manager.submit(submit_request(BackendKind::Dsl)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn submit_rejects_a_backend_kind_with_no_registered_backend() {
    let manager = JobManager::new(
        Arc::new(BackendRegistry::new()),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let err = manager.submit(submit_request(BackendKind::Cli)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
}

#[tokio::test]
async fn a_job_beyond_capacity_is_queued_then_starts_once_the_slot_frees() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(GatedBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(1, 1)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let first = manager.submit(submit_request(BackendKind::Cli)).await.expect("first submit");
    // Give the spawned task a chance to reach the gate before the second
    // submission so the scheduler genuinely sees the slot as occupied.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = manager.submit(submit_request(BackendKind::Cli)).await.expect("second submit");
    let queued = manager.get_state(&second).expect("second job exists");
    assert_eq!(queued.status, loom_core::JobStatus::Queued);
    assert_eq!(queued.queue_position, Some(1));

    gate.notify_one();
    let first_job = wait_until_terminal(&manager, &first).await;
    assert_eq!(first_job.status, loom_core::JobStatus::Completed);

    gate.notify_one();
    let second_job = wait_until_terminal(&manager, &second).await;
    assert_eq!(second_job.status, loom_core::JobStatus::Completed);
}

#[tokio::test]
async fn cancelling_a_queued_job_marks_it_cancelled_immediately() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(GatedBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(1, 1)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let _running = manager.submit(submit_request(BackendKind::Cli)).await.expect("first submit");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let queued = manager.submit(submit_request(BackendKind::Cli)).await.expect("second submit");

    manager.cancel(&queued).expect("cancel should find the queued job");
    let job = manager.get_state(&queued).expect("job exists");
    assert_eq!(job.status, loom_core::JobStatus::Cancelled);
    assert_eq!(job.error_kind, Some(ErrorKind::Cancelled));

    gate.notify_one();
}

#[tokio::test]
async fn shutdown_cancels_every_still_queued_job() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(GatedBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(1, 1)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let _running = manager.submit(submit_request(BackendKind::Cli)).await.expect("first submit");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let queued = manager.submit(submit_request(BackendKind::Cli)).await.expect("second submit");

    manager.shutdown();
    let job = manager.get_state(&queued).expect("job exists");
    assert_eq!(job.status, loom_core::JobStatus::Cancelled);

    gate.notify_one();
}

#[tokio::test]
async fn subscribers_see_a_terminal_event_for_a_completed_job() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(ImmediateBackend { kind: BackendKind::Cli }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let job_id = manager.submit(submit_request(BackendKind::Cli)).await.expect("submit should succeed");
    let mut sub = manager.subscribe(&job_id);
    wait_until_terminal(&manager, &job_id).await;

    let mut saw_terminal = false;
    while let Ok(seq_event) = sub.receiver.try_recv() {
        if seq_event.event.is_terminal() {
            saw_terminal = true;
        }
    }
    assert!(saw_terminal, "expected a terminal event on the job's topic");
}

#[tokio::test]
async fn a_late_subscriber_receives_a_snapshot_of_current_progress() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(GatedBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let job_id = manager.submit(submit_request(BackendKind::Cli)).await.expect("submit should succeed");
    // Give the job a moment to actually start before a subscriber joins late.
    tokio::time::sleep(Duration::from_millis(5)).await;

    let sub = manager.subscribe(&job_id);
    let snapshot = sub.snapshot.expect("a running job must replay a snapshot to a late subscriber");
    match snapshot.event {
        loom_core::Event::JobSnapshot { job_id: snapshot_job_id, .. } => assert_eq!(snapshot_job_id, job_id),
        other => panic!("expected a job:snapshot event, got {other:?}"),
    }

    gate.notify_one();
    wait_until_terminal(&manager, &job_id).await;
}

#[tokio::test]
async fn submit_beyond_queue_capacity_is_rejected_with_queue_full() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(GatedBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::with_queue_limits(1, 1, 1, 1)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let _running = manager.submit(submit_request(BackendKind::Cli)).await.expect("first submit");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _queued = manager.submit(submit_request(BackendKind::Cli)).await.expect("second submit fits the queue");
    let err = manager
        .submit(submit_request(BackendKind::Cli))
        .await
        .expect_err("third submit should overflow the queue");
    assert_eq!(err.kind(), ErrorKind::QueueFull);

    gate.notify_one();
    gate.notify_one();
}

#[tokio::test]
async fn heartbeat_updates_queue_position_when_it_changes() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(GatedBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(1, 1)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let running = manager.submit(submit_request(BackendKind::Cli)).await.expect("first submit");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let low = manager.submit(submit_request(BackendKind::Cli)).await.expect("second submit");
    let mut high_req = submit_request(BackendKind::Cli);
    high_req.priority = 10;
    let high = manager.submit(high_req).await.expect("third submit");

    // `low`'s stored position is stale: it was computed when `low` was the
    // only waiter, before `high` jumped the queue ahead of it.
    assert_eq!(manager.get_state(&low).unwrap().queue_position, Some(1));
    manager.heartbeat_queue_positions();
    assert_eq!(manager.get_state(&high).unwrap().queue_position, Some(1));
    assert_eq!(manager.get_state(&low).unwrap().queue_position, Some(2));

    gate.notify_one();
    wait_until_terminal(&manager, &running).await;
    gate.notify_one();
    gate.notify_one();
}

#[tokio::test]
async fn dsl_progress_stage_refines_the_job_status() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(StagedDslBackend { gate: Arc::clone(&gate) }));
    let manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );

    let job_id = manager.submit(submit_request(BackendKind::Dsl)).await.expect("submit should succeed");

    let mut saw_validating = false;
    for _ in 0..200 {
        if let Some(job) = manager.get_state(&job_id) {
            if job.status == loom_core::JobStatus::Validating {
                saw_validating = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(saw_validating, "expected the dsl backend's validating stage to be reflected in job status");

    gate.notify_one();

    let mut saw_rendering = false;
    for _ in 0..200 {
        if let Some(job) = manager.get_state(&job_id) {
            if job.status == loom_core::JobStatus::Rendering {
                saw_rendering = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(saw_rendering, "expected the dsl backend's rendering stage to be reflected in job status");

    let job = wait_until_terminal(&manager, &job_id).await;
    assert_eq!(job.status, loom_core::JobStatus::Completed);
}
