use super::*;
use crate::invocation::AgentInvocation;
use async_trait::async_trait;
use loom_backend::{AgentBackend, BackendRegistry, ExecutionContext};
use loom_core::{BackendEvent, BackendResult, SystemClock, ValidationReport};
use loom_engine::Scheduler;
use loom_store::MemoryStore;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Notify;

/// Returns a fixed `(content, agreementScore)` pair regardless of input.
struct ParticipantBackend {
    content: &'static str,
    agreement_score: f64,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl AgentBackend for ParticipantBackend {
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
        _input: serde_json::Value,
        sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        sink(BackendEvent::Start);
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = ctx.cancel.cancelled() => return Err(loom_core::OrchestrationError::Cancelled),
            }
        }
        let payload = json!({"content": self.content, "agreementScore": self.agreement_score});
        Ok(BackendResult { exit_code: Some(0), payload, duration_ms: 1 })
    }
}

/// Dispatches each call to the next backend in a fixed, per-participant-role
/// list, keyed by the `role` field of the invocation input. Used when a
/// round needs distinct participants to answer distinctly, since they all
/// share `BackendKind::Cli` in the registry.
struct RoleRoutedBackend {
    by_role: HashMap<String, (&'static str, f64)>,
}

#[async_trait]
impl AgentBackend for RoleRoutedBackend {
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
        _ctx: &ExecutionContext,
        input: serde_json::Value,
        sink: loom_backend::EventSink,
    ) -> loom_backend::Result<BackendResult> {
        sink(BackendEvent::Start);
        let role = input.get("role").and_then(|v| v.as_str()).unwrap_or_default();
        let (content, score) = self.by_role.get(role).copied().unwrap_or(("", 0.0));
        let payload = json!({"content": content, "agreementScore": score});
        Ok(BackendResult { exit_code: Some(0), payload, duration_ms: 1 })
    }
}

/// Returns a facilitator-authored synthesis and consensus score.
struct FacilitatorBackend {
    synthesis: &'static str,
    consensus_score: f64,
}

#[async_trait]
impl AgentBackend for FacilitatorBackend {
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
        let payload = json!({"synthesis": self.synthesis, "consensusScore": self.consensus_score});
        Ok(BackendResult { exit_code: Some(0), payload, duration_ms: 1 })
    }
}

fn participant(id: &str, weight: f64) -> Participant {
    Participant {
        id: id.to_string(),
        agent: AgentInvocation { backend_kind: BackendKind::Cli, input: json!({"role": id}) },
        role: id.to_string(),
        weight,
        perspective: None,
    }
}

fn new_engine(registry: BackendRegistry) -> Arc<DiscussionEngine<SystemClock>> {
    let job_manager = JobManager::new(
        Arc::new(registry),
        Arc::new(Scheduler::new(4, 4)),
        Arc::new(EventBus::new(64)),
        Arc::new(MemoryStore::new()),
        SystemClock,
        86_400,
    );
    DiscussionEngine::new(job_manager, Arc::new(EventBus::new(64)), Arc::new(MemoryStore::new()), SystemClock)
}

async fn wait_until_terminal(engine: &DiscussionEngine<SystemClock>, id: &DiscussionId) -> DiscussionExecution {
    for _ in 0..400 {
        if let Some(exec) = engine.get_state(id) {
            if exec.status.is_terminal() {
                return exec;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("discussion run {id} never reached a terminal state");
}

#[tokio::test]
async fn weighted_consensus_converges_on_the_first_round_that_clears_the_threshold() {
    // spec.md §8 scenario 7: weights [2, 1], agreements [0.9, 0.3],
    // threshold 0.7 => (2*0.9 + 1*0.3) / 3 = 0.7.
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(RoleRoutedBackend {
        by_role: HashMap::from([("a".to_string(), ("yes", 0.9)), ("b".to_string(), ("meh", 0.3))]),
    }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 2.0), participant("b", 1.0)],
        max_rounds: 3,
        consensus_strategy: ConsensusStrategy::Weighted,
        convergence_threshold: 0.7,
        facilitator: None,
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, DiscussionStatus::Completed);
    assert!(exec.converged);
    assert_eq!(exec.rounds.len(), 1);
    assert!((exec.rounds[0].consensus_score - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn unanimous_consensus_is_the_minimum_agreement_score() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(RoleRoutedBackend {
        by_role: HashMap::from([("a".to_string(), ("yes", 0.9)), ("b".to_string(), ("no", 0.4))]),
    }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 1.0), participant("b", 1.0)],
        max_rounds: 1,
        consensus_strategy: ConsensusStrategy::Unanimous,
        convergence_threshold: 0.5,
        facilitator: None,
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, DiscussionStatus::Completed);
    assert!(!exec.converged);
    assert!((exec.rounds[0].consensus_score - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn majority_consensus_is_the_fraction_at_or_above_half_agreement() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(RoleRoutedBackend {
        by_role: HashMap::from([
            ("a".to_string(), ("yes", 0.9)),
            ("b".to_string(), ("yes", 0.6)),
            ("c".to_string(), ("no", 0.2)),
        ]),
    }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 1.0), participant("b", 1.0), participant("c", 1.0)],
        max_rounds: 1,
        consensus_strategy: ConsensusStrategy::Majority,
        convergence_threshold: 0.5,
        facilitator: None,
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert!((exec.rounds[0].consensus_score - (2.0 / 3.0)).abs() < 1e-9);
    assert!(exec.converged);
}

#[tokio::test]
async fn facilitator_strategy_uses_the_facilitators_own_synthesis_and_score() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(ParticipantBackend { content: "a says yes", agreement_score: 0.8, gate: None }));
    registry.register(Arc::new(FacilitatorBackend { synthesis: "we agree to ship", consensus_score: 0.95 }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 1.0), participant("b", 1.0)],
        max_rounds: 1,
        consensus_strategy: ConsensusStrategy::Facilitator,
        convergence_threshold: 0.5,
        facilitator: Some(AgentInvocation { backend_kind: BackendKind::Dsl, input: json!({}) }),
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, DiscussionStatus::Completed);
    assert!(exec.converged);
    assert_eq!(exec.final_consensus.as_deref(), Some("we agree to ship"));
    assert!((exec.rounds[0].consensus_score - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn contributions_are_emitted_in_participant_declaration_order() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(RoleRoutedBackend {
        by_role: HashMap::from([
            ("a".to_string(), ("from a", 0.2)),
            ("b".to_string(), ("from b", 0.2)),
            ("c".to_string(), ("from c", 0.2)),
        ]),
    }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 1.0), participant("b", 1.0), participant("c", 1.0)],
        max_rounds: 1,
        consensus_strategy: ConsensusStrategy::Majority,
        convergence_threshold: 0.9,
        facilitator: None,
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    let ids: Vec<&str> = exec.rounds[0].contributions.iter().map(|c| c.participant_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn runs_to_max_rounds_when_convergence_is_never_reached() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(RoleRoutedBackend {
        by_role: HashMap::from([("a".to_string(), ("no", 0.1)), ("b".to_string(), ("no", 0.1))]),
    }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 1.0), participant("b", 1.0)],
        max_rounds: 2,
        consensus_strategy: ConsensusStrategy::Unanimous,
        convergence_threshold: 0.9,
        facilitator: None,
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    let exec = wait_until_terminal(&engine, &id).await;

    assert_eq!(exec.status, DiscussionStatus::Completed);
    assert!(!exec.converged);
    assert_eq!(exec.rounds.len(), 2);
}

#[tokio::test]
async fn cancelling_mid_round_settles_cancelled() {
    let gate = Arc::new(Notify::new());
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(ParticipantBackend { content: "slow", agreement_score: 0.9, gate: Some(gate) }));
    let engine = new_engine(registry);

    let config = DiscussionConfig {
        topic: "ship it?".to_string(),
        participants: vec![participant("a", 1.0), participant("b", 1.0)],
        max_rounds: 1,
        consensus_strategy: ConsensusStrategy::Unanimous,
        convergence_threshold: 0.5,
        facilitator: None,
    };

    let id = engine.start(UserId::new(), config).await.expect("start should succeed");
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.cancel(&id);
    let exec = wait_until_terminal(&engine, &id).await;
    assert_eq!(exec.status, DiscussionStatus::Cancelled);
}

#[test]
fn default_synthesis_breaks_ties_toward_the_first_participant() {
    let contributions = vec![
        Contribution { participant_id: "a".to_string(), role: "r".to_string(), content: "from-a".to_string(), agreement_score: Some(0.8) },
        Contribution { participant_id: "b".to_string(), role: "r".to_string(), content: "from-b".to_string(), agreement_score: Some(0.8) },
        Contribution { participant_id: "c".to_string(), role: "r".to_string(), content: "from-c".to_string(), agreement_score: Some(0.5) },
    ];
    assert_eq!(default_synthesis(&contributions), "from-a");
}
