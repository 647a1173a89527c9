use super::*;
use loom_core::{BackendKind, Clock};
use loom_workflow::{OnError, StepDefinition, WorkflowDefinition};

fn step(id: &str) -> StepDefinition {
    StepDefinition {
        id: id.to_string(),
        agent_type: BackendKind::Cli,
        input: serde_json::Value::Null,
        depends_on: Vec::new(),
        condition: None,
        on_error: OnError::Abort,
        timeout_ms: 1_000,
    }
}

#[test]
fn job_state_projects_the_externally_observable_fields() {
    let clock = loom_core::FakeClock::new();
    clock.set_epoch_ms(42);
    let config = loom_core::JobConfig::builder(UserId::new(), BackendKind::Cli)
        .input(serde_json::json!({"prompt": "hi"}))
        .build();
    let mut job = loom_core::Job::new(config, &clock);
    job.set_progress(50);

    let state = JobState::from(&job);
    assert_eq!(state.id, job.id);
    assert_eq!(state.backend_kind, BackendKind::Cli);
    assert_eq!(state.status, JobStatus::Pending);
    assert_eq!(state.progress, 50);
    assert_eq!(state.created_at_ms, 42);
    assert!(!state.stdout_truncated);
}

#[test]
fn workflow_state_projects_step_states() {
    let definition = WorkflowDefinition::new("demo", vec![step("a")]);
    let exec = WorkflowExecution::new(
        loom_workflow::ExecutionId::new(),
        UserId::new(),
        definition,
        10,
    );
    let state = WorkflowState::from(&exec);
    assert_eq!(state.created_at_ms, 10);
    assert_eq!(state.step_states.len(), 1);
    assert!(state.step_states.contains_key("a"));
}

#[test]
fn critique_state_counts_iterations_and_carries_final_score() {
    let mut exec = SelfCritiqueExecution::new(
        CritiqueId::new(),
        UserId::new(),
        loom_collab::SelfCritiqueConfig {
            task: loom_collab::AgentInvocation { backend_kind: BackendKind::Cli, input: serde_json::Value::Null },
            critic: None,
            max_iterations: 3,
            quality_criteria: vec![loom_collab::QualityCriterion { name: "clarity".into(), weight: 1.0 }],
            quality_threshold: 0.8,
            stop_on_quality_threshold: true,
        },
        0,
    );
    exec.iterations.push(loom_collab::Iteration {
        index: 1,
        output: serde_json::Value::Null,
        critique: loom_collab::Critique {
            overall_score: 0.9,
            criteria_scores: Default::default(),
            feedback: String::new(),
            meets_threshold: true,
        },
    });
    exec.converged = true;
    exec.final_score = Some(0.9);

    let state = CritiqueState::from(&exec);
    assert_eq!(state.iteration_count, 1);
    assert!(state.converged);
    assert_eq!(state.final_score, Some(0.9));
}

#[test]
fn discussion_state_projects_round_count_and_consensus() {
    let mut exec = DiscussionExecution::new(
        DiscussionId::new(),
        UserId::new(),
        loom_collab::DiscussionConfig {
            topic: "topic".into(),
            participants: vec![
                loom_collab::Participant {
                    id: "p1".into(),
                    agent: loom_collab::AgentInvocation { backend_kind: BackendKind::Cli, input: serde_json::Value::Null },
                    role: "advocate".into(),
                    weight: 1.0,
                    perspective: None,
                },
                loom_collab::Participant {
                    id: "p2".into(),
                    agent: loom_collab::AgentInvocation { backend_kind: BackendKind::Cli, input: serde_json::Value::Null },
                    role: "skeptic".into(),
                    weight: 1.0,
                    perspective: None,
                },
            ],
            max_rounds: 3,
            consensus_strategy: loom_collab::ConsensusStrategy::Majority,
            convergence_threshold: 0.7,
            facilitator: None,
        },
        0,
    );
    exec.final_consensus = Some("we agree".to_string());
    exec.converged = true;

    let state = DiscussionState::from(&exec);
    assert_eq!(state.round_count, 0);
    assert!(state.converged);
    assert_eq!(state.final_consensus.as_deref(), Some("we agree"));
}

#[test]
fn page_paginate_slices_the_requested_window() {
    let all: Vec<u32> = (0..25).collect();
    let page = Page::paginate(all, 2, 10);
    assert_eq!(page.items, (10..20).collect::<Vec<_>>());
    assert_eq!(page.total, 25);
    assert_eq!(page.page, 2);
}

#[test]
fn page_paginate_past_the_end_is_empty_not_an_error() {
    let all = vec![1, 2, 3];
    let page = Page::paginate(all, 5, 10);
    assert!(page.items.is_empty());
    assert_eq!(page.total, 3);
}

#[test]
fn health_status_round_trips_through_json() {
    let mut backends = HashMap::new();
    backends.insert("cli".to_string(), true);
    backends.insert("dsl".to_string(), false);
    let status = HealthStatus { healthy: false, active_jobs: 2, queue_size: 1, backends };
    let json = serde_json::to_string(&status).expect("serialize failed");
    let back: HealthStatus = serde_json::from_str(&json).expect("deserialize failed");
    assert_eq!(back, status);
}
