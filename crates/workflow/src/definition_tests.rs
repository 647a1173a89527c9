use super::*;

fn step(id: &str, depends_on: &[&str]) -> StepDefinition {
    StepDefinition {
        id: id.to_string(),
        agent_type: BackendKind::Cli,
        input: serde_json::json!({}),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        condition: None,
        on_error: OnError::Abort,
        timeout_ms: 60_000,
    }
}

#[test]
fn a_linear_chain_is_a_valid_dag() {
    let def = WorkflowDefinition::new(
        "w",
        vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])],
    );
    assert!(def.validate().is_ok());
}

#[test]
fn a_fan_in_is_a_valid_dag() {
    let def =
        WorkflowDefinition::new("w", vec![step("a", &[]), step("b", &[]), step("c", &["a", "b"])]);
    assert!(def.validate().is_ok());
}

#[test]
fn a_self_cycle_is_rejected() {
    let def = WorkflowDefinition::new("w", vec![step("a", &["a"])]);
    let err = def.validate().unwrap_err();
    assert_eq!(err.kind(), loom_core::ErrorKind::ValidationFailed);
}

#[test]
fn a_longer_cycle_is_rejected() {
    let def = WorkflowDefinition::new("w", vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])]);
    assert!(def.validate().is_err());
}

#[test]
fn a_dependency_on_an_unknown_step_is_rejected() {
    let def = WorkflowDefinition::new("w", vec![step("a", &["ghost"])]);
    assert!(def.validate().is_err());
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let def = WorkflowDefinition::new("w", vec![step("a", &[]), step("a", &[])]);
    assert!(def.validate().is_err());
}
