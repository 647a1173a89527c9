use super::*;
use serde_json::json;

fn context() -> Value {
    json!({ "steps": { "A": { "out": { "ok": true, "score": 0.9 } } } })
}

#[test]
fn a_bare_boolean_path_evaluates_directly() {
    assert!(evaluate("steps.A.out.ok", &context()).unwrap());
}

#[test]
fn equality_against_a_literal_works() {
    assert!(evaluate("steps.A.out.ok == true", &context()).unwrap());
    assert!(!evaluate("steps.A.out.ok == false", &context()).unwrap());
}

#[test]
fn numeric_ordering_comparisons_work() {
    assert!(evaluate("steps.A.out.score > 0.5", &context()).unwrap());
    assert!(evaluate("steps.A.out.score >= 0.9", &context()).unwrap());
    assert!(!evaluate("steps.A.out.score < 0.5", &context()).unwrap());
}

#[test]
fn logical_and_or_not_compose() {
    assert!(evaluate("steps.A.out.ok && steps.A.out.score > 0.5", &context()).unwrap());
    assert!(evaluate("!steps.A.out.ok || steps.A.out.score > 0.5", &context()).unwrap());
    assert!(!evaluate("!steps.A.out.ok", &context()).unwrap());
}

#[test]
fn parentheses_override_default_precedence() {
    assert!(evaluate("(steps.A.out.ok == false) || (steps.A.out.score > 0.5)", &context()).unwrap());
}

#[test]
fn a_missing_path_resolves_to_null_and_compares_unequal_to_true() {
    assert!(!evaluate("steps.missing.out.ok == true", &context()).unwrap());
    assert!(evaluate("steps.missing.out.ok == null", &context()).unwrap());
}

#[test]
fn a_non_boolean_result_is_rejected() {
    assert!(evaluate("steps.A.out.score", &context()).is_err());
}

#[test]
fn ordering_a_non_numeric_value_is_rejected() {
    assert!(evaluate("steps.A.out.ok > 0", &context()).is_err());
}

#[test]
fn string_literals_compare_by_value() {
    let ctx = json!({ "steps": { "A": { "out": { "stage": "done" } } } });
    assert!(evaluate(r#"steps.A.out.stage == "done""#, &ctx).unwrap());
}
