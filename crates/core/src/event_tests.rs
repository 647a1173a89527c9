// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use super::*;
use crate::job::JobId;

#[test]
fn cli_complete_is_terminal() {
    let event = Event::CliComplete {
        job_id: JobId::new(),
        stdout: String::new(),
        stderr: String::new(),
        exit_code: 0,
        duration_ms: 1,
    };
    assert!(event.is_terminal());
}

#[test]
fn cli_progress_is_not_terminal() {
    let event = Event::CliProgress { job_id: JobId::new(), data: "hi".into() };
    assert!(!event.is_terminal());
}

#[test]
fn workflow_step_events_are_not_terminal() {
    let event = Event::WorkflowStepCompleted {
        execution_id: "exe-1".into(),
        step_id: "a".into(),
    };
    assert!(!event.is_terminal());
}

#[test]
fn serde_tag_matches_wire_name() {
    let event = Event::CliQueued {
        job_id: JobId::from_string("job-abc"),
        queue_position: 1,
        estimated_wait_seconds: 5,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "cli:queued");
    assert_eq!(json["queue_position"], 1);
}

#[test]
fn unknown_type_tag_deserializes_to_custom() {
    let json = r#"{"type":"future:event","foo":"bar"}"#;
    let event: Event = serde_json::from_str(json).unwrap();
    assert_eq!(event, Event::Custom);
}
