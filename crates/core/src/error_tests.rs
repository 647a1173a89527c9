// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use super::*;

#[yare::parameterized(
    validation = { OrchestrationError::ValidationFailed { reason: "bad".into() }, ErrorKind::ValidationFailed },
    unauthorized = { OrchestrationError::Unauthorized, ErrorKind::Unauthorized },
    forbidden = { OrchestrationError::Forbidden, ErrorKind::Forbidden },
    not_found = { OrchestrationError::NotFound("job-1".into()), ErrorKind::NotFound },
    rate_limited = { OrchestrationError::RateLimitExceeded { retry_after_sec: 5 }, ErrorKind::RateLimitExceeded },
    queue_full = { OrchestrationError::QueueFull, ErrorKind::QueueFull },
    backend_unavailable = { OrchestrationError::BackendUnavailable("cli".into()), ErrorKind::BackendUnavailable },
    execution_failed = { OrchestrationError::ExecutionFailed("boom".into()), ErrorKind::ExecutionFailed },
    crash = { OrchestrationError::Crash("segv".into()), ErrorKind::Crash },
    timeout = { OrchestrationError::Timeout, ErrorKind::Timeout },
    cancelled = { OrchestrationError::Cancelled, ErrorKind::Cancelled },
    internal = { OrchestrationError::Internal("oops".into()), ErrorKind::InternalError },
    store_unavailable = { OrchestrationError::StoreUnavailable("down".into()), ErrorKind::InternalError },
)]
fn kind_projects_wire_stable_tag(err: OrchestrationError, expected: ErrorKind) {
    assert_eq!(err.kind(), expected);
}

#[test]
fn error_kind_display_matches_wire_tag() {
    assert_eq!(ErrorKind::RateLimitExceeded.to_string(), "RATE_LIMIT_EXCEEDED");
    assert_eq!(ErrorKind::QueueFull.to_string(), "QUEUE_FULL");
}

#[test]
fn error_kind_serde_uses_screaming_snake_case() {
    let json = serde_json::to_string(&ErrorKind::BackendUnavailable).unwrap();
    assert_eq!(json, "\"BACKEND_UNAVAILABLE\"");
}
