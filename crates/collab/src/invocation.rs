// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! A single agent call, the unit both collaboration patterns drive through
//! [`loom_engine::JobManager`] (spec.md §4.8 "built on the workflow
//! engine's step primitives").

use loom_core::BackendKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub backend_kind: BackendKind,
    pub input: serde_json::Value,
}

/// Default per-invocation timeout (spec.md §6.4's `cli.defaultTimeoutMs`).
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 300_000;
