// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! loom-collab: multi-agent collaboration patterns (C6/C8).
//!
//! [`CritiqueEngine`] and [`DiscussionEngine`] drive self-critique and
//! discussion runs by submitting each agent call as an ordinary job to the
//! shared [`loom_engine::JobManager`] — the same step-submission primitive
//! [`loom_workflow`](../loom_workflow/index.html)'s `WorkflowEngine` is built
//! on, reused here without a dependency on that crate since a collaboration
//! round's step set is generated dynamically round over round rather than
//! validated once as a static DAG.

pub mod critique;
pub mod critique_engine;
pub mod discussion;
pub mod discussion_engine;
pub mod invocation;

pub use critique::{Critique, CritiqueId, CritiqueStatus, Iteration, QualityCriterion, SelfCritiqueConfig, SelfCritiqueExecution};
pub use critique_engine::CritiqueEngine;
pub use discussion::{
    ConsensusStrategy, Contribution, DiscussionConfig, DiscussionExecution, DiscussionId, DiscussionStatus, Participant,
    ParticipantSummary, Round,
};
pub use discussion_engine::DiscussionEngine;
pub use invocation::AgentInvocation;
