// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Multi-participant discussion loop types (spec.md §4.8 "Discussion loop").

use crate::invocation::AgentInvocation;
use loom_core::{OrchestrationError, Result, UserId};
use serde::{Deserialize, Serialize};

loom_core::define_id! {
    /// Unique identifier for a discussion run.
    #[derive(Default)]
    pub struct DiscussionId("dsc-");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub agent: AgentInvocation,
    pub role: String,
    pub weight: f64,
    pub perspective: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStrategy {
    Unanimous,
    Majority,
    Weighted,
    Facilitator,
}

/// One run's configuration (spec.md §4.8 "Discussion loop" inputs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionConfig {
    pub topic: String,
    pub participants: Vec<Participant>,
    pub max_rounds: u32,
    pub consensus_strategy: ConsensusStrategy,
    pub convergence_threshold: f64,
    /// Required when `consensusStrategy == facilitator`.
    pub facilitator: Option<AgentInvocation>,
}

impl DiscussionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(2..=10).contains(&self.participants.len()) {
            return Err(OrchestrationError::ValidationFailed {
                reason: "participants must number between 2 and 10".to_string(),
            });
        }
        if self.max_rounds == 0 {
            return Err(OrchestrationError::ValidationFailed { reason: "maxRounds must be at least 1".to_string() });
        }
        if !(0.0..=1.0).contains(&self.convergence_threshold) {
            return Err(OrchestrationError::ValidationFailed {
                reason: "convergenceThreshold must be within [0, 1]".to_string(),
            });
        }
        if self.consensus_strategy == ConsensusStrategy::Facilitator && self.facilitator.is_none() {
            return Err(OrchestrationError::ValidationFailed {
                reason: "facilitatorAgentId is required for the facilitator consensus strategy".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DiscussionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

loom_core::simple_display! {
    DiscussionStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// One participant's turn within a round (spec.md §3 "contributions[]").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub participant_id: String,
    pub role: String,
    pub content: String,
    pub agreement_score: Option<f64>,
}

/// One completed round (spec.md §3 "rounds[]").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub index: u32,
    pub contributions: Vec<Contribution>,
    pub synthesis: Option<String>,
    pub consensus_score: f64,
}

/// A participant's aggregate standing across the whole run (spec.md §3
/// "participantSummaries").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub participant_id: String,
    pub role: String,
    pub rounds_contributed: u32,
    pub average_agreement_score: f64,
}

/// One run of a [`DiscussionConfig`] (spec.md §3 "Discussion").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionExecution {
    pub id: DiscussionId,
    pub user_id: UserId,
    pub config: DiscussionConfig,
    pub rounds: Vec<Round>,
    pub converged: bool,
    /// The last round's synthesis text (spec.md §4.8 "finalConsensus is the
    /// last synthesis").
    pub final_consensus: Option<String>,
    pub participant_summaries: Vec<ParticipantSummary>,
    pub status: DiscussionStatus,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl DiscussionExecution {
    pub fn new(id: DiscussionId, user_id: UserId, config: DiscussionConfig, created_at_ms: u64) -> Self {
        Self {
            id,
            user_id,
            config,
            rounds: Vec::new(),
            converged: false,
            final_consensus: None,
            participant_summaries: Vec::new(),
            status: DiscussionStatus::Pending,
            created_at_ms,
            completed_at_ms: None,
        }
    }
}

#[cfg(test)]
#[path = "discussion_tests.rs"]
mod tests;
