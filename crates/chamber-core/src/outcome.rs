//! Results produced by the engine and handed to the presenter.

use serde::{Deserialize, Serialize};

use crate::chamber::Chamber;
use crate::tally::{ItemResult, Tally};
use crate::voting::VoteCounts;

/// Live status of an open vote, rendered on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub proposal_id: String,
    pub stage: u32,
    pub is_secret: bool,
    pub remaining_ms: i64,
    pub counts: VoteCounts,
}

/// How a closed voting stage was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOutcome {
    /// For/against vote met its threshold.
    Passed(Tally),
    /// For/against vote fell short.
    Failed(Tally),
    /// Rated vote produced a winning item.
    Winner { item_index: u32, results: Vec<ItemResult> },
    /// Rated vote continues with fewer candidates.
    Runoff {
        next_stage: u32,
        candidates: Vec<u32>,
        results: Vec<ItemResult>,
    },
    /// Rated vote ended without a winner and no runoff is possible.
    NoWinner { results: Vec<ItemResult> },
}

impl VoteOutcome {
    /// Whether the proposal is adopted by this outcome.
    pub fn is_adopted(&self) -> bool {
        matches!(self, VoteOutcome::Passed(_) | VoteOutcome::Winner { .. })
    }

    /// Whether the vote is finished (no further stage follows).
    pub fn is_final(&self) -> bool {
        !matches!(self, VoteOutcome::Runoff { .. })
    }
}

/// Final result of one voting stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    pub proposal_id: String,
    pub chamber: Chamber,
    pub stage: u32,
    pub ended_at: i64,
    pub counts: VoteCounts,
    pub outcome: VoteOutcome,
}

/// Result of granting the voter role to one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleGrant {
    Granted,
    AlreadyHeld,
}

/// A role grant or revoke that failed for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFailure {
    pub user_id: String,
    pub reason: String,
}

/// Outcome of finalizing a meeting's registration window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumReport {
    pub meeting_id: String,
    pub chamber: Chamber,
    pub registered: u32,
    pub quorum: u32,
    pub quorum_met: bool,
    /// Users who received the voter role.
    pub granted: u32,
    /// Users who already held it.
    pub already_had: u32,
    /// Individual grant failures; never abort the batch.
    pub failures: Vec<RoleFailure>,
}

impl QuorumReport {
    /// Whether some grants in the batch failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
