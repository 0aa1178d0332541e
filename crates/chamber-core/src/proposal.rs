//! Proposals, their timeline and quantitative items.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chamber::{Chamber, ParseEnumError};

/// Lifecycle label of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    UnderReview,
    GovernmentReview,
    Voting,
    Approved,
    Rejected,
    Signed,
    Vetoed,
    Returned,
    Transferred,
}

impl ProposalStatus {
    /// Storage code for this status.
    pub fn code(&self) -> &'static str {
        match self {
            ProposalStatus::UnderReview => "under_review",
            ProposalStatus::GovernmentReview => "government_review",
            ProposalStatus::Voting => "voting",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Signed => "signed",
            ProposalStatus::Vetoed => "vetoed",
            ProposalStatus::Returned => "returned",
            ProposalStatus::Transferred => "transferred",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ProposalStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "under_review" => Ok(ProposalStatus::UnderReview),
            "government_review" => Ok(ProposalStatus::GovernmentReview),
            "voting" => Ok(ProposalStatus::Voting),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "signed" => Ok(ProposalStatus::Signed),
            "vetoed" => Ok(ProposalStatus::Vetoed),
            "returned" => Ok(ProposalStatus::Returned),
            "transferred" => Ok(ProposalStatus::Transferred),
            _ => Err(ParseEnumError::new("proposal status", s)),
        }
    }
}

/// A submitted legislative item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Opaque short token.
    pub id: String,
    /// Chamber-prefixed display number (e.g. "AS-12").
    pub number: String,
    pub chamber: Chamber,
    pub author_id: String,
    pub title: String,
    pub status: ProposalStatus,
    /// Rated vote over items instead of for/against/abstain.
    pub is_quantitative: bool,
    /// Predecessor when this is a re-submission.
    pub parent_proposal_id: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// One votable item of a quantitative proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantitativeItem {
    pub proposal_id: String,
    /// 1-based position, fixed at creation time.
    pub item_index: u32,
    pub text: String,
}

/// Kind of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submitted,
    StatusChanged,
    VotingStarted,
    RunoffScheduled,
    VotingClosed,
}

impl EventKind {
    /// Storage code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Submitted => "submitted",
            EventKind::StatusChanged => "status_changed",
            EventKind::VotingStarted => "voting_started",
            EventKind::RunoffScheduled => "runoff_scheduled",
            EventKind::VotingClosed => "voting_closed",
        }
    }
}

impl FromStr for EventKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(EventKind::Submitted),
            "status_changed" => Ok(EventKind::StatusChanged),
            "voting_started" => Ok(EventKind::VotingStarted),
            "runoff_scheduled" => Ok(EventKind::RunoffScheduled),
            "voting_closed" => Ok(EventKind::VotingClosed),
            _ => Err(ParseEnumError::new("event kind", s)),
        }
    }
}

/// Append-only timeline entry of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEvent {
    pub kind: EventKind,
    pub chamber: Chamber,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub description: String,
}

impl ProposalEvent {
    pub fn new(kind: EventKind, chamber: Chamber, timestamp: i64, description: impl Into<String>) -> Self {
        Self {
            kind,
            chamber,
            timestamp,
            description: description.into(),
        }
    }
}
