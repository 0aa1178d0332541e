//! Database models.
//!
//! Rows mirror the table layout; enumerations are stored as their text codes
//! and timestamps as epoch milliseconds.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A submitted proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProposalRow {
    /// Short opaque token.
    pub id: String,
    /// Display number (e.g. "AS-12").
    pub number: String,
    /// Chamber code.
    pub chamber: String,
    /// Platform user ID of the author.
    pub author_id: String,
    pub title: String,
    /// Status code.
    pub status: String,
    pub is_quantitative: bool,
    /// Predecessor of a re-submission.
    pub parent_proposal_id: Option<String>,
    pub created_at: i64,
}

/// A timeline entry of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProposalEventRow {
    /// Auto-incrementing ID.
    pub id: i64,
    pub proposal_id: String,
    /// Event kind code.
    pub kind: String,
    /// Chamber code.
    pub chamber: String,
    pub created_at: i64,
    pub description: String,
}

/// A votable item of a quantitative proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuantitativeItemRow {
    pub proposal_id: String,
    /// 1-based index.
    pub item_index: i64,
    pub text: String,
}

/// The voting session of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VotingSessionRow {
    pub proposal_id: String,
    pub open: bool,
    pub started_at: i64,
    pub duration_ms: i64,
    pub expires_at: i64,
    pub ended_at: Option<i64>,
    pub is_secret: bool,
    /// Formula code.
    pub formula: String,
    pub stage: i64,
    pub total_members: i64,
    /// JSON array of candidate item indexes, if the vote is quantitative.
    pub candidates: Option<String>,
    pub runoff_message_id: Option<String>,
    /// Whether the closed stage's result was published.
    pub tallied: bool,
}

/// A ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VoteRow {
    pub proposal_id: String,
    pub user_id: String,
    pub stage: i64,
    /// "for", "against", "abstain" or "item:<n>".
    pub vote_type: String,
    pub cast_at: i64,
}

/// A meeting with a quorum-registration window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MeetingRow {
    pub id: String,
    /// Chamber code.
    pub chamber: String,
    pub title: String,
    /// Free-text date.
    pub meeting_date: String,
    pub channel_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: i64,
    pub duration_ms: i64,
    pub expires_at: Option<i64>,
    pub open: bool,
    pub quorum: i64,
    pub total_members: i64,
    /// Status code.
    pub status: String,
    pub quorum_met: Option<bool>,
    /// Whether voter roles were handed out after completion.
    pub finalized: bool,
}

/// A meeting registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MeetingRegistrationRow {
    pub meeting_id: String,
    pub user_id: String,
    pub registered_at: i64,
}
