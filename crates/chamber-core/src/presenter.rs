//! The chat-platform side of the engine.

use async_trait::async_trait;
use thiserror::Error;

use crate::chamber::Chamber;
use crate::meeting::Meeting;
use crate::outcome::{FinalResult, QuorumReport, RoleGrant, VoteStatus};
use crate::proposal::Proposal;
use crate::voting::VotingSession;

/// Errors reported by a presenter.
#[derive(Debug, Error)]
pub enum PresenterError {
    /// The platform call failed.
    #[error("platform error: {0}")]
    Platform(String),

    /// The presenter does not support this operation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Rendering and permission side effects on the chat platform.
///
/// The engine calls these as fire-and-forget effects: failures are logged
/// and never retried. Role grants are the exception in that their results
/// are counted in a [`QuorumReport`].
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Show the ballot for a newly opened voting stage.
    ///
    /// Returns the id of the posted message when the platform has one; the
    /// engine stores it on runoff stages.
    async fn render_ballot(
        &self,
        proposal: &Proposal,
        session: &VotingSession,
    ) -> Result<Option<String>, PresenterError>;

    /// Refresh the live status of an open vote.
    async fn render_vote_status(&self, status: &VoteStatus) -> Result<(), PresenterError>;

    /// Announce the result of a closed voting stage.
    async fn render_final_result(&self, result: &FinalResult) -> Result<(), PresenterError>;

    /// Refresh the registration panel of an open meeting.
    async fn render_meeting_status(
        &self,
        meeting: &Meeting,
        time_left_ms: i64,
        registered: u32,
    ) -> Result<(), PresenterError>;

    /// Announce the outcome of a registration window, including the
    /// under-quorum notice when quorum was not met.
    async fn render_meeting_result(&self, report: &QuorumReport) -> Result<(), PresenterError>;

    /// Grant the chamber's voter role to a user.
    async fn grant_voter_role(
        &self,
        chamber: Chamber,
        user_id: &str,
    ) -> Result<RoleGrant, PresenterError>;

    /// Revoke the chamber's voter role from a user.
    async fn revoke_voter_role(&self, chamber: Chamber, user_id: &str)
        -> Result<(), PresenterError>;

    /// Number of members in a chamber, used for absolute-majority votes.
    ///
    /// Default implementation reports the operation as unsupported.
    async fn chamber_size(&self, chamber: Chamber) -> Result<u32, PresenterError> {
        let _ = chamber;
        Err(PresenterError::Unsupported("chamber_size"))
    }
}
