//! Durable storage used by the engine.

use async_trait::async_trait;
use thiserror::Error;

use crate::chamber::Chamber;
use crate::meeting::{Meeting, MeetingRegistration, MeetingStatus, MeetingUpdate};
use crate::proposal::{Proposal, ProposalEvent, ProposalStatus, QuantitativeItem};
use crate::voting::{Vote, VoteCounts, VotingSession};

/// A storage call failed.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or could not run the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be read back into a domain record.
    #[error("corrupt {entity} record: {detail}")]
    Corrupt { entity: &'static str, detail: String },
}

/// Result of inserting a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteInsert {
    Inserted,
    /// The (proposal, user, stage) triple already holds a ballot.
    Duplicate,
    /// The stage is not the open stage of the proposal.
    Closed,
}

/// Result of registering for an open meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationInsert {
    Registered,
    AlreadyRegistered,
    /// The registration window is not open.
    Closed,
}

/// Storage operations the engine depends on.
///
/// Implementations must make these guarantees:
///
/// - `insert_vote` rejects a second ballot for the same (proposal, user,
///   stage) with [`VoteInsert::Duplicate`] instead of overwriting it, and
///   writes nothing unless that stage is open at the moment of the insert.
/// - `register_for_meeting` writes nothing unless the meeting is open at the
///   moment of the insert. Both `register_*` calls are idempotent.
/// - `increment_chamber_counter` is a single atomic increment-and-read.
/// - `upsert_voting_session`, `close_voting_session`, `complete_meeting` and
///   `close_meeting` only perform their transition from the expected `open`
///   state and report whether they did.
/// - `complete_meeting` counts registrations and closes the window in one
///   step, so the quorum decision is stored with the close.
#[async_trait]
pub trait Storage: Send + Sync {
    // Proposals

    /// Store a new proposal and its items.
    async fn create_proposal(
        &self,
        proposal: &Proposal,
        items: &[QuantitativeItem],
    ) -> Result<(), StorageError>;

    async fn get_proposal(&self, id: &str) -> Result<Option<Proposal>, StorageError>;

    /// Returns false if the proposal does not exist.
    async fn set_proposal_status(
        &self,
        id: &str,
        status: ProposalStatus,
    ) -> Result<bool, StorageError>;

    /// Delete a proposal together with its events, items, session and votes.
    async fn delete_proposal(&self, id: &str) -> Result<bool, StorageError>;

    async fn append_event(&self, proposal_id: &str, event: &ProposalEvent)
        -> Result<(), StorageError>;

    /// Timeline in insertion order.
    async fn list_events(&self, proposal_id: &str) -> Result<Vec<ProposalEvent>, StorageError>;

    /// Items ordered by index.
    async fn list_items(&self, proposal_id: &str) -> Result<Vec<QuantitativeItem>, StorageError>;

    /// Atomically increment a chamber's counter and return the new value.
    async fn increment_chamber_counter(&self, chamber: Chamber) -> Result<i64, StorageError>;

    // Voting

    async fn get_voting_session(
        &self,
        proposal_id: &str,
    ) -> Result<Option<VotingSession>, StorageError>;

    /// Insert or replace the session of a proposal.
    ///
    /// Returns false, writing nothing, if an open session already exists.
    async fn upsert_voting_session(&self, session: &VotingSession) -> Result<bool, StorageError>;

    /// Mark an open session closed. Returns false if it was not open.
    async fn close_voting_session(
        &self,
        proposal_id: &str,
        ended_at: i64,
    ) -> Result<bool, StorageError>;

    /// Record that a closed stage's result was published. Returns false if
    /// the stored session is not that stage or was already tallied.
    async fn mark_voting_tallied(&self, proposal_id: &str, stage: u32)
        -> Result<bool, StorageError>;

    /// Remember the ballot message posted for a stage. Returns false if the
    /// stored session is not that stage.
    async fn set_runoff_message(
        &self,
        proposal_id: &str,
        stage: u32,
        message_id: &str,
    ) -> Result<bool, StorageError>;

    /// Sessions that still need a timer: open, or closed but not tallied.
    async fn list_active_voting_sessions(&self) -> Result<Vec<VotingSession>, StorageError>;

    async fn insert_vote(&self, vote: &Vote) -> Result<VoteInsert, StorageError>;

    async fn get_vote_counts(&self, proposal_id: &str, stage: u32)
        -> Result<VoteCounts, StorageError>;

    async fn list_votes(&self, proposal_id: &str, stage: u32) -> Result<Vec<Vote>, StorageError>;

    // Meetings

    async fn create_meeting(&self, meeting: &Meeting) -> Result<(), StorageError>;

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StorageError>;

    /// Returns false if the meeting does not exist.
    async fn update_meeting(&self, id: &str, update: &MeetingUpdate) -> Result<bool, StorageError>;

    /// Close an open meeting with the given status. Returns false if it was not open.
    async fn close_meeting(&self, id: &str, status: MeetingStatus) -> Result<bool, StorageError>;

    /// Close an open meeting as completed and store whether its
    /// registrations reached quorum. Returns that decision, or `None` if the
    /// meeting was not open.
    async fn complete_meeting(&self, id: &str) -> Result<Option<bool>, StorageError>;

    /// Record that voter roles were handed out. Returns false if the meeting
    /// was already finalized.
    async fn mark_meeting_finalized(&self, id: &str) -> Result<bool, StorageError>;

    /// Meetings that still need a timer: open, or completed but not finalized.
    async fn list_active_meetings(&self) -> Result<Vec<Meeting>, StorageError>;

    /// Register a user while the meeting is open.
    async fn register_for_meeting(
        &self,
        meeting_id: &str,
        user_id: &str,
        registered_at: i64,
    ) -> Result<RegistrationInsert, StorageError>;

    /// Register a user regardless of the window. Returns true if a new
    /// registration was recorded.
    async fn register_late(
        &self,
        meeting_id: &str,
        user_id: &str,
        registered_at: i64,
    ) -> Result<bool, StorageError>;

    async fn get_registration_count(&self, meeting_id: &str) -> Result<u32, StorageError>;

    /// Registrations ordered by `registered_at`.
    async fn get_registrations(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<MeetingRegistration>, StorageError>;
}
