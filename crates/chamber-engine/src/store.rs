//! [`Storage`] backed by the SQLite `database` crate.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chamber_core::{
    Chamber, Meeting, MeetingRegistration, MeetingStatus, MeetingUpdate, Proposal, ProposalEvent,
    ProposalStatus, QuantitativeItem, RegistrationInsert, Storage, StorageError, Vote, VoteChoice,
    VoteCounts, VoteFormula, VoteInsert, VotingSession,
};
use database::{
    chamber_counter, meeting, proposal, proposal_event, registration, vote, voting_session,
    Database, DatabaseError, MeetingChanges, MeetingRegistrationRow, MeetingRow, ProposalEventRow,
    ProposalRow, QuantitativeItemRow, VoteRow, VotingSessionRow,
};

type StoreResult<T> = Result<T, StorageError>;

/// Storage over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_proposal(
        &self,
        proposal: &Proposal,
        items: &[QuantitativeItem],
    ) -> StoreResult<()> {
        let rows: Vec<QuantitativeItemRow> = items
            .iter()
            .map(|item| QuantitativeItemRow {
                proposal_id: proposal.id.clone(),
                item_index: i64::from(item.item_index),
                text: item.text.clone(),
            })
            .collect();
        proposal::create_proposal(self.db.pool(), &proposal_to_row(proposal), &rows)
            .await
            .map_err(backend)
    }

    async fn get_proposal(&self, id: &str) -> StoreResult<Option<Proposal>> {
        proposal::get_proposal(self.db.pool(), id)
            .await
            .map_err(backend)?
            .map(proposal_from_row)
            .transpose()
    }

    async fn set_proposal_status(&self, id: &str, status: ProposalStatus) -> StoreResult<bool> {
        match proposal::set_status(self.db.pool(), id, status.code()).await {
            Ok(()) => Ok(true),
            Err(DatabaseError::NotFound { .. }) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn delete_proposal(&self, id: &str) -> StoreResult<bool> {
        proposal::delete_proposal(self.db.pool(), id)
            .await
            .map_err(backend)
    }

    async fn append_event(&self, proposal_id: &str, event: &ProposalEvent) -> StoreResult<()> {
        proposal_event::insert_event(
            self.db.pool(),
            proposal_id,
            event.kind.code(),
            event.chamber.code(),
            event.timestamp,
            &event.description,
        )
        .await
        .map_err(backend)
    }

    async fn list_events(&self, proposal_id: &str) -> StoreResult<Vec<ProposalEvent>> {
        proposal_event::list_events(self.db.pool(), proposal_id)
            .await
            .map_err(backend)?
            .into_iter()
            .map(event_from_row)
            .collect()
    }

    async fn list_items(&self, proposal_id: &str) -> StoreResult<Vec<QuantitativeItem>> {
        proposal::list_items(self.db.pool(), proposal_id)
            .await
            .map_err(backend)?
            .into_iter()
            .map(|row| -> StoreResult<QuantitativeItem> {
                Ok(QuantitativeItem {
                    item_index: to_u32("QuantitativeItem", "item_index", row.item_index)?,
                    proposal_id: row.proposal_id,
                    text: row.text,
                })
            })
            .collect()
    }

    async fn increment_chamber_counter(&self, chamber: Chamber) -> StoreResult<i64> {
        chamber_counter::increment(self.db.pool(), chamber.code())
            .await
            .map_err(backend)
    }

    async fn get_voting_session(&self, proposal_id: &str) -> StoreResult<Option<VotingSession>> {
        voting_session::get_session(self.db.pool(), proposal_id)
            .await
            .map_err(backend)?
            .map(session_from_row)
            .transpose()
    }

    async fn upsert_voting_session(&self, session: &VotingSession) -> StoreResult<bool> {
        voting_session::upsert_if_closed(self.db.pool(), &session_to_row(session)?)
            .await
            .map_err(backend)
    }

    async fn close_voting_session(&self, proposal_id: &str, ended_at: i64) -> StoreResult<bool> {
        voting_session::close_session(self.db.pool(), proposal_id, ended_at)
            .await
            .map_err(backend)
    }

    async fn mark_voting_tallied(&self, proposal_id: &str, stage: u32) -> StoreResult<bool> {
        voting_session::mark_tallied(self.db.pool(), proposal_id, i64::from(stage))
            .await
            .map_err(backend)
    }

    async fn set_runoff_message(
        &self,
        proposal_id: &str,
        stage: u32,
        message_id: &str,
    ) -> StoreResult<bool> {
        voting_session::set_runoff_message(
            self.db.pool(),
            proposal_id,
            i64::from(stage),
            message_id,
        )
        .await
        .map_err(backend)
    }

    async fn list_active_voting_sessions(&self) -> StoreResult<Vec<VotingSession>> {
        voting_session::list_active(self.db.pool())
            .await
            .map_err(backend)?
            .into_iter()
            .map(session_from_row)
            .collect()
    }

    async fn insert_vote(&self, ballot: &Vote) -> StoreResult<VoteInsert> {
        let row = VoteRow {
            proposal_id: ballot.proposal_id.clone(),
            user_id: ballot.user_id.clone(),
            stage: i64::from(ballot.stage),
            vote_type: ballot.choice.to_string(),
            cast_at: ballot.cast_at,
        };
        match vote::insert_vote(self.db.pool(), &row).await {
            Ok(true) => Ok(VoteInsert::Inserted),
            Ok(false) => Ok(VoteInsert::Closed),
            Err(e) if e.is_already_exists() => Ok(VoteInsert::Duplicate),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_vote_counts(&self, proposal_id: &str, stage: u32) -> StoreResult<VoteCounts> {
        vote::count_by_type(self.db.pool(), proposal_id, i64::from(stage))
            .await
            .map_err(backend)?
            .into_iter()
            .map(|(code, count)| -> StoreResult<(VoteChoice, u32)> {
                Ok((
                    parse::<VoteChoice>("Vote", &code)?,
                    to_u32("Vote", "count", count)?,
                ))
            })
            .collect()
    }

    async fn list_votes(&self, proposal_id: &str, stage: u32) -> StoreResult<Vec<Vote>> {
        vote::list_votes(self.db.pool(), proposal_id, i64::from(stage))
            .await
            .map_err(backend)?
            .into_iter()
            .map(|row| -> StoreResult<Vote> {
                Ok(Vote {
                    choice: parse("Vote", &row.vote_type)?,
                    stage: to_u32("Vote", "stage", row.stage)?,
                    proposal_id: row.proposal_id,
                    user_id: row.user_id,
                    cast_at: row.cast_at,
                })
            })
            .collect()
    }

    async fn create_meeting(&self, record: &Meeting) -> StoreResult<()> {
        meeting::create_meeting(self.db.pool(), &meeting_to_row(record))
            .await
            .map_err(backend)
    }

    async fn get_meeting(&self, id: &str) -> StoreResult<Option<Meeting>> {
        meeting::get_meeting(self.db.pool(), id)
            .await
            .map_err(backend)?
            .map(meeting_from_row)
            .transpose()
    }

    async fn update_meeting(&self, id: &str, update: &MeetingUpdate) -> StoreResult<bool> {
        meeting::update_meeting(self.db.pool(), id, &changes_from_update(update))
            .await
            .map_err(backend)
    }

    async fn close_meeting(&self, id: &str, status: MeetingStatus) -> StoreResult<bool> {
        meeting::close_meeting(self.db.pool(), id, status.code())
            .await
            .map_err(backend)
    }

    async fn complete_meeting(&self, id: &str) -> StoreResult<Option<bool>> {
        meeting::complete_meeting(self.db.pool(), id)
            .await
            .map_err(backend)
    }

    async fn mark_meeting_finalized(&self, id: &str) -> StoreResult<bool> {
        meeting::mark_finalized(self.db.pool(), id)
            .await
            .map_err(backend)
    }

    async fn list_active_meetings(&self) -> StoreResult<Vec<Meeting>> {
        meeting::list_active(self.db.pool())
            .await
            .map_err(backend)?
            .into_iter()
            .map(meeting_from_row)
            .collect()
    }

    async fn register_for_meeting(
        &self,
        meeting_id: &str,
        user_id: &str,
        registered_at: i64,
    ) -> StoreResult<RegistrationInsert> {
        match registration::register_if_open(self.db.pool(), meeting_id, user_id, registered_at)
            .await
        {
            Ok(true) => Ok(RegistrationInsert::Registered),
            Ok(false) => Ok(RegistrationInsert::Closed),
            Err(e) if e.is_already_exists() => Ok(RegistrationInsert::AlreadyRegistered),
            Err(e) => Err(backend(e)),
        }
    }

    async fn register_late(
        &self,
        meeting_id: &str,
        user_id: &str,
        registered_at: i64,
    ) -> StoreResult<bool> {
        registration::register(self.db.pool(), meeting_id, user_id, registered_at)
            .await
            .map_err(backend)
    }

    async fn get_registration_count(&self, meeting_id: &str) -> StoreResult<u32> {
        let count = registration::count(self.db.pool(), meeting_id)
            .await
            .map_err(backend)?;
        to_u32("MeetingRegistration", "count", count)
    }

    async fn get_registrations(&self, meeting_id: &str) -> StoreResult<Vec<MeetingRegistration>> {
        Ok(registration::list(self.db.pool(), meeting_id)
            .await
            .map_err(backend)?
            .into_iter()
            .map(registration_from_row)
            .collect())
    }
}

fn backend(err: DatabaseError) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn parse<T>(entity: &'static str, value: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| StorageError::Corrupt {
        entity,
        detail: e.to_string(),
    })
}

fn to_u32(entity: &'static str, field: &str, value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt {
        entity,
        detail: format!("{} out of range: {}", field, value),
    })
}

fn proposal_to_row(proposal: &Proposal) -> ProposalRow {
    ProposalRow {
        id: proposal.id.clone(),
        number: proposal.number.clone(),
        chamber: proposal.chamber.code().to_string(),
        author_id: proposal.author_id.clone(),
        title: proposal.title.clone(),
        status: proposal.status.code().to_string(),
        is_quantitative: proposal.is_quantitative,
        parent_proposal_id: proposal.parent_proposal_id.clone(),
        created_at: proposal.created_at,
    }
}

fn proposal_from_row(row: ProposalRow) -> StoreResult<Proposal> {
    Ok(Proposal {
        chamber: parse("Proposal", &row.chamber)?,
        status: parse("Proposal", &row.status)?,
        id: row.id,
        number: row.number,
        author_id: row.author_id,
        title: row.title,
        is_quantitative: row.is_quantitative,
        parent_proposal_id: row.parent_proposal_id,
        created_at: row.created_at,
    })
}

fn event_from_row(row: ProposalEventRow) -> StoreResult<ProposalEvent> {
    Ok(ProposalEvent {
        kind: parse("ProposalEvent", &row.kind)?,
        chamber: parse("ProposalEvent", &row.chamber)?,
        timestamp: row.created_at,
        description: row.description,
    })
}

fn session_to_row(session: &VotingSession) -> StoreResult<VotingSessionRow> {
    let candidates = session
        .candidates
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(VotingSessionRow {
        proposal_id: session.proposal_id.clone(),
        open: session.open,
        started_at: session.started_at,
        duration_ms: session.duration_ms,
        expires_at: session.expires_at,
        ended_at: session.ended_at,
        is_secret: session.is_secret,
        formula: session.formula.code().to_string(),
        stage: i64::from(session.stage),
        total_members: i64::from(session.total_members),
        candidates,
        runoff_message_id: session.runoff_message_id.clone(),
        tallied: session.tallied,
    })
}

fn session_from_row(row: VotingSessionRow) -> StoreResult<VotingSession> {
    let candidates = row
        .candidates
        .as_deref()
        .map(serde_json::from_str::<Vec<u32>>)
        .transpose()
        .map_err(|e| StorageError::Corrupt {
            entity: "VotingSession",
            detail: format!("candidates: {}", e),
        })?;

    Ok(VotingSession {
        stage: to_u32("VotingSession", "stage", row.stage)?,
        total_members: to_u32("VotingSession", "total_members", row.total_members)?,
        formula: VoteFormula::from_code(&row.formula),
        candidates,
        proposal_id: row.proposal_id,
        open: row.open,
        started_at: row.started_at,
        duration_ms: row.duration_ms,
        expires_at: row.expires_at,
        ended_at: row.ended_at,
        is_secret: row.is_secret,
        runoff_message_id: row.runoff_message_id,
        tallied: row.tallied,
    })
}

fn meeting_to_row(meeting: &Meeting) -> MeetingRow {
    MeetingRow {
        id: meeting.id.clone(),
        chamber: meeting.chamber.code().to_string(),
        title: meeting.title.clone(),
        meeting_date: meeting.meeting_date.clone(),
        channel_id: meeting.channel_id.clone(),
        thread_id: meeting.thread_id.clone(),
        created_at: meeting.created_at,
        duration_ms: meeting.duration_ms,
        expires_at: meeting.expires_at,
        open: meeting.open,
        quorum: i64::from(meeting.quorum),
        total_members: i64::from(meeting.total_members),
        status: meeting.status.code().to_string(),
        quorum_met: meeting.quorum_met,
        finalized: meeting.finalized,
    }
}

fn meeting_from_row(row: MeetingRow) -> StoreResult<Meeting> {
    Ok(Meeting {
        chamber: parse("Meeting", &row.chamber)?,
        status: parse("Meeting", &row.status)?,
        quorum: to_u32("Meeting", "quorum", row.quorum)?,
        total_members: to_u32("Meeting", "total_members", row.total_members)?,
        id: row.id,
        title: row.title,
        meeting_date: row.meeting_date,
        channel_id: row.channel_id,
        thread_id: row.thread_id,
        created_at: row.created_at,
        duration_ms: row.duration_ms,
        expires_at: row.expires_at,
        open: row.open,
        quorum_met: row.quorum_met,
        finalized: row.finalized,
    })
}

fn changes_from_update(update: &MeetingUpdate) -> MeetingChanges {
    MeetingChanges {
        status: update.status.map(|s| s.code().to_string()),
        open: update.open,
        duration_ms: update.duration_ms,
        expires_at: update.expires_at,
        quorum: update.quorum.map(i64::from),
        total_members: update.total_members.map(i64::from),
        quorum_met: update.quorum_met,
    }
}

fn registration_from_row(row: MeetingRegistrationRow) -> MeetingRegistration {
    MeetingRegistration {
        meeting_id: row.meeting_id,
        user_id: row.user_id,
        registered_at: row.registered_at,
    }
}
