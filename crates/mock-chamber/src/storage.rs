//! In-memory storage with the same conditional write rules as SQLite.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chamber_core::{
    Chamber, Meeting, MeetingRegistration, MeetingStatus, MeetingUpdate, Proposal, ProposalEvent,
    ProposalStatus, QuantitativeItem, RegistrationInsert, Storage, StorageError, Vote, VoteCounts,
    VoteInsert, VotingSession,
};

#[derive(Debug, Default)]
struct State {
    proposals: HashMap<String, Proposal>,
    events: HashMap<String, Vec<ProposalEvent>>,
    items: HashMap<String, Vec<QuantitativeItem>>,
    counters: HashMap<Chamber, i64>,
    sessions: HashMap<String, VotingSession>,
    votes: Vec<Vote>,
    meetings: HashMap<String, Meeting>,
    registrations: Vec<MeetingRegistration>,
}

impl State {
    /// Returns false if the user is already registered.
    fn add_registration(&mut self, meeting_id: &str, user_id: &str, registered_at: i64) -> bool {
        let exists = self
            .registrations
            .iter()
            .any(|r| r.meeting_id == meeting_id && r.user_id == user_id);
        if exists {
            return false;
        }
        self.registrations.push(MeetingRegistration {
            meeting_id: meeting_id.to_string(),
            user_id: user_id.to_string(),
            registered_at,
        });
        true
    }
}

/// Storage kept behind a mutex.
///
/// Every operation takes the lock once, so the conditional transitions
/// (`upsert_voting_session`, `close_voting_session`, `complete_meeting`,
/// `close_meeting`), the open-state checks of `insert_vote` and
/// `register_for_meeting`, and the counter increment are atomic.
///
/// [`MemoryStorage::set_failing`] makes every call return a backend error;
/// [`MemoryStorage::fail_once`] fails only the next call of one operation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
    failing: AtomicBool,
    fail_next: Mutex<HashSet<&'static str>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next call of `operation` (a trait method name such as
    /// `"get_vote_counts"`) fail. Later calls succeed again.
    pub fn fail_once(&self, operation: &'static str) {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation);
    }

    /// Seed a chamber counter, as if `value` proposals had been numbered.
    pub fn set_counter(&self, chamber: Chamber, value: i64) {
        self.state().counters.insert(chamber, value);
    }

    /// Overwrite a stored session without any state check.
    pub fn put_session(&self, session: VotingSession) {
        self.state()
            .sessions
            .insert(session.proposal_id.clone(), session);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, operation: &'static str) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("storage unavailable".to_string()));
        }
        let injected = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation);
        if injected {
            return Err(StorageError::Backend(format!("{} failed", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_proposal(
        &self,
        proposal: &Proposal,
        items: &[QuantitativeItem],
    ) -> Result<(), StorageError> {
        self.check("create_proposal")?;
        let mut state = self.state();
        let number_taken = state.proposals.values().any(|p| p.number == proposal.number);
        if state.proposals.contains_key(&proposal.id) || number_taken {
            return Err(StorageError::Backend(format!(
                "proposal already exists: {}",
                proposal.id
            )));
        }
        let mut items = items.to_vec();
        items.sort_by_key(|item| item.item_index);
        state.items.insert(proposal.id.clone(), items);
        state.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn get_proposal(&self, id: &str) -> Result<Option<Proposal>, StorageError> {
        self.check("get_proposal")?;
        Ok(self.state().proposals.get(id).cloned())
    }

    async fn set_proposal_status(
        &self,
        id: &str,
        status: ProposalStatus,
    ) -> Result<bool, StorageError> {
        self.check("set_proposal_status")?;
        match self.state().proposals.get_mut(id) {
            Some(proposal) => {
                proposal.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_proposal(&self, id: &str) -> Result<bool, StorageError> {
        self.check("delete_proposal")?;
        let mut state = self.state();
        if state.proposals.remove(id).is_none() {
            return Ok(false);
        }
        state.events.remove(id);
        state.items.remove(id);
        state.sessions.remove(id);
        state.votes.retain(|v| v.proposal_id != id);
        for child in state.proposals.values_mut() {
            if child.parent_proposal_id.as_deref() == Some(id) {
                child.parent_proposal_id = None;
            }
        }
        Ok(true)
    }

    async fn append_event(
        &self,
        proposal_id: &str,
        event: &ProposalEvent,
    ) -> Result<(), StorageError> {
        self.check("append_event")?;
        let mut state = self.state();
        if !state.proposals.contains_key(proposal_id) {
            return Err(StorageError::Backend(format!(
                "unknown proposal: {}",
                proposal_id
            )));
        }
        state
            .events
            .entry(proposal_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(&self, proposal_id: &str) -> Result<Vec<ProposalEvent>, StorageError> {
        self.check("list_events")?;
        Ok(self
            .state()
            .events
            .get(proposal_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_items(&self, proposal_id: &str) -> Result<Vec<QuantitativeItem>, StorageError> {
        self.check("list_items")?;
        Ok(self
            .state()
            .items
            .get(proposal_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn increment_chamber_counter(&self, chamber: Chamber) -> Result<i64, StorageError> {
        self.check("increment_chamber_counter")?;
        let mut state = self.state();
        let value = state.counters.entry(chamber).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_voting_session(
        &self,
        proposal_id: &str,
    ) -> Result<Option<VotingSession>, StorageError> {
        self.check("get_voting_session")?;
        Ok(self.state().sessions.get(proposal_id).cloned())
    }

    async fn upsert_voting_session(&self, session: &VotingSession) -> Result<bool, StorageError> {
        self.check("upsert_voting_session")?;
        let mut state = self.state();
        if !state.proposals.contains_key(&session.proposal_id) {
            return Err(StorageError::Backend(format!(
                "unknown proposal: {}",
                session.proposal_id
            )));
        }
        if state
            .sessions
            .get(&session.proposal_id)
            .is_some_and(|existing| existing.open)
        {
            return Ok(false);
        }
        state
            .sessions
            .insert(session.proposal_id.clone(), session.clone());
        Ok(true)
    }

    async fn close_voting_session(
        &self,
        proposal_id: &str,
        ended_at: i64,
    ) -> Result<bool, StorageError> {
        self.check("close_voting_session")?;
        match self.state().sessions.get_mut(proposal_id) {
            Some(session) if session.open => {
                session.open = false;
                session.ended_at = Some(ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_voting_tallied(
        &self,
        proposal_id: &str,
        stage: u32,
    ) -> Result<bool, StorageError> {
        self.check("mark_voting_tallied")?;
        match self.state().sessions.get_mut(proposal_id) {
            Some(session) if session.stage == stage && !session.tallied => {
                session.tallied = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_runoff_message(
        &self,
        proposal_id: &str,
        stage: u32,
        message_id: &str,
    ) -> Result<bool, StorageError> {
        self.check("set_runoff_message")?;
        match self.state().sessions.get_mut(proposal_id) {
            Some(session) if session.stage == stage => {
                session.runoff_message_id = Some(message_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_voting_sessions(&self) -> Result<Vec<VotingSession>, StorageError> {
        self.check("list_active_voting_sessions")?;
        let mut active: Vec<VotingSession> = self
            .state()
            .sessions
            .values()
            .filter(|s| s.open || !s.tallied)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.expires_at);
        Ok(active)
    }

    async fn insert_vote(&self, vote: &Vote) -> Result<VoteInsert, StorageError> {
        self.check("insert_vote")?;
        let mut state = self.state();
        let stage_open = state
            .sessions
            .get(&vote.proposal_id)
            .is_some_and(|s| s.open && s.stage == vote.stage);
        let duplicate = state.votes.iter().any(|v| {
            v.proposal_id == vote.proposal_id && v.user_id == vote.user_id && v.stage == vote.stage
        });
        if duplicate {
            return Ok(VoteInsert::Duplicate);
        }
        if !stage_open {
            return Ok(VoteInsert::Closed);
        }
        state.votes.push(vote.clone());
        Ok(VoteInsert::Inserted)
    }

    async fn get_vote_counts(
        &self,
        proposal_id: &str,
        stage: u32,
    ) -> Result<VoteCounts, StorageError> {
        self.check("get_vote_counts")?;
        Ok(self
            .state()
            .votes
            .iter()
            .filter(|v| v.proposal_id == proposal_id && v.stage == stage)
            .map(|v| (v.choice, 1))
            .collect())
    }

    async fn list_votes(&self, proposal_id: &str, stage: u32) -> Result<Vec<Vote>, StorageError> {
        self.check("list_votes")?;
        Ok(self
            .state()
            .votes
            .iter()
            .filter(|v| v.proposal_id == proposal_id && v.stage == stage)
            .cloned()
            .collect())
    }

    async fn create_meeting(&self, meeting: &Meeting) -> Result<(), StorageError> {
        self.check("create_meeting")?;
        let mut state = self.state();
        if state.meetings.contains_key(&meeting.id) {
            return Err(StorageError::Backend(format!(
                "meeting already exists: {}",
                meeting.id
            )));
        }
        state.meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StorageError> {
        self.check("get_meeting")?;
        Ok(self.state().meetings.get(id).cloned())
    }

    async fn update_meeting(&self, id: &str, update: &MeetingUpdate) -> Result<bool, StorageError> {
        self.check("update_meeting")?;
        match self.state().meetings.get_mut(id) {
            Some(meeting) => {
                update.apply_to(meeting);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_meeting(&self, id: &str, status: MeetingStatus) -> Result<bool, StorageError> {
        self.check("close_meeting")?;
        match self.state().meetings.get_mut(id) {
            Some(meeting) if meeting.open => {
                meeting.open = false;
                meeting.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_meeting(&self, id: &str) -> Result<Option<bool>, StorageError> {
        self.check("complete_meeting")?;
        let mut state = self.state();
        let registered = state
            .registrations
            .iter()
            .filter(|r| r.meeting_id == id)
            .count();
        match state.meetings.get_mut(id) {
            Some(meeting) if meeting.open => {
                let quorum_met = registered >= meeting.quorum as usize;
                meeting.open = false;
                meeting.status = MeetingStatus::Completed;
                meeting.quorum_met = Some(quorum_met);
                Ok(Some(quorum_met))
            }
            _ => Ok(None),
        }
    }

    async fn mark_meeting_finalized(&self, id: &str) -> Result<bool, StorageError> {
        self.check("mark_meeting_finalized")?;
        match self.state().meetings.get_mut(id) {
            Some(meeting) if !meeting.finalized => {
                meeting.finalized = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_meetings(&self) -> Result<Vec<Meeting>, StorageError> {
        self.check("list_active_meetings")?;
        let mut active: Vec<Meeting> = self
            .state()
            .meetings
            .values()
            .filter(|m| m.open || m.needs_finalizing())
            .cloned()
            .collect();
        active.sort_by_key(|m| m.expires_at);
        Ok(active)
    }

    async fn register_for_meeting(
        &self,
        meeting_id: &str,
        user_id: &str,
        registered_at: i64,
    ) -> Result<RegistrationInsert, StorageError> {
        self.check("register_for_meeting")?;
        let mut state = self.state();
        let open = match state.meetings.get(meeting_id) {
            Some(meeting) => meeting.open,
            None => {
                return Err(StorageError::Backend(format!(
                    "unknown meeting: {}",
                    meeting_id
                )))
            }
        };
        if !open {
            return Ok(RegistrationInsert::Closed);
        }
        if state.add_registration(meeting_id, user_id, registered_at) {
            Ok(RegistrationInsert::Registered)
        } else {
            Ok(RegistrationInsert::AlreadyRegistered)
        }
    }

    async fn register_late(
        &self,
        meeting_id: &str,
        user_id: &str,
        registered_at: i64,
    ) -> Result<bool, StorageError> {
        self.check("register_late")?;
        let mut state = self.state();
        if !state.meetings.contains_key(meeting_id) {
            return Err(StorageError::Backend(format!(
                "unknown meeting: {}",
                meeting_id
            )));
        }
        Ok(state.add_registration(meeting_id, user_id, registered_at))
    }

    async fn get_registration_count(&self, meeting_id: &str) -> Result<u32, StorageError> {
        self.check("get_registration_count")?;
        let count = self
            .state()
            .registrations
            .iter()
            .filter(|r| r.meeting_id == meeting_id)
            .count();
        Ok(count as u32)
    }

    async fn get_registrations(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<MeetingRegistration>, StorageError> {
        self.check("get_registrations")?;
        let mut registrations: Vec<MeetingRegistration> = self
            .state()
            .registrations
            .iter()
            .filter(|r| r.meeting_id == meeting_id)
            .cloned()
            .collect();
        registrations.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(registrations)
    }
}
