//! Recording presenter - remembers every call instead of talking to a platform.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chamber_core::{
    Chamber, FinalResult, Meeting, Presenter, PresenterError, Proposal, QuorumReport, RoleGrant,
    VoteStatus, VotingSession,
};

/// One presenter call as seen by [`RecordingPresenter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Ballot {
        proposal_id: String,
        stage: u32,
        candidates: Option<Vec<u32>>,
    },
    VoteStatus(VoteStatus),
    FinalResult(FinalResult),
    MeetingStatus {
        meeting_id: String,
        time_left_ms: i64,
        registered: u32,
    },
    MeetingResult(QuorumReport),
    RoleGranted {
        chamber: Chamber,
        user_id: String,
    },
    RoleRevoked {
        chamber: Chamber,
        user_id: String,
    },
}

/// Message id [`RecordingPresenter`] reports for a rendered ballot.
pub fn ballot_message_id(proposal_id: &str, stage: u32) -> String {
    format!("ballot-{}-{}", proposal_id, stage)
}

#[derive(Debug, Default)]
struct State {
    log: Vec<Rendered>,
    held_roles: HashSet<(Chamber, String)>,
    failing_users: HashSet<String>,
    chamber_size: Option<u32>,
}

/// A presenter that records calls and simulates voter roles in memory.
///
/// Rendering always succeeds unless [`RecordingPresenter::fail_rendering`]
/// is switched on. Role grants fail for users registered with
/// [`RecordingPresenter::fail_for`].
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    state: Mutex<State>,
    fail_rendering: AtomicBool,
}

impl RecordingPresenter {
    /// Create a presenter with no chamber size and no held roles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a presenter that reports `size` members for every chamber.
    pub fn with_chamber_size(size: u32) -> Self {
        let presenter = Self::default();
        presenter.state().chamber_size = Some(size);
        presenter
    }

    /// Pretend `user_id` already holds the chamber's voter role.
    pub fn give_role(&self, chamber: Chamber, user_id: impl Into<String>) {
        self.state().held_roles.insert((chamber, user_id.into()));
    }

    /// Make every role operation for `user_id` fail.
    pub fn fail_for(&self, user_id: impl Into<String>) {
        self.state().failing_users.insert(user_id.into());
    }

    /// Make every render call fail with a platform error.
    pub fn fail_rendering(&self, fail: bool) {
        self.fail_rendering.store(fail, Ordering::SeqCst);
    }

    /// Whether `user_id` currently holds the chamber's voter role.
    pub fn holds_role(&self, chamber: Chamber, user_id: &str) -> bool {
        self.state()
            .held_roles
            .contains(&(chamber, user_id.to_string()))
    }

    /// All recorded calls in order.
    pub fn log(&self) -> Vec<Rendered> {
        self.state().log.clone()
    }

    pub fn ballots(&self) -> Vec<Rendered> {
        self.log()
            .into_iter()
            .filter(|r| matches!(r, Rendered::Ballot { .. }))
            .collect()
    }

    pub fn vote_statuses(&self) -> Vec<VoteStatus> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Rendered::VoteStatus(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn final_results(&self) -> Vec<FinalResult> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Rendered::FinalResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn meeting_results(&self) -> Vec<QuorumReport> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Rendered::MeetingResult(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    /// Number of meeting status refreshes recorded.
    pub fn meeting_status_count(&self) -> usize {
        self.log()
            .iter()
            .filter(|r| matches!(r, Rendered::MeetingStatus { .. }))
            .count()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, rendered: Rendered) -> Result<(), PresenterError> {
        if self.fail_rendering.load(Ordering::SeqCst) {
            return Err(PresenterError::Platform("rendering disabled".to_string()));
        }
        self.state().log.push(rendered);
        Ok(())
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn render_ballot(
        &self,
        proposal: &Proposal,
        session: &VotingSession,
    ) -> Result<Option<String>, PresenterError> {
        self.record(Rendered::Ballot {
            proposal_id: proposal.id.clone(),
            stage: session.stage,
            candidates: session.candidates.clone(),
        })?;
        Ok(Some(ballot_message_id(&proposal.id, session.stage)))
    }

    async fn render_vote_status(&self, status: &VoteStatus) -> Result<(), PresenterError> {
        self.record(Rendered::VoteStatus(status.clone()))
    }

    async fn render_final_result(&self, result: &FinalResult) -> Result<(), PresenterError> {
        self.record(Rendered::FinalResult(result.clone()))
    }

    async fn render_meeting_status(
        &self,
        meeting: &Meeting,
        time_left_ms: i64,
        registered: u32,
    ) -> Result<(), PresenterError> {
        self.record(Rendered::MeetingStatus {
            meeting_id: meeting.id.clone(),
            time_left_ms,
            registered,
        })
    }

    async fn render_meeting_result(&self, report: &QuorumReport) -> Result<(), PresenterError> {
        self.record(Rendered::MeetingResult(report.clone()))
    }

    async fn grant_voter_role(
        &self,
        chamber: Chamber,
        user_id: &str,
    ) -> Result<RoleGrant, PresenterError> {
        let mut state = self.state();
        if state.failing_users.contains(user_id) {
            return Err(PresenterError::Platform(format!(
                "member {} not found",
                user_id
            )));
        }
        if !state.held_roles.insert((chamber, user_id.to_string())) {
            return Ok(RoleGrant::AlreadyHeld);
        }
        state.log.push(Rendered::RoleGranted {
            chamber,
            user_id: user_id.to_string(),
        });
        Ok(RoleGrant::Granted)
    }

    async fn revoke_voter_role(&self, chamber: Chamber, user_id: &str) -> Result<(), PresenterError> {
        let mut state = self.state();
        if state.failing_users.contains(user_id) {
            return Err(PresenterError::Platform(format!(
                "member {} not found",
                user_id
            )));
        }
        state.held_roles.remove(&(chamber, user_id.to_string()));
        state.log.push(Rendered::RoleRevoked {
            chamber,
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn chamber_size(&self, _chamber: Chamber) -> Result<u32, PresenterError> {
        self.state()
            .chamber_size
            .ok_or(PresenterError::Unsupported("chamber_size"))
    }
}
