//! Voting state machine.
//!
//! A proposal's session moves `NotStarted -> Open(n) -> Closed(n)`. A rated
//! vote whose stage ends without a winner moves on to `Open(n + 1)`, restricted
//! to the leading items. Ballots are keyed by stage, so earlier stages stay
//! intact as history.

use std::sync::Arc;

use chamber_core::{
    rated_tally, tally, EventKind, FinalResult, Proposal, ProposalEvent, ProposalStatus, Vote,
    VoteChoice, VoteCounts, VoteFormula, VoteInsert, VoteOutcome, VoteStatus, VotingSession,
};
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::scheduler::{FailureBudget, TickOutcome, TimerKey};

/// Request to open a voting stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartVoting {
    pub proposal_id: String,
    pub duration_ms: u64,
    pub formula: VoteFormula,
    pub is_secret: bool,
    pub stage: u32,
}

impl StartVoting {
    /// An open, simple-majority first stage.
    pub fn new(proposal_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            duration_ms,
            formula: VoteFormula::SimpleMajority,
            is_secret: false,
            stage: 1,
        }
    }

    pub fn with_formula(mut self, formula: VoteFormula) -> Self {
        self.formula = formula;
        self
    }

    pub fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }

    pub fn with_stage(mut self, stage: u32) -> Self {
        self.stage = stage;
        self
    }
}

/// Everything needed to open one stage.
struct StageParams {
    stage: u32,
    duration_ms: i64,
    formula: VoteFormula,
    is_secret: bool,
    total_members: u32,
    candidates: Option<Vec<u32>>,
}

/// Owns the lifecycle of every proposal's voting session.
#[derive(Clone)]
pub struct VotingMachine {
    ctx: EngineContext,
}

impl VotingMachine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Open a voting stage and arm its expiry check.
    ///
    /// Fails with [`EngineError::AlreadyOpen`] if a session is open or its
    /// closed result is still being published, and with
    /// [`EngineError::StageRegression`] if `stage` does not exceed the last
    /// stage held by this proposal. A rated proposal votes over all its items.
    pub async fn start_voting(&self, request: StartVoting) -> Result<VotingSession> {
        let proposal = self.load_proposal(&request.proposal_id).await?;

        if let Some(existing) = self
            .ctx
            .storage
            .get_voting_session(&request.proposal_id)
            .await?
        {
            if existing.open || !existing.tallied {
                return Err(EngineError::already_open(
                    "VotingSession",
                    &request.proposal_id,
                ));
            }
            if request.stage <= existing.stage {
                return Err(EngineError::StageRegression {
                    proposal_id: request.proposal_id,
                    current: existing.stage,
                    requested: request.stage,
                });
            }
        }

        let candidates = if proposal.is_quantitative {
            let items = self.ctx.storage.list_items(&proposal.id).await?;
            if items.len() < 2 {
                return Err(EngineError::InvalidProposal(format!(
                    "rated proposal {} has fewer than two items",
                    proposal.id
                )));
            }
            Some(items.into_iter().map(|item| item.item_index).collect())
        } else {
            None
        };

        let total_members = self.ctx.chamber_size(proposal.chamber).await;
        let params = StageParams {
            stage: request.stage.max(1),
            duration_ms: i64::try_from(request.duration_ms).unwrap_or(i64::MAX),
            formula: request.formula,
            is_secret: request.is_secret,
            total_members,
            candidates,
        };

        self.open_stage(&proposal, params).await
    }

    /// Record a ballot.
    ///
    /// The stage must be the open stage of the proposal and the session must
    /// not have expired. Storage re-checks that the stage is open when the
    /// ballot is written, so a ballot racing the close is refused rather than
    /// landing after the count. A second ballot from the same user in the same
    /// stage is rejected with [`EngineError::DuplicateVote`]; the first one
    /// stands.
    pub async fn cast_vote(
        &self,
        proposal_id: &str,
        user_id: &str,
        choice: VoteChoice,
        stage: u32,
    ) -> Result<()> {
        let session = self
            .ctx
            .storage
            .get_voting_session(proposal_id)
            .await?
            .ok_or_else(|| EngineError::not_open("VotingSession", proposal_id))?;

        let now = self.ctx.now();
        if !session.open || session.stage != stage || now >= session.expires_at {
            return Err(EngineError::not_open("VotingSession", proposal_id));
        }
        if !session.accepts(choice) {
            return Err(EngineError::InvalidChoice {
                proposal_id: proposal_id.to_string(),
                choice,
            });
        }

        let vote = Vote {
            proposal_id: proposal_id.to_string(),
            user_id: user_id.to_string(),
            stage,
            choice,
            cast_at: now,
        };

        match self.ctx.storage.insert_vote(&vote).await? {
            VoteInsert::Inserted => {
                debug!(proposal_id = %proposal_id, stage, "Vote recorded");
                Ok(())
            }
            VoteInsert::Duplicate => Err(EngineError::DuplicateVote {
                proposal_id: proposal_id.to_string(),
                user_id: user_id.to_string(),
                stage,
            }),
            VoteInsert::Closed => Err(EngineError::not_open("VotingSession", proposal_id)),
        }
    }

    /// Close the open stage and publish its result.
    ///
    /// The conditional close is the commit point: of two racing calls only
    /// the one that closed the stage publishes. Publishing ends by marking the
    /// stage tallied (or by opening the runoff stage). A stage that closed
    /// but failed to publish is resumed by the next call, normally the next
    /// expiry tick, with its stored `ended_at`; the timer stays armed until
    /// publishing succeeds.
    ///
    /// Returns `None` if there was nothing left to do. A rated vote without a
    /// winner opens the runoff stage before returning.
    pub async fn close_voting(
        &self,
        proposal_id: &str,
        ended_at: i64,
    ) -> Result<Option<FinalResult>> {
        let session = self
            .ctx
            .storage
            .get_voting_session(proposal_id)
            .await?
            .ok_or_else(|| EngineError::not_found("VotingSession", proposal_id))?;

        let ended_at = if session.open {
            if !self
                .ctx
                .storage
                .close_voting_session(proposal_id, ended_at)
                .await?
            {
                return Ok(None);
            }
            ended_at
        } else if !session.tallied {
            info!(
                proposal_id = %proposal_id,
                stage = session.stage,
                "Resuming unpublished vote result"
            );
            session.ended_at.unwrap_or(ended_at)
        } else {
            return Ok(None);
        };

        let proposal = self.load_proposal(proposal_id).await?;
        let counts = self
            .ctx
            .storage
            .get_vote_counts(proposal_id, session.stage)
            .await?;
        let outcome = decide(&session, &counts, self.ctx.config.max_vote_stages);

        self.ctx
            .storage
            .append_event(
                proposal_id,
                &ProposalEvent::new(
                    EventKind::VotingClosed,
                    proposal.chamber,
                    ended_at,
                    describe(&outcome, session.stage),
                ),
            )
            .await?;
        if outcome.is_final() {
            let status = if outcome.is_adopted() {
                ProposalStatus::Approved
            } else {
                ProposalStatus::Rejected
            };
            self.ctx
                .storage
                .set_proposal_status(proposal_id, status)
                .await?;
            self.ctx
                .storage
                .mark_voting_tallied(proposal_id, session.stage)
                .await?;
            self.ctx
                .scheduler
                .cancel(&TimerKey::Vote(proposal_id.to_string()));
        }

        let result = FinalResult {
            proposal_id: proposal_id.to_string(),
            chamber: proposal.chamber,
            stage: session.stage,
            ended_at,
            counts,
            outcome,
        };
        if let Err(e) = self.ctx.presenter.render_final_result(&result).await {
            warn!(proposal_id = %proposal_id, "Failed to render final result: {}", e);
        }
        info!(
            proposal_id = %proposal_id,
            stage = session.stage,
            adopted = result.outcome.is_adopted(),
            "Voting closed"
        );

        if let VoteOutcome::Runoff {
            next_stage,
            candidates,
            ..
        } = &result.outcome
        {
            let params = StageParams {
                stage: *next_stage,
                duration_ms: session.duration_ms,
                formula: session.formula,
                is_secret: session.is_secret,
                total_members: session.total_members,
                candidates: Some(candidates.clone()),
            };
            self.open_stage(&proposal, params).await?;
        }

        Ok(Some(result))
    }

    /// Live counts of the open stage.
    pub async fn vote_status(&self, proposal_id: &str) -> Result<VoteStatus> {
        let session = self
            .ctx
            .storage
            .get_voting_session(proposal_id)
            .await?
            .ok_or_else(|| EngineError::not_found("VotingSession", proposal_id))?;
        let counts = self
            .ctx
            .storage
            .get_vote_counts(proposal_id, session.stage)
            .await?;

        Ok(VoteStatus {
            proposal_id: proposal_id.to_string(),
            stage: session.stage,
            is_secret: session.is_secret,
            remaining_ms: session.remaining_ms(self.ctx.now()),
            counts,
        })
    }

    /// One expiry check.
    ///
    /// Closes the session once `expires_at` has passed, otherwise re-renders
    /// the live status. Storage errors are logged and reported as
    /// [`TickOutcome::Failed`].
    pub async fn tick(&self, proposal_id: &str) -> TickOutcome {
        let session = match self.ctx.storage.get_voting_session(proposal_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(proposal_id = %proposal_id, "Voting session no longer exists");
                return TickOutcome::Missing;
            }
            Err(e) => {
                error!(proposal_id = %proposal_id, "Failed to load voting session: {}", e);
                return TickOutcome::Failed;
            }
        };
        let now = self.ctx.now();
        if !session.open {
            if session.tallied {
                debug!(proposal_id = %proposal_id, "Stale expiry tick ignored");
                return TickOutcome::Stale;
            }
            return self.tick_close(proposal_id, now).await;
        }
        if now >= session.expires_at {
            return self.tick_close(proposal_id, now).await;
        }

        match self
            .ctx
            .storage
            .get_vote_counts(proposal_id, session.stage)
            .await
        {
            Ok(counts) => {
                let status = VoteStatus {
                    proposal_id: proposal_id.to_string(),
                    stage: session.stage,
                    is_secret: session.is_secret,
                    remaining_ms: session.remaining_ms(now),
                    counts,
                };
                if let Err(e) = self.ctx.presenter.render_vote_status(&status).await {
                    warn!(proposal_id = %proposal_id, "Failed to render vote status: {}", e);
                }
                TickOutcome::Refreshed
            }
            Err(e) => {
                error!(proposal_id = %proposal_id, "Failed to count votes: {}", e);
                TickOutcome::Failed
            }
        }
    }

    async fn tick_close(&self, proposal_id: &str, now: i64) -> TickOutcome {
        match self.close_voting(proposal_id, now).await {
            Ok(Some(_)) => TickOutcome::Closed,
            Ok(None) => TickOutcome::Stale,
            Err(EngineError::NotFound { .. }) => TickOutcome::Missing,
            Err(e) => {
                error!(proposal_id = %proposal_id, "Failed to close voting: {}", e);
                TickOutcome::Failed
            }
        }
    }

    /// Arm (or re-arm) the expiry check of a proposal.
    pub fn arm(&self, proposal_id: &str) {
        let key = TimerKey::Vote(proposal_id.to_string());
        let budget = Arc::new(FailureBudget::new(self.ctx.config.max_tick_failures));
        let machine = self.clone();
        let id = proposal_id.to_string();
        let timer_key = key.clone();

        self.ctx
            .scheduler
            .arm(key, self.ctx.config.vote_tick, move || {
                let machine = machine.clone();
                let id = id.clone();
                let budget = Arc::clone(&budget);
                let key = timer_key.clone();
                async move {
                    let outcome = machine.tick(&id).await;
                    budget.control(&key, outcome)
                }
            });
    }

    /// Write a new open stage, arm its timer, then record and render it.
    ///
    /// The timer is armed as soon as the stage is stored, so a failure in the
    /// later writes still leaves an open stage that will close on expiry.
    async fn open_stage(&self, proposal: &Proposal, params: StageParams) -> Result<VotingSession> {
        let now = self.ctx.now();
        let mut session = VotingSession {
            proposal_id: proposal.id.clone(),
            open: true,
            started_at: now,
            duration_ms: params.duration_ms,
            expires_at: now.saturating_add(params.duration_ms),
            ended_at: None,
            is_secret: params.is_secret,
            formula: params.formula,
            stage: params.stage,
            total_members: params.total_members,
            candidates: params.candidates,
            runoff_message_id: None,
            tallied: false,
        };

        if !self.ctx.storage.upsert_voting_session(&session).await? {
            return Err(EngineError::already_open("VotingSession", &proposal.id));
        }
        self.arm(&proposal.id);

        let is_runoff = session.is_quantitative() && session.stage > 1;
        let (kind, description) = match session.candidates.as_deref() {
            Some(candidates) if is_runoff => (
                EventKind::RunoffScheduled,
                format!(
                    "Runoff stage {} between items {}",
                    session.stage,
                    join_items(candidates)
                ),
            ),
            _ => (
                EventKind::VotingStarted,
                format!("Voting stage {} opened ({})", session.stage, session.formula),
            ),
        };
        self.ctx
            .storage
            .append_event(
                &proposal.id,
                &ProposalEvent::new(kind, proposal.chamber, now, description),
            )
            .await?;
        self.ctx
            .storage
            .set_proposal_status(&proposal.id, ProposalStatus::Voting)
            .await?;

        match self.ctx.presenter.render_ballot(proposal, &session).await {
            Ok(Some(message_id)) if is_runoff => {
                match self
                    .ctx
                    .storage
                    .set_runoff_message(&proposal.id, session.stage, &message_id)
                    .await
                {
                    Ok(true) => session.runoff_message_id = Some(message_id),
                    Ok(false) => {
                        debug!(proposal_id = %proposal.id, "Runoff stage replaced before its message was stored")
                    }
                    Err(e) => {
                        warn!(proposal_id = %proposal.id, "Failed to store runoff message: {}", e)
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(proposal_id = %proposal.id, "Failed to render ballot: {}", e),
        }
        info!(
            proposal_id = %proposal.id,
            stage = session.stage,
            expires_at = session.expires_at,
            "Voting opened"
        );

        Ok(session)
    }

    async fn load_proposal(&self, id: &str) -> Result<Proposal> {
        self.ctx
            .storage
            .get_proposal(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Proposal", id))
    }
}

/// Decide a closed stage from its final counts.
///
/// A rated vote without a winner goes to a runoff among the leading items
/// while `max_stages` allows one; otherwise it ends without a winner.
pub fn decide(session: &VotingSession, counts: &VoteCounts, max_stages: u32) -> VoteOutcome {
    let Some(candidates) = &session.candidates else {
        let result = tally(
            counts.for_count,
            counts.against_count,
            counts.abstain_count,
            session.formula,
            session.total_members,
        );
        return if result.is_passed {
            VoteOutcome::Passed(result)
        } else {
            VoteOutcome::Failed(result)
        };
    };

    let rated = rated_tally(counts, candidates, session.formula, session.total_members);
    if let Some(item_index) = rated.winner {
        return VoteOutcome::Winner {
            item_index,
            results: rated.results,
        };
    }
    if rated.leaders.len() >= 2 && session.stage < max_stages {
        return VoteOutcome::Runoff {
            next_stage: session.stage + 1,
            candidates: rated.leaders,
            results: rated.results,
        };
    }
    VoteOutcome::NoWinner {
        results: rated.results,
    }
}

fn describe(outcome: &VoteOutcome, stage: u32) -> String {
    match outcome {
        VoteOutcome::Passed(t) => format!(
            "Stage {} passed ({} of {} required)",
            stage, t.required_for, t.required_total
        ),
        VoteOutcome::Failed(t) => format!(
            "Stage {} failed ({} required of {})",
            stage, t.required_for, t.required_total
        ),
        VoteOutcome::Winner { item_index, .. } => {
            format!("Stage {} won by item {}", stage, item_index)
        }
        VoteOutcome::Runoff { candidates, .. } => format!(
            "Stage {} without a winner, runoff between items {}",
            stage,
            join_items(candidates)
        ),
        VoteOutcome::NoWinner { .. } => format!("Stage {} ended without a winner", stage),
    }
}

fn join_items(items: &[u32]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
