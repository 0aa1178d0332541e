//! Integration tests for chamber-engine.
//!
//! Lifecycles run against the in-memory doubles from `mock-chamber`, driven
//! by a manual clock. Tickers are armed with a one-hour period, so after the
//! immediate first tick the tests decide when expiry checks happen by calling
//! `tick` directly. The restore and scheduler tests use a short period and
//! wait for the spawned tickers instead.
//!
//! Run:
//!   cargo test -p chamber-engine --test integration_tests

use std::sync::Arc;
use std::time::Duration;

use chamber_core::{
    Chamber, EventKind, MeetingStatus, ProposalStatus, Storage, VoteChoice, VoteFormula,
    VoteOutcome,
};
use chamber_engine::{
    ChamberEngine, EngineConfig, EngineError, LateRole, NewMeeting, NewProposal, Registration,
    StartVoting, TickOutcome, TimerKey,
};
use mock_chamber::{ballot_message_id, ManualClock, MemoryStorage, RecordingPresenter, Rendered};

const START: i64 = 1_700_000_000_000;
const HOUR_MS: u64 = 3_600_000;

/// Engine plus handles on its doubles.
struct Harness {
    engine: ChamberEngine,
    storage: Arc<MemoryStorage>,
    presenter: Arc<RecordingPresenter>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with(
            RecordingPresenter::with_chamber_size(10),
            quiet_config(),
            Arc::new(MemoryStorage::new()),
            START,
        )
    }

    fn with(
        presenter: RecordingPresenter,
        config: EngineConfig,
        storage: Arc<MemoryStorage>,
        now: i64,
    ) -> Self {
        let presenter = Arc::new(presenter);
        let clock = Arc::new(ManualClock::new(now));
        let engine = ChamberEngine::new(
            storage.clone(),
            presenter.clone(),
            clock.clone(),
            config,
        );
        Self {
            engine,
            storage,
            presenter,
            clock,
        }
    }

    async fn submit(&self, title: &str) -> String {
        self.engine
            .proposals()
            .submit(NewProposal::new("author", Chamber::Senate, title))
            .await
            .unwrap()
            .id
    }

    async fn submit_rated(&self, items: &[&str]) -> String {
        self.engine
            .proposals()
            .submit(
                NewProposal::new("author", Chamber::Senate, "Pick one")
                    .with_items(items.iter().copied()),
            )
            .await
            .unwrap()
            .id
    }

    async fn vote(&self, proposal_id: &str, users: &[&str], choice: VoteChoice, stage: u32) {
        for user in users {
            self.engine
                .voting()
                .cast_vote(proposal_id, user, choice, stage)
                .await
                .unwrap();
        }
    }

    async fn status(&self, proposal_id: &str) -> ProposalStatus {
        self.storage
            .get_proposal(proposal_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

/// Tickers that never fire on their own after the first tick.
fn quiet_config() -> EngineConfig {
    EngineConfig::default().with_tick(Duration::from_secs(3600))
}

/// Tickers that fire quickly, for tests that wait on the scheduler.
fn fast_config() -> EngineConfig {
    EngineConfig::default().with_tick(Duration::from_millis(10))
}

/// Poll `check` until it holds or two seconds pass.
async fn wait_until(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ============================================================================
// Voting lifecycle
// ============================================================================

mod voting_tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_majority_vote_passes() {
        let h = Harness::new();
        let id = h.submit("Budget").await;

        let session = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        assert!(session.open);
        assert_eq!(session.stage, 1);
        assert_eq!(session.expires_at, START + HOUR_MS as i64);
        assert_eq!(h.status(&id).await, ProposalStatus::Voting);
        assert_eq!(h.presenter.ballots().len(), 1);

        h.vote(&id, &["a", "b", "c", "d", "e"], VoteChoice::For, 1).await;
        h.vote(&id, &["f", "g", "h", "i"], VoteChoice::Against, 1).await;

        let status = h.engine.voting().vote_status(&id).await.unwrap();
        assert_eq!(status.counts.for_count, 5);
        assert_eq!(status.counts.against_count, 4);
        assert_eq!(status.remaining_ms, HOUR_MS as i64);

        h.clock.advance(HOUR_MS as i64);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);

        let results = h.presenter.final_results();
        assert_eq!(results.len(), 1);
        match &results[0].outcome {
            VoteOutcome::Passed(tally) => {
                assert_eq!(tally.required_for, 5);
                assert_eq!(tally.required_total, 9);
            }
            other => panic!("expected a passed vote, got {:?}", other),
        }
        assert_eq!(h.status(&id).await, ProposalStatus::Approved);

        let session = h.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(!session.open);
        assert_eq!(session.ended_at, Some(START + HOUR_MS as i64));
        assert!(!h
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Vote(id.clone())));
    }

    #[tokio::test]
    async fn test_tied_vote_fails() {
        let h = Harness::new();
        let id = h.submit("Tie").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();

        h.vote(&id, &["a", "b", "c", "d"], VoteChoice::For, 1).await;
        h.vote(&id, &["e", "f", "g", "h"], VoteChoice::Against, 1).await;

        let result = h
            .engine
            .voting()
            .close_voting(&id, START + 1)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result.outcome, VoteOutcome::Failed(_)));
        assert_eq!(h.status(&id).await, ProposalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_duplicate_vote_keeps_first_ballot() {
        let h = Harness::new();
        let id = h.submit("Once").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();

        h.vote(&id, &["alice"], VoteChoice::For, 1).await;
        let err = h
            .engine
            .voting()
            .cast_vote(&id, "alice", VoteChoice::Against, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateVote { stage: 1, .. }));

        let votes = h.storage.list_votes(&id, 1).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].choice, VoteChoice::For);
    }

    #[tokio::test]
    async fn test_cast_vote_rejections() {
        let h = Harness::new();
        let id = h.submit("Rules").await;

        let err = h
            .engine
            .voting()
            .cast_vote(&id, "alice", VoteChoice::For, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));

        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, 60_000))
            .await
            .unwrap();

        let err = h
            .engine
            .voting()
            .cast_vote(&id, "alice", VoteChoice::For, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));

        let err = h
            .engine
            .voting()
            .cast_vote(&id, "alice", VoteChoice::Item(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidChoice { .. }));

        // Expired but not yet closed by a tick
        h.clock.advance(60_000);
        let err = h
            .engine
            .voting()
            .cast_vote(&id, "alice", VoteChoice::For, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));
        assert!(h.storage.list_votes(&id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_voting_rejections() {
        let h = Harness::new();
        let id = h.submit("Twice").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();

        let err = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOpen { .. }));

        h.engine
            .voting()
            .close_voting(&id, START + 10)
            .await
            .unwrap();

        let err = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::StageRegression {
                current: 1,
                requested: 1,
                ..
            }
        ));

        let session = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS).with_stage(2))
            .await
            .unwrap();
        assert_eq!(session.stage, 2);

        let err = h
            .engine
            .voting()
            .start_voting(StartVoting::new("missing", HOUR_MS))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = Harness::new();
        let id = h.submit("Close once").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        h.vote(&id, &["a"], VoteChoice::For, 1).await;

        let voting = h.engine.voting();
        let (first, second) = tokio::join!(
            voting.close_voting(&id, START + 5),
            voting.close_voting(&id, START + 6)
        );
        let closed = [first.unwrap(), second.unwrap()]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(closed, 1);
        assert_eq!(h.presenter.final_results().len(), 1);

        // A late expiry check finds nothing to do
        h.clock.advance(HOUR_MS as i64);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Stale);
        assert_eq!(h.presenter.final_results().len(), 1);

        let closed_events = h
            .engine
            .proposals()
            .timeline(&id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EventKind::VotingClosed)
            .count();
        assert_eq!(closed_events, 1);
    }

    #[tokio::test]
    async fn test_tick_refreshes_status_before_expiry() {
        let h = Harness::new();
        let id = h.submit("Live").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS).secret())
            .await
            .unwrap();
        h.vote(&id, &["a", "b"], VoteChoice::Abstain, 1).await;

        h.clock.advance(1_000);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Refreshed);

        let status = h.presenter.vote_statuses().pop().unwrap();
        assert!(status.is_secret);
        assert_eq!(status.counts.abstain_count, 2);
        assert_eq!(status.remaining_ms, HOUR_MS as i64 - 1_000);
        assert!(h.presenter.final_results().is_empty());
    }

    #[tokio::test]
    async fn test_tick_outcomes_for_missing_and_failing_storage() {
        let h = Harness::new();
        assert_eq!(h.engine.voting().tick("ghost").await, TickOutcome::Missing);

        let id = h.submit("Flaky").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();

        h.storage.set_failing(true);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Failed);
        h.storage.set_failing(false);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Refreshed);
    }

    #[tokio::test]
    async fn test_render_failure_does_not_block_close() {
        let h = Harness::new();
        let id = h.submit("Quiet").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        h.vote(&id, &["a"], VoteChoice::For, 1).await;

        h.presenter.fail_rendering(true);
        h.clock.advance(HOUR_MS as i64);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);
        assert_eq!(h.status(&id).await, ProposalStatus::Approved);
    }

    #[tokio::test]
    async fn test_close_resumes_after_storage_failure() {
        let h = Harness::new();
        let id = h.submit("Bridge repair").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        h.vote(&id, &["a", "b"], VoteChoice::For, 1).await;

        h.clock.advance(HOUR_MS as i64);
        h.storage.fail_once("get_vote_counts");
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Failed);

        let closed = h.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(!closed.open);
        assert!(!closed.tallied);
        assert!(h.presenter.final_results().is_empty());
        assert!(h
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Vote(id.clone())));

        let err = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS).with_stage(2))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOpen { .. }));

        h.clock.advance(1_000);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);
        assert_eq!(h.status(&id).await, ProposalStatus::Approved);

        let results = h.presenter.final_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].counts.for_count, 2);
        assert_eq!(results[0].ended_at, START + HOUR_MS as i64);

        let tallied = h.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(tallied.tallied);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Stale);
        assert!(!h
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Vote(id.clone())));
    }

    #[tokio::test]
    async fn test_timer_armed_when_later_writes_fail() {
        let h = Harness::new();
        let id = h.submit("Harbour fees").await;

        h.storage.fail_once("append_event");
        let err = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));

        let session = h.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(session.open);
        assert!(h
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Vote(id.clone())));

        h.vote(&id, &["a"], VoteChoice::For, 1).await;
        h.clock.advance(HOUR_MS as i64);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);
        assert_eq!(h.status(&id).await, ProposalStatus::Approved);
    }

    #[tokio::test]
    async fn test_vote_after_close_is_refused() {
        let h = Harness::new();
        let id = h.submit("Night market").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        h.vote(&id, &["a"], VoteChoice::For, 1).await;

        assert!(h.storage.close_voting_session(&id, START + 1).await.unwrap());
        let err = h
            .engine
            .voting()
            .cast_vote(&id, "b", VoteChoice::Against, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));
        assert_eq!(h.storage.list_votes(&id, 1).await.unwrap().len(), 1);

        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);
        let result = h.presenter.final_results().remove(0);
        assert_eq!(result.counts.for_count, 1);
        assert_eq!(result.counts.against_count, 0);
        assert_eq!(result.ended_at, START + 1);
    }

    #[tokio::test]
    async fn test_absolute_majority_uses_chamber_size() {
        let h = Harness::new();
        let id = h.submit("Constitution").await;
        let session = h
            .engine
            .voting()
            .start_voting(
                StartVoting::new(&id, HOUR_MS).with_formula(VoteFormula::AbsoluteMajority),
            )
            .await
            .unwrap();
        assert_eq!(session.total_members, 10);

        h.vote(&id, &["a", "b", "c", "d"], VoteChoice::For, 1).await;
        let result = h
            .engine
            .voting()
            .close_voting(&id, START + 1)
            .await
            .unwrap()
            .unwrap();
        match result.outcome {
            VoteOutcome::Failed(tally) => {
                assert_eq!(tally.required_for, 5);
                assert_eq!(tally.required_total, 10);
            }
            other => panic!("expected a failed vote, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chamber_size_falls_back_to_default() {
        let h = Harness::with(
            RecordingPresenter::new(),
            quiet_config(),
            Arc::new(MemoryStorage::new()),
            START,
        );
        let id = h.submit("Default size").await;
        let session = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        assert_eq!(
            session.total_members,
            EngineConfig::default().default_chamber_size
        );
    }
}

// ============================================================================
// Rated votes and runoffs
// ============================================================================

mod runoff_tests {
    use super::*;

    #[tokio::test]
    async fn test_runoff_between_leaders_then_winner() {
        let h = Harness::new();
        let id = h.submit_rated(&["North", "South", "East"]).await;

        let session = h
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        assert_eq!(session.candidates, Some(vec![1, 2, 3]));

        h.vote(&id, &["a", "b", "c"], VoteChoice::Item(1), 1).await;
        h.vote(&id, &["d", "e", "f"], VoteChoice::Item(2), 1).await;
        h.vote(&id, &["g"], VoteChoice::Item(3), 1).await;

        let err = h
            .engine
            .voting()
            .cast_vote(&id, "h", VoteChoice::For, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidChoice { .. }));

        h.clock.advance(HOUR_MS as i64);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);

        let first = h.presenter.final_results().remove(0);
        assert!(matches!(
            first.outcome,
            VoteOutcome::Runoff { next_stage: 2, ref candidates, .. } if *candidates == vec![1, 2]
        ));
        assert_eq!(h.status(&id).await, ProposalStatus::Voting);

        let runoff = h.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(runoff.open);
        assert_eq!(runoff.stage, 2);
        assert_eq!(runoff.candidates, Some(vec![1, 2]));
        assert_eq!(runoff.expires_at, START + 2 * HOUR_MS as i64);
        assert_eq!(runoff.runoff_message_id, Some(ballot_message_id(&id, 2)));
        assert_eq!(h.presenter.ballots().len(), 2);

        // Stage 1 ballots stay as history
        assert_eq!(h.storage.list_votes(&id, 1).await.unwrap().len(), 7);

        let err = h
            .engine
            .voting()
            .cast_vote(&id, "a", VoteChoice::Item(3), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidChoice { .. }));

        // Voting in stage 1 does not block voting again in stage 2
        h.vote(&id, &["a", "b"], VoteChoice::Item(1), 2).await;
        h.vote(&id, &["d"], VoteChoice::Item(2), 2).await;

        h.clock.advance(HOUR_MS as i64);
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Closed);

        let second = h.presenter.final_results().remove(1);
        assert_eq!(second.stage, 2);
        assert!(matches!(
            second.outcome,
            VoteOutcome::Winner { item_index: 1, .. }
        ));
        assert_eq!(h.status(&id).await, ProposalStatus::Approved);

        let kinds: Vec<EventKind> = h
            .engine
            .proposals()
            .timeline(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Submitted,
                EventKind::VotingStarted,
                EventKind::VotingClosed,
                EventKind::RunoffScheduled,
                EventKind::VotingClosed,
            ]
        );
    }

    #[tokio::test]
    async fn test_runoff_stops_at_stage_limit() {
        let config = EngineConfig {
            max_vote_stages: 1,
            ..quiet_config()
        };
        let h = Harness::with(
            RecordingPresenter::with_chamber_size(10),
            config,
            Arc::new(MemoryStorage::new()),
            START,
        );
        let id = h.submit_rated(&["Red", "Blue"]).await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();

        h.vote(&id, &["a", "b"], VoteChoice::Item(1), 1).await;
        h.vote(&id, &["c", "d"], VoteChoice::Item(2), 1).await;

        let result = h
            .engine
            .voting()
            .close_voting(&id, START + 1)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result.outcome, VoteOutcome::NoWinner { .. }));
        assert_eq!(h.status(&id).await, ProposalStatus::Rejected);

        let session = h.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(!session.open);
        assert_eq!(session.stage, 1);
    }

    #[tokio::test]
    async fn test_rated_vote_with_clear_winner() {
        let h = Harness::new();
        let id = h.submit_rated(&["Keep", "Change"]).await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();

        h.vote(&id, &["a", "b", "c"], VoteChoice::Item(2), 1).await;
        h.vote(&id, &["d"], VoteChoice::Item(1), 1).await;

        let result = h
            .engine
            .voting()
            .close_voting(&id, START + 1)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result.outcome,
            VoteOutcome::Winner { item_index: 2, .. }
        ));
        assert!(h
            .storage
            .get_voting_session(&id)
            .await
            .unwrap()
            .is_some_and(|s| !s.open && s.stage == 1));
    }
}

// ============================================================================
// Meetings and quorum
// ============================================================================

mod meeting_tests {
    use super::*;

    fn new_meeting() -> NewMeeting {
        NewMeeting {
            chamber: Chamber::Assembly,
            title: "Weekly session".to_string(),
            meeting_date: "Friday 18:00".to_string(),
            channel_id: Some("chan-1".to_string()),
            thread_id: None,
        }
    }

    #[tokio::test]
    async fn test_quorum_met_grants_roles() {
        let h = Harness::new();
        let meetings = h.engine.meetings();
        let meeting = meetings.create_meeting(new_meeting()).await.unwrap();
        assert_eq!(meeting.status, MeetingStatus::Planned);

        let err = meetings.register(&meeting.id, "early").await.unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));

        let opened = meetings
            .open_registration(&meeting.id, 60_000, 2, 10)
            .await
            .unwrap();
        assert!(opened.open);
        assert_eq!(opened.status, MeetingStatus::RegistrationOpen);
        assert_eq!(opened.expires_at, Some(START + 60_000));

        let err = meetings
            .open_registration(&meeting.id, 60_000, 2, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOpen { .. }));

        assert_eq!(
            meetings.register(&meeting.id, "u1").await.unwrap(),
            Registration::Registered
        );
        assert_eq!(
            meetings.register(&meeting.id, "u1").await.unwrap(),
            Registration::AlreadyRegistered
        );
        meetings.register(&meeting.id, "u2").await.unwrap();
        meetings.register(&meeting.id, "u3").await.unwrap();

        h.presenter.give_role(Chamber::Assembly, "u3");
        h.presenter.fail_for("u2");

        h.clock.advance(60_000);
        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Closed);

        let reports = h.presenter.meeting_results();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.registered, 3);
        assert!(report.quorum_met);
        assert_eq!(report.granted, 1);
        assert_eq!(report.already_had, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user_id, "u2");
        assert!(report.is_partial());
        assert!(h.presenter.holds_role(Chamber::Assembly, "u1"));

        let stored = h.storage.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert!(!stored.open);
        assert_eq!(stored.status, MeetingStatus::Completed);
        assert_eq!(stored.quorum_met, Some(true));

        // Finalizing again grants nothing
        assert!(meetings.finalize(&meeting.id).await.unwrap().is_none());
        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Stale);
        let grants = h
            .presenter
            .log()
            .iter()
            .filter(|r| matches!(r, Rendered::RoleGranted { .. }))
            .count();
        assert_eq!(grants, 1);
        assert_eq!(h.presenter.meeting_results().len(), 1);

        let err = meetings.register(&meeting.id, "u4").await.unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));
    }

    #[tokio::test]
    async fn test_quorum_not_met_grants_nothing() {
        let h = Harness::new();
        let meetings = h.engine.meetings();
        let meeting = meetings.create_meeting(new_meeting()).await.unwrap();
        meetings
            .open_registration(&meeting.id, 60_000, 3, 10)
            .await
            .unwrap();
        meetings.register(&meeting.id, "u1").await.unwrap();

        h.clock.advance(60_000);
        let report = meetings.finalize(&meeting.id).await.unwrap().unwrap();
        assert!(!report.quorum_met);
        assert_eq!(report.granted, 0);
        assert!(!h.presenter.holds_role(Chamber::Assembly, "u1"));

        let late = meetings.late_register(&meeting.id, "u2").await.unwrap();
        assert!(late.newly_registered);
        assert_eq!(late.role, LateRole::QuorumNotMet);
        assert!(!h.presenter.holds_role(Chamber::Assembly, "u2"));
    }

    #[tokio::test]
    async fn test_registration_closes_at_expiry_before_tick() {
        let h = Harness::new();
        let meetings = h.engine.meetings();
        let meeting = meetings.create_meeting(new_meeting()).await.unwrap();
        meetings
            .open_registration(&meeting.id, 60_000, 1, 10)
            .await
            .unwrap();

        h.clock.advance(59_999);
        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Refreshed);
        meetings.register(&meeting.id, "u1").await.unwrap();

        h.clock.advance(1);
        let err = meetings.register(&meeting.id, "u2").await.unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));
        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Closed);
        assert_eq!(h.presenter.meeting_results()[0].registered, 1);
    }

    #[tokio::test]
    async fn test_late_registration_and_role_clearing() {
        let h = Harness::new();
        let meetings = h.engine.meetings();
        let meeting = meetings.create_meeting(new_meeting()).await.unwrap();

        let err = meetings.late_register(&meeting.id, "u9").await.unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));

        meetings
            .open_registration(&meeting.id, 60_000, 1, 10)
            .await
            .unwrap();
        meetings.register(&meeting.id, "u1").await.unwrap();

        let err = meetings.late_register(&meeting.id, "u2").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOpen { .. }));
        let err = meetings.clear_voter_roles(&meeting.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOpen { .. }));

        h.clock.advance(60_000);
        meetings.finalize(&meeting.id).await.unwrap().unwrap();

        let late = meetings.late_register(&meeting.id, "u2").await.unwrap();
        assert!(late.newly_registered);
        assert_eq!(late.role, LateRole::Granted);

        let again = meetings.late_register(&meeting.id, "u2").await.unwrap();
        assert!(!again.newly_registered);
        assert_eq!(again.role, LateRole::AlreadyHeld);

        h.presenter.fail_for("u3");
        let failed = meetings.late_register(&meeting.id, "u3").await.unwrap();
        assert!(matches!(failed.role, LateRole::Failed(_)));

        let cleared = meetings.clear_voter_roles(&meeting.id).await.unwrap();
        assert_eq!(cleared.revoked, 2);
        assert_eq!(cleared.failures.len(), 1);
        assert!(!h.presenter.holds_role(Chamber::Assembly, "u1"));
        assert!(!h.presenter.holds_role(Chamber::Assembly, "u2"));
    }

    #[tokio::test]
    async fn test_finalize_resumes_after_storage_failure() {
        let h = Harness::new();
        let meetings = h.engine.meetings();
        let meeting = meetings.create_meeting(new_meeting()).await.unwrap();
        meetings
            .open_registration(&meeting.id, 60_000, 1, 10)
            .await
            .unwrap();
        meetings.register(&meeting.id, "u1").await.unwrap();

        h.clock.advance(60_000);
        h.storage.fail_once("get_registrations");
        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Failed);

        let completed = h.storage.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert!(!completed.open);
        assert_eq!(completed.status, MeetingStatus::Completed);
        assert_eq!(completed.quorum_met, Some(true));
        assert!(!completed.finalized);
        assert!(!h.presenter.holds_role(Chamber::Assembly, "u1"));

        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Closed);
        assert!(h.presenter.holds_role(Chamber::Assembly, "u1"));
        let reports = h.presenter.meeting_results();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].quorum_met);
        assert_eq!(reports[0].granted, 1);

        let finalized = h.storage.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert!(finalized.finalized);
        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Stale);
        assert!(!h
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Meeting(meeting.id.clone())));

        let late = meetings.late_register(&meeting.id, "u2").await.unwrap();
        assert_eq!(late.role, LateRole::Granted);
    }

    #[tokio::test]
    async fn test_registration_after_close_is_refused() {
        let h = Harness::new();
        let meetings = h.engine.meetings();
        let meeting = meetings.create_meeting(new_meeting()).await.unwrap();
        meetings
            .open_registration(&meeting.id, 60_000, 2, 10)
            .await
            .unwrap();
        meetings.register(&meeting.id, "u1").await.unwrap();

        assert_eq!(
            h.storage.complete_meeting(&meeting.id).await.unwrap(),
            Some(false)
        );
        let err = meetings.register(&meeting.id, "u2").await.unwrap_err();
        assert!(matches!(err, EngineError::NotOpen { .. }));
        assert_eq!(
            h.storage.get_registration_count(&meeting.id).await.unwrap(),
            1
        );

        assert_eq!(meetings.tick(&meeting.id).await, TickOutcome::Closed);
        let report = h.presenter.meeting_results().remove(0);
        assert_eq!(report.registered, 1);
        assert!(!report.quorum_met);
        assert_eq!(report.granted, 0);
    }

    #[tokio::test]
    async fn test_cancel_meeting() {
        let h = Harness::new();
        let meetings = h.engine.meetings();

        let planned = meetings.create_meeting(new_meeting()).await.unwrap();
        meetings.cancel_meeting(&planned.id).await.unwrap();
        let err = meetings.cancel_meeting(&planned.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Finalized(_)));
        let err = meetings
            .open_registration(&planned.id, 60_000, 1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Finalized(_)));

        let open = meetings.create_meeting(new_meeting()).await.unwrap();
        meetings
            .open_registration(&open.id, 60_000, 1, 10)
            .await
            .unwrap();
        meetings.register(&open.id, "u1").await.unwrap();
        meetings.cancel_meeting(&open.id).await.unwrap();

        let stored = h.storage.get_meeting(&open.id).await.unwrap().unwrap();
        assert!(!stored.open);
        assert_eq!(stored.status, MeetingStatus::Cancelled);
        assert!(!h
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Meeting(open.id.clone())));

        h.clock.advance(60_000);
        assert_eq!(meetings.tick(&open.id).await, TickOutcome::Stale);
        assert!(h.presenter.meeting_results().is_empty());
        assert!(!h.presenter.holds_role(Chamber::Assembly, "u1"));
    }

    #[tokio::test]
    async fn test_meeting_tick_missing() {
        let h = Harness::new();
        assert_eq!(
            h.engine.meetings().tick("ghost").await,
            TickOutcome::Missing
        );
        let err = h.engine.meetings().finalize("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}

// ============================================================================
// Proposal registry
// ============================================================================

mod proposal_tests {
    use super::*;

    #[tokio::test]
    async fn test_numbers_follow_chamber_counter() {
        let h = Harness::new();
        h.storage.set_counter(Chamber::Senate, 41);

        let first = h
            .engine
            .proposals()
            .submit(NewProposal::new("alice", Chamber::Senate, "  Roads  "))
            .await
            .unwrap();
        let second = h
            .engine
            .proposals()
            .submit(NewProposal::new("alice", Chamber::Senate, "Rails"))
            .await
            .unwrap();
        let other = h
            .engine
            .proposals()
            .submit(NewProposal::new("bob", Chamber::Assembly, "Ports"))
            .await
            .unwrap();

        assert_eq!(first.number, "SN-42");
        assert_eq!(first.title, "Roads");
        assert_eq!(first.status, ProposalStatus::UnderReview);
        assert_eq!(second.number, "SN-43");
        assert_eq!(other.number, "AS-1");
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let h = Harness::new();
        let proposals = h.engine.proposals();

        let err = proposals
            .submit(NewProposal::new("alice", Chamber::Court, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidProposal(_)));

        let err = proposals
            .submit(NewProposal::new("alice", Chamber::Court, "One").with_items(["only"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidProposal(_)));

        let err = proposals
            .submit(NewProposal::new("alice", Chamber::Court, "Again").resubmission_of("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rated_items_and_resubmission() {
        let h = Harness::new();
        let parent = h.submit_rated(&["A", "B", "C"]).await;

        let items = h.engine.proposals().items(&parent).await.unwrap();
        let indexes: Vec<u32> = items.iter().map(|i| i.item_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(items[2].text, "C");

        let child = h
            .engine
            .proposals()
            .submit(
                NewProposal::new("author", Chamber::Senate, "Pick one, again")
                    .resubmission_of(&parent),
            )
            .await
            .unwrap();
        assert_eq!(child.parent_proposal_id.as_deref(), Some(parent.as_str()));
        assert!(!child.is_quantitative);
    }

    #[tokio::test]
    async fn test_set_status_records_event() {
        let h = Harness::new();
        let id = h.submit("Review me").await;

        let updated = h
            .engine
            .proposals()
            .set_status(&id, ProposalStatus::GovernmentReview, "sent to cabinet")
            .await
            .unwrap();
        assert_eq!(updated.status, ProposalStatus::GovernmentReview);

        let timeline = h.engine.proposals().timeline(&id).await.unwrap();
        let last = timeline.last().unwrap();
        assert_eq!(last.kind, EventKind::StatusChanged);
        assert_eq!(
            last.description,
            "under_review -> government_review: sent to cabinet"
        );
    }

    #[tokio::test]
    async fn test_withdraw_rules() {
        let h = Harness::new();
        let id = h.submit("Withdraw me").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, HOUR_MS))
            .await
            .unwrap();
        h.vote(&id, &["a"], VoteChoice::For, 1).await;

        let err = h
            .engine
            .proposals()
            .withdraw(&id, "intruder")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAuthor { .. }));

        let err = h
            .engine
            .proposals()
            .withdraw(&id, "author")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOpen { .. }));

        h.engine
            .voting()
            .close_voting(&id, START + 1)
            .await
            .unwrap();
        h.engine.proposals().withdraw(&id, "author").await.unwrap();

        let err = h.engine.proposals().get(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert!(h.storage.get_voting_session(&id).await.unwrap().is_none());
        assert!(h.storage.list_votes(&id, 1).await.unwrap().is_empty());
        assert_eq!(h.engine.voting().tick(&id).await, TickOutcome::Missing);
    }
}

// ============================================================================
// Scheduler-driven expiry and restart recovery
// ============================================================================

mod restore_tests {
    use super::*;

    #[tokio::test]
    async fn test_armed_timer_closes_expired_vote() {
        let h = Harness::with(
            RecordingPresenter::with_chamber_size(10),
            fast_config(),
            Arc::new(MemoryStorage::new()),
            START,
        );
        let id = h.submit("Timed").await;
        h.engine
            .voting()
            .start_voting(StartVoting::new(&id, 60_000))
            .await
            .unwrap();
        h.vote(&id, &["a"], VoteChoice::For, 1).await;

        assert!(wait_until(|| !h.presenter.vote_statuses().is_empty()).await);
        assert!(h.presenter.final_results().is_empty());

        h.clock.advance(60_000);
        assert!(wait_until(|| h.presenter.final_results().len() == 1).await);

        let key = TimerKey::Vote(id.clone());
        assert!(wait_until(|| !h.engine.context().scheduler.is_armed(&key)).await);
        assert_eq!(h.status(&id).await, ProposalStatus::Approved);
        h.engine.shutdown();
    }

    #[tokio::test]
    async fn test_restart_restores_and_finalizes_expired_work() {
        let storage = Arc::new(MemoryStorage::new());
        let before = Harness::with(
            RecordingPresenter::with_chamber_size(10),
            quiet_config(),
            storage.clone(),
            START,
        );

        let expired = before.submit("Expired while down").await;
        before
            .engine
            .voting()
            .start_voting(StartVoting::new(&expired, 60_000))
            .await
            .unwrap();
        before.vote(&expired, &["a", "b"], VoteChoice::For, 1).await;

        let running = before.submit("Still running").await;
        before
            .engine
            .voting()
            .start_voting(StartVoting::new(&running, 10 * HOUR_MS))
            .await
            .unwrap();

        let meeting = before
            .engine
            .meetings()
            .create_meeting(NewMeeting {
                chamber: Chamber::Council,
                title: "Council".to_string(),
                meeting_date: "Monday".to_string(),
                channel_id: None,
                thread_id: None,
            })
            .await
            .unwrap();
        before
            .engine
            .meetings()
            .open_registration(&meeting.id, 60_000, 2, 5)
            .await
            .unwrap();
        before.engine.meetings().register(&meeting.id, "u1").await.unwrap();
        before.engine.meetings().register(&meeting.id, "u2").await.unwrap();
        before.engine.shutdown();

        let after = Harness::with(
            RecordingPresenter::with_chamber_size(10),
            quiet_config(),
            storage,
            START + 2 * 60_000,
        );
        let report = after.engine.restore().await.unwrap();
        assert_eq!(report.votes, 2);
        assert_eq!(report.meetings, 1);

        assert!(wait_until(|| after.presenter.final_results().len() == 1).await);
        assert!(wait_until(|| after.presenter.meeting_results().len() == 1).await);

        let result = &after.presenter.final_results()[0];
        assert_eq!(result.proposal_id, expired);
        assert!(result.outcome.is_adopted());
        assert_eq!(after.status(&expired).await, ProposalStatus::Approved);

        let report = &after.presenter.meeting_results()[0];
        assert!(report.quorum_met);
        assert_eq!(report.granted, 2);
        assert!(after.presenter.holds_role(Chamber::Council, "u1"));

        let still_open = after
            .storage
            .get_voting_session(&running)
            .await
            .unwrap()
            .unwrap();
        assert!(still_open.open);
        assert!(after
            .engine
            .context()
            .scheduler
            .is_armed(&TimerKey::Vote(running.clone())));
        after.engine.shutdown();
    }

    #[tokio::test]
    async fn test_restore_publishes_closed_but_untallied_vote() {
        let storage = Arc::new(MemoryStorage::new());
        let before = Harness::with(
            RecordingPresenter::with_chamber_size(10),
            quiet_config(),
            storage.clone(),
            START,
        );
        let id = before.submit("Interrupted").await;
        before
            .engine
            .voting()
            .start_voting(StartVoting::new(&id, 60_000))
            .await
            .unwrap();
        before.vote(&id, &["a", "b"], VoteChoice::Against, 1).await;

        before.clock.advance(60_000);
        before.storage.fail_once("set_proposal_status");
        assert_eq!(before.engine.voting().tick(&id).await, TickOutcome::Failed);
        before.engine.shutdown();

        let after = Harness::with(
            RecordingPresenter::with_chamber_size(10),
            quiet_config(),
            storage,
            START + 5 * 60_000,
        );
        let report = after.engine.restore().await.unwrap();
        assert_eq!(report.votes, 1);

        assert!(wait_until(|| after.presenter.final_results().len() == 1).await);
        let result = &after.presenter.final_results()[0];
        assert_eq!(result.counts.against_count, 2);
        assert_eq!(result.ended_at, START + 60_000);
        assert_eq!(after.status(&id).await, ProposalStatus::Rejected);
        let session = after.storage.get_voting_session(&id).await.unwrap().unwrap();
        assert!(session.tallied);
        after.engine.shutdown();
    }

    #[tokio::test]
    async fn test_restore_with_nothing_open() {
        let h = Harness::new();
        let report = h.engine.restore().await.unwrap();
        assert_eq!(report.votes, 0);
        assert_eq!(report.meetings, 0);
        assert_eq!(h.engine.context().scheduler.armed_count(), 0);
    }
}

// ============================================================================
// SQLite-backed storage
// ============================================================================

mod sqlite_tests {
    use super::*;
    use chamber_engine::SqliteStorage;
    use database::Database;

    #[tokio::test]
    async fn test_vote_lifecycle_on_sqlite() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        let presenter = Arc::new(RecordingPresenter::with_chamber_size(10));
        let clock = Arc::new(ManualClock::new(START));
        let engine = ChamberEngine::new(
            Arc::new(SqliteStorage::new(db)),
            presenter.clone(),
            clock.clone(),
            quiet_config(),
        );

        let proposal = engine
            .proposals()
            .submit(NewProposal::new("alice", Chamber::Government, "Tax code"))
            .await
            .unwrap();
        assert_eq!(proposal.number, "GV-1");

        engine
            .voting()
            .start_voting(StartVoting::new(&proposal.id, 60_000).secret())
            .await
            .unwrap();
        for user in ["a", "b", "c"] {
            engine
                .voting()
                .cast_vote(&proposal.id, user, VoteChoice::For, 1)
                .await
                .unwrap();
        }
        engine
            .voting()
            .cast_vote(&proposal.id, "d", VoteChoice::Against, 1)
            .await
            .unwrap();

        let err = engine
            .voting()
            .cast_vote(&proposal.id, "a", VoteChoice::Against, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateVote { .. }));

        clock.advance(60_000);
        assert_eq!(
            engine.voting().tick(&proposal.id).await,
            TickOutcome::Closed
        );

        let stored = engine.proposals().get(&proposal.id).await.unwrap();
        assert_eq!(stored.status, ProposalStatus::Approved);
        let result = presenter.final_results().remove(0);
        assert_eq!(result.counts.for_count, 3);
        assert_eq!(result.counts.against_count, 1);

        engine.proposals().withdraw(&proposal.id, "alice").await.unwrap();
        assert!(engine
            .context()
            .storage
            .list_votes(&proposal.id, 1)
            .await
            .unwrap()
            .is_empty());
        engine.shutdown();
    }
}
