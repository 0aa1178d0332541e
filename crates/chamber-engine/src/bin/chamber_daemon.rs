use std::sync::Arc;

use chamber_core::{
    async_trait, Chamber, FinalResult, Meeting, Presenter, PresenterError, Proposal, QuorumReport,
    RoleGrant, SystemClock, VoteStatus, VotingSession,
};
use chamber_engine::{ChamberEngine, DaemonConfig, EngineConfig, SqliteStorage};
use database::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Presenter that only writes what would be shown to the log.
///
/// The chat platform is attached by the bot front end; the daemon on its own
/// keeps timers running and reports results through tracing.
struct TracingPresenter;

#[async_trait]
impl Presenter for TracingPresenter {
    async fn render_ballot(
        &self,
        proposal: &Proposal,
        session: &VotingSession,
    ) -> Result<Option<String>, PresenterError> {
        info!(
            proposal_id = %proposal.id,
            number = %proposal.number,
            stage = session.stage,
            candidates = ?session.candidates,
            "Ballot opened"
        );
        Ok(None)
    }

    async fn render_vote_status(&self, status: &VoteStatus) -> Result<(), PresenterError> {
        info!(
            proposal_id = %status.proposal_id,
            stage = status.stage,
            remaining_ms = status.remaining_ms,
            votes = status.counts.total(),
            "Vote status"
        );
        Ok(())
    }

    async fn render_final_result(&self, result: &FinalResult) -> Result<(), PresenterError> {
        info!(
            proposal_id = %result.proposal_id,
            stage = result.stage,
            outcome = ?result.outcome,
            "Final result"
        );
        Ok(())
    }

    async fn render_meeting_status(
        &self,
        meeting: &Meeting,
        time_left_ms: i64,
        registered: u32,
    ) -> Result<(), PresenterError> {
        info!(
            meeting_id = %meeting.id,
            time_left_ms,
            registered,
            quorum = meeting.quorum,
            "Meeting status"
        );
        Ok(())
    }

    async fn render_meeting_result(&self, report: &QuorumReport) -> Result<(), PresenterError> {
        info!(
            meeting_id = %report.meeting_id,
            registered = report.registered,
            quorum_met = report.quorum_met,
            granted = report.granted,
            failed = report.failures.len(),
            "Meeting result"
        );
        Ok(())
    }

    async fn grant_voter_role(
        &self,
        _chamber: Chamber,
        _user_id: &str,
    ) -> Result<RoleGrant, PresenterError> {
        Err(PresenterError::Unsupported("grant_voter_role"))
    }

    async fn revoke_voter_role(
        &self,
        _chamber: Chamber,
        _user_id: &str,
    ) -> Result<(), PresenterError> {
        Err(PresenterError::Unsupported("revoke_voter_role"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let daemon_config = DaemonConfig::from_env();
    let engine_config = EngineConfig::from_env();
    info!(
        sqlite_url = %daemon_config.sqlite_url,
        vote_tick = ?engine_config.vote_tick,
        meeting_tick = ?engine_config.meeting_tick,
        "Starting chamber daemon"
    );

    let db = Database::connect_with_pool_size(&daemon_config.sqlite_url, daemon_config.pool_size)
        .await?;
    db.migrate().await?;

    let engine = ChamberEngine::new(
        Arc::new(SqliteStorage::new(db.clone())),
        Arc::new(TracingPresenter),
        Arc::new(SystemClock),
        engine_config,
    );
    let restored = engine.restore().await?;
    info!(
        votes = restored.votes,
        meetings = restored.meetings,
        "Chamber daemon ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    engine.shutdown();
    db.close().await;

    Ok(())
}
