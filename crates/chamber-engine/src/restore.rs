//! Timer restoration after a restart.

use tracing::info;

use crate::context::EngineContext;
use crate::error::Result;
use crate::meeting::QuorumController;
use crate::voting::VotingMachine;

/// Timers re-armed by [`restore_timers`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub votes: usize,
    pub meetings: usize,
}

/// Re-arm a ticker for every session and meeting that still has work left.
///
/// That is every open one, plus closed sessions whose result was never
/// published and completed meetings whose roles were never handed out.
/// Remaining time comes from the persisted `expires_at`. The first tick of a
/// re-armed timer fires immediately, so anything that expired or was left
/// half-finished while the process was down is completed right away.
pub async fn restore_timers(
    ctx: &EngineContext,
    voting: &VotingMachine,
    meetings: &QuorumController,
) -> Result<RestoreReport> {
    let now = ctx.now();
    let mut report = RestoreReport::default();

    for session in ctx.storage.list_active_voting_sessions().await? {
        info!(
            proposal_id = %session.proposal_id,
            stage = session.stage,
            open = session.open,
            remaining_ms = session.remaining_ms(now),
            "Restoring vote timer"
        );
        voting.arm(&session.proposal_id);
        report.votes += 1;
    }

    for meeting in ctx.storage.list_active_meetings().await? {
        info!(
            meeting_id = %meeting.id,
            open = meeting.open,
            remaining_ms = meeting.remaining_ms(now),
            "Restoring meeting timer"
        );
        meetings.arm(&meeting.id);
        report.meetings += 1;
    }

    info!(
        votes = report.votes,
        meetings = report.meetings,
        "Timer restoration complete"
    );
    Ok(report)
}
