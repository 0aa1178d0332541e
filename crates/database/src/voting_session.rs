//! Voting session operations.

use sqlx::SqlitePool;

use crate::models::VotingSessionRow;
use crate::Result;

const SESSION_COLUMNS: &str = "proposal_id, open, started_at, duration_ms, expires_at, ended_at, \
     is_secret, formula, stage, total_members, candidates, runoff_message_id, tallied";

/// Insert or replace a proposal's session, unless an open one exists.
///
/// Returns true if the row was written. The `WHERE` on the conflict branch
/// makes "already open" a storage-level check rather than a read-then-write.
pub async fn upsert_if_closed(pool: &SqlitePool, session: &VotingSessionRow) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO voting_sessions (proposal_id, open, started_at, duration_ms, expires_at,
                                     ended_at, is_secret, formula, stage, total_members,
                                     candidates, runoff_message_id, tallied)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(proposal_id) DO UPDATE SET
            open = excluded.open,
            started_at = excluded.started_at,
            duration_ms = excluded.duration_ms,
            expires_at = excluded.expires_at,
            ended_at = excluded.ended_at,
            is_secret = excluded.is_secret,
            formula = excluded.formula,
            stage = excluded.stage,
            total_members = excluded.total_members,
            candidates = excluded.candidates,
            runoff_message_id = excluded.runoff_message_id,
            tallied = excluded.tallied
        WHERE voting_sessions.open = 0
        "#,
    )
    .bind(&session.proposal_id)
    .bind(session.open)
    .bind(session.started_at)
    .bind(session.duration_ms)
    .bind(session.expires_at)
    .bind(session.ended_at)
    .bind(session.is_secret)
    .bind(&session.formula)
    .bind(session.stage)
    .bind(session.total_members)
    .bind(&session.candidates)
    .bind(&session.runoff_message_id)
    .bind(session.tallied)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Get the session of a proposal.
pub async fn get_session(pool: &SqlitePool, proposal_id: &str) -> Result<Option<VotingSessionRow>> {
    let query = format!(
        "SELECT {} FROM voting_sessions WHERE proposal_id = ?",
        SESSION_COLUMNS
    );
    let row = sqlx::query_as::<_, VotingSessionRow>(&query)
        .bind(proposal_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Close an open session.
///
/// Returns true only for the call that performed the transition.
pub async fn close_session(pool: &SqlitePool, proposal_id: &str, ended_at: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE voting_sessions
        SET open = 0, ended_at = ?
        WHERE proposal_id = ? AND open = 1
        "#,
    )
    .bind(ended_at)
    .bind(proposal_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a closed stage as tallied.
///
/// Returns true only for the call that performed the transition, and only
/// while the row still holds `stage`.
pub async fn mark_tallied(pool: &SqlitePool, proposal_id: &str, stage: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE voting_sessions
        SET tallied = 1
        WHERE proposal_id = ? AND stage = ? AND tallied = 0
        "#,
    )
    .bind(proposal_id)
    .bind(stage)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Store the ballot message id of a stage.
pub async fn set_runoff_message(
    pool: &SqlitePool,
    proposal_id: &str,
    stage: i64,
    message_id: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE voting_sessions
        SET runoff_message_id = ?
        WHERE proposal_id = ? AND stage = ?
        "#,
    )
    .bind(message_id)
    .bind(proposal_id)
    .bind(stage)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List sessions that are open or closed without a published result,
/// soonest expiry first.
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<VotingSessionRow>> {
    let query = format!(
        "SELECT {} FROM voting_sessions WHERE open = 1 OR tallied = 0 ORDER BY expires_at",
        SESSION_COLUMNS
    );
    let rows = sqlx::query_as::<_, VotingSessionRow>(&query)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[cfg(test)]
pub(crate) fn sample_session(proposal_id: &str) -> VotingSessionRow {
    VotingSessionRow {
        proposal_id: proposal_id.to_string(),
        open: true,
        started_at: 1_000,
        duration_ms: 60_000,
        expires_at: 61_000,
        ended_at: None,
        is_secret: false,
        formula: "simple".to_string(),
        stage: 1,
        total_members: 56,
        candidates: None,
        runoff_message_id: None,
        tallied: false,
    }
}
