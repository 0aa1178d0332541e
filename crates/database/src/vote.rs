//! Ballot operations.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::VoteRow;

/// Insert a ballot while its stage is open.
///
/// Returns false, writing nothing, if the session is closed or holds another
/// stage. Fails with [`DatabaseError::AlreadyExists`] when the user already
/// voted in this stage; the existing ballot is left untouched.
pub async fn insert_vote(pool: &SqlitePool, vote: &VoteRow) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO votes (proposal_id, user_id, stage, vote_type, cast_at)
        SELECT ?, ?, ?, ?, ?
        WHERE EXISTS (
            SELECT 1 FROM voting_sessions
            WHERE proposal_id = ? AND stage = ? AND open = 1
        )
        "#,
    )
    .bind(&vote.proposal_id)
    .bind(&vote.user_id)
    .bind(vote.stage)
    .bind(&vote.vote_type)
    .bind(vote.cast_at)
    .bind(&vote.proposal_id)
    .bind(vote.stage)
    .execute(pool)
    .await
    .map_err(|e| {
        let id = format!("{}/{}/{}", vote.proposal_id, vote.user_id, vote.stage);
        DatabaseError::from_insert(e, "Vote", id)
    })?;

    Ok(result.rows_affected() > 0)
}

/// Count ballots per vote type for one stage.
pub async fn count_by_type(
    pool: &SqlitePool,
    proposal_id: &str,
    stage: i64,
) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT vote_type, COUNT(*) as count
        FROM votes
        WHERE proposal_id = ? AND stage = ?
        GROUP BY vote_type
        ORDER BY vote_type
        "#,
    )
    .bind(proposal_id)
    .bind(stage)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// List the ballots of one stage in casting order.
pub async fn list_votes(pool: &SqlitePool, proposal_id: &str, stage: i64) -> Result<Vec<VoteRow>> {
    let rows = sqlx::query_as::<_, VoteRow>(
        r#"
        SELECT proposal_id, user_id, stage, vote_type, cast_at
        FROM votes
        WHERE proposal_id = ? AND stage = ?
        ORDER BY cast_at, user_id
        "#,
    )
    .bind(proposal_id)
    .bind(stage)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
