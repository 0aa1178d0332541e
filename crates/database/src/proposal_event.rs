//! Append-only proposal timeline.

use sqlx::SqlitePool;

use crate::models::ProposalEventRow;
use crate::Result;

/// Append an event to a proposal's timeline.
pub async fn insert_event(
    pool: &SqlitePool,
    proposal_id: &str,
    kind: &str,
    chamber: &str,
    created_at: i64,
    description: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proposal_events (proposal_id, kind, chamber, created_at, description)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(proposal_id)
    .bind(kind)
    .bind(chamber)
    .bind(created_at)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(())
}

/// List a proposal's events in insertion order.
pub async fn list_events(pool: &SqlitePool, proposal_id: &str) -> Result<Vec<ProposalEventRow>> {
    let rows = sqlx::query_as::<_, ProposalEventRow>(
        r#"
        SELECT id, proposal_id, kind, chamber, created_at, description
        FROM proposal_events
        WHERE proposal_id = ?
        ORDER BY id
        "#,
    )
    .bind(proposal_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
