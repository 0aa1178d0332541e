//! Proposal and quantitative item operations.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::{ProposalRow, QuantitativeItemRow};

/// Create a proposal together with its quantitative items.
///
/// Both are written in one transaction so a proposal never exists with a
/// partial item list.
pub async fn create_proposal(
    pool: &SqlitePool,
    proposal: &ProposalRow,
    items: &[QuantitativeItemRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO proposals (id, number, chamber, author_id, title, status,
                               is_quantitative, parent_proposal_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&proposal.id)
    .bind(&proposal.number)
    .bind(&proposal.chamber)
    .bind(&proposal.author_id)
    .bind(&proposal.title)
    .bind(&proposal.status)
    .bind(proposal.is_quantitative)
    .bind(&proposal.parent_proposal_id)
    .bind(proposal.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| DatabaseError::from_insert(e, "Proposal", proposal.id.clone()))?;

    for item in items {
        sqlx::query(
            r#"
            INSERT INTO quantitative_items (proposal_id, item_index, text)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&proposal.id)
        .bind(item.item_index)
        .bind(&item.text)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Get a proposal by ID.
pub async fn get_proposal(pool: &SqlitePool, id: &str) -> Result<Option<ProposalRow>> {
    let row = sqlx::query_as::<_, ProposalRow>(
        r#"
        SELECT id, number, chamber, author_id, title, status,
               is_quantitative, parent_proposal_id, created_at
        FROM proposals
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Update a proposal's status.
pub async fn set_status(pool: &SqlitePool, id: &str, status: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE proposals
        SET status = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Proposal",
            id: id.to_string(),
        });
    }

    Ok(())
}

/// Delete a proposal. Events, items, the voting session and votes cascade.
///
/// Returns true if a proposal was deleted.
pub async fn delete_proposal(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM proposals
        WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List the quantitative items of a proposal in index order.
pub async fn list_items(pool: &SqlitePool, proposal_id: &str) -> Result<Vec<QuantitativeItemRow>> {
    let rows = sqlx::query_as::<_, QuantitativeItemRow>(
        r#"
        SELECT proposal_id, item_index, text
        FROM quantitative_items
        WHERE proposal_id = ?
        ORDER BY item_index
        "#,
    )
    .bind(proposal_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
pub(crate) fn sample_proposal(id: &str) -> ProposalRow {
    ProposalRow {
        id: id.to_string(),
        number: format!("AS-{}", id),
        chamber: "assembly".to_string(),
        author_id: "author-1".to_string(),
        title: "Budget amendment".to_string(),
        status: "under_review".to_string(),
        is_quantitative: false,
        parent_proposal_id: None,
        created_at: 1_700_000_000_000,
    }
}
