//! Per-chamber counters used to mint proposal display numbers.

use sqlx::SqlitePool;

use crate::Result;

/// Increment a chamber's counter and return the new value.
///
/// A single upsert statement, so concurrent callers never observe the same
/// value. The first call for a chamber returns 1.
pub async fn increment(pool: &SqlitePool, chamber: &str) -> Result<i64> {
    let value = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO chamber_counters (chamber, value)
        VALUES (?, 1)
        ON CONFLICT(chamber) DO UPDATE SET
            value = value + 1
        RETURNING value
        "#,
    )
    .bind(chamber)
    .fetch_one(pool)
    .await?;

    Ok(value)
}

/// Current counter value, zero if the chamber has never minted a number.
pub async fn current(pool: &SqlitePool, chamber: &str) -> Result<i64> {
    let value = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT value FROM chamber_counters WHERE chamber = ?
        "#,
    )
    .bind(chamber)
    .fetch_optional(pool)
    .await?;

    Ok(value.unwrap_or(0))
}

/// Seed a chamber's counter, e.g. when importing existing numbering.
pub async fn set(pool: &SqlitePool, chamber: &str, value: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chamber_counters (chamber, value)
        VALUES (?, ?)
        ON CONFLICT(chamber) DO UPDATE SET
            value = excluded.value
        "#,
    )
    .bind(chamber)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
