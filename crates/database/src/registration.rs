//! Meeting registration operations.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::MeetingRegistrationRow;

/// Register a user while the meeting's window is open.
///
/// Returns false, writing nothing, if the meeting is not open. Fails with
/// [`DatabaseError::AlreadyExists`] if the user is already registered; the
/// original timestamp is kept.
pub async fn register_if_open(
    pool: &SqlitePool,
    meeting_id: &str,
    user_id: &str,
    registered_at: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO meeting_registrations (meeting_id, user_id, registered_at)
        SELECT ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM meetings WHERE id = ? AND open = 1)
        "#,
    )
    .bind(meeting_id)
    .bind(user_id)
    .bind(registered_at)
    .bind(meeting_id)
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::from_insert(e, "MeetingRegistration", format!("{}/{}", meeting_id, user_id))
    })?;

    Ok(result.rows_affected() > 0)
}

/// Register a user for a meeting whatever its state.
///
/// Idempotent: returns true if a new registration was recorded, false if
/// the user was already registered (the original timestamp is kept).
pub async fn register(
    pool: &SqlitePool,
    meeting_id: &str,
    user_id: &str,
    registered_at: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO meeting_registrations (meeting_id, user_id, registered_at)
        VALUES (?, ?, ?)
        ON CONFLICT(meeting_id, user_id) DO NOTHING
        "#,
    )
    .bind(meeting_id)
    .bind(user_id)
    .bind(registered_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count registrations for a meeting.
pub async fn count(pool: &SqlitePool, meeting_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM meeting_registrations WHERE meeting_id = ?
        "#,
    )
    .bind(meeting_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// List registrations in registration order.
pub async fn list(pool: &SqlitePool, meeting_id: &str) -> Result<Vec<MeetingRegistrationRow>> {
    let rows = sqlx::query_as::<_, MeetingRegistrationRow>(
        r#"
        SELECT meeting_id, user_id, registered_at
        FROM meeting_registrations
        WHERE meeting_id = ?
        ORDER BY registered_at, user_id
        "#,
    )
    .bind(meeting_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
