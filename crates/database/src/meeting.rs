//! Meeting operations.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::MeetingRow;

const MEETING_COLUMNS: &str = "id, chamber, title, meeting_date, channel_id, thread_id, \
     created_at, duration_ms, expires_at, open, quorum, total_members, status, quorum_met, finalized";

/// Changes to apply to a meeting row.
///
/// Every field maps to exactly one column through [`MeetingChanges::assignments`];
/// there is no way to name an arbitrary column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingChanges {
    pub status: Option<String>,
    pub open: Option<bool>,
    pub duration_ms: Option<i64>,
    pub expires_at: Option<i64>,
    pub quorum: Option<i64>,
    pub total_members: Option<i64>,
    pub quorum_met: Option<bool>,
}

/// A bound value for one column assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl MeetingChanges {
    /// Whether no column would change.
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    fn assignments(&self) -> Vec<(&'static str, ColumnValue)> {
        let mut set = Vec::new();
        if let Some(status) = &self.status {
            set.push(("status", ColumnValue::Text(status.clone())));
        }
        if let Some(open) = self.open {
            set.push(("open", ColumnValue::Bool(open)));
        }
        if let Some(duration_ms) = self.duration_ms {
            set.push(("duration_ms", ColumnValue::Int(duration_ms)));
        }
        if let Some(expires_at) = self.expires_at {
            set.push(("expires_at", ColumnValue::Int(expires_at)));
        }
        if let Some(quorum) = self.quorum {
            set.push(("quorum", ColumnValue::Int(quorum)));
        }
        if let Some(total_members) = self.total_members {
            set.push(("total_members", ColumnValue::Int(total_members)));
        }
        if let Some(quorum_met) = self.quorum_met {
            set.push(("quorum_met", ColumnValue::Bool(quorum_met)));
        }
        set
    }
}

/// Create a new meeting.
pub async fn create_meeting(pool: &SqlitePool, meeting: &MeetingRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meetings (id, chamber, title, meeting_date, channel_id, thread_id,
                              created_at, duration_ms, expires_at, open, quorum,
                              total_members, status, quorum_met, finalized)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&meeting.id)
    .bind(&meeting.chamber)
    .bind(&meeting.title)
    .bind(&meeting.meeting_date)
    .bind(&meeting.channel_id)
    .bind(&meeting.thread_id)
    .bind(meeting.created_at)
    .bind(meeting.duration_ms)
    .bind(meeting.expires_at)
    .bind(meeting.open)
    .bind(meeting.quorum)
    .bind(meeting.total_members)
    .bind(&meeting.status)
    .bind(meeting.quorum_met)
    .bind(meeting.finalized)
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::from_insert(e, "Meeting", meeting.id.clone()))?;

    Ok(())
}

/// Get a meeting by ID.
pub async fn get_meeting(pool: &SqlitePool, id: &str) -> Result<Option<MeetingRow>> {
    let query = format!("SELECT {} FROM meetings WHERE id = ?", MEETING_COLUMNS);
    let row = sqlx::query_as::<_, MeetingRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Apply a set of changes to a meeting.
///
/// Returns false if the meeting does not exist.
pub async fn update_meeting(pool: &SqlitePool, id: &str, changes: &MeetingChanges) -> Result<bool> {
    let assignments = changes.assignments();
    if assignments.is_empty() {
        return Ok(get_meeting(pool, id).await?.is_some());
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE meetings SET ");
    let mut columns = builder.separated(", ");
    for (column, value) in assignments {
        columns.push(format!("{} = ", column));
        match value {
            ColumnValue::Text(text) => columns.push_bind_unseparated(text),
            ColumnValue::Int(int) => columns.push_bind_unseparated(int),
            ColumnValue::Bool(flag) => columns.push_bind_unseparated(flag),
        };
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id.to_string());

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Close an open meeting with a final status.
///
/// Returns true only for the call that performed the transition.
pub async fn close_meeting(pool: &SqlitePool, id: &str, status: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE meetings
        SET open = 0, status = ?
        WHERE id = ? AND open = 1
        "#,
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Close an open meeting as completed, deciding quorum from its
/// registrations in the same statement.
///
/// Returns the stored decision, or `None` if the meeting was not open.
pub async fn complete_meeting(pool: &SqlitePool, id: &str) -> Result<Option<bool>> {
    let quorum_met = sqlx::query_scalar::<_, bool>(
        r#"
        UPDATE meetings
        SET open = 0,
            status = 'completed',
            quorum_met = (
                SELECT COUNT(*) FROM meeting_registrations WHERE meeting_id = ?
            ) >= quorum
        WHERE id = ? AND open = 1
        RETURNING quorum_met
        "#,
    )
    .bind(id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(quorum_met)
}

/// Mark a meeting's voter roles as handed out.
///
/// Returns true only for the call that performed the transition.
pub async fn mark_finalized(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE meetings
        SET finalized = 1
        WHERE id = ? AND finalized = 0
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List meetings that are open, or completed with roles still pending.
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<MeetingRow>> {
    let query = format!(
        "SELECT {} FROM meetings \
         WHERE open = 1 OR (status = 'completed' AND finalized = 0) \
         ORDER BY expires_at",
        MEETING_COLUMNS
    );
    let rows = sqlx::query_as::<_, MeetingRow>(&query)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// List a chamber's meetings, newest first.
pub async fn list_by_chamber(pool: &SqlitePool, chamber: &str) -> Result<Vec<MeetingRow>> {
    let query = format!(
        "SELECT {} FROM meetings WHERE chamber = ? ORDER BY created_at DESC",
        MEETING_COLUMNS
    );
    let rows = sqlx::query_as::<_, MeetingRow>(&query)
        .bind(chamber)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[cfg(test)]
pub(crate) fn sample_meeting(id: &str) -> MeetingRow {
    MeetingRow {
        id: id.to_string(),
        chamber: "senate".to_string(),
        title: "Plenary".to_string(),
        meeting_date: "Monday 19:00".to_string(),
        channel_id: Some("chan-1".to_string()),
        thread_id: None,
        created_at: 1_000,
        duration_ms: 0,
        expires_at: None,
        open: false,
        quorum: 0,
        total_members: 0,
        status: "planned".to_string(),
        quorum_met: None,
        finalized: false,
    }
}
