//! Meetings and quorum registrations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chamber::{Chamber, ParseEnumError};

/// Lifecycle label of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Planned,
    RegistrationOpen,
    Voting,
    Completed,
    Cancelled,
    Postponed,
}

impl MeetingStatus {
    /// Storage code for this status.
    pub fn code(&self) -> &'static str {
        match self {
            MeetingStatus::Planned => "planned",
            MeetingStatus::RegistrationOpen => "registration_open",
            MeetingStatus::Voting => "voting",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Cancelled => "cancelled",
            MeetingStatus::Postponed => "postponed",
        }
    }

    /// A meeting in a terminal status can never reopen registration.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MeetingStatus::Completed | MeetingStatus::Cancelled)
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MeetingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(MeetingStatus::Planned),
            "registration_open" => Ok(MeetingStatus::RegistrationOpen),
            "voting" => Ok(MeetingStatus::Voting),
            "completed" => Ok(MeetingStatus::Completed),
            "cancelled" => Ok(MeetingStatus::Cancelled),
            "postponed" => Ok(MeetingStatus::Postponed),
            _ => Err(ParseEnumError::new("meeting status", s)),
        }
    }
}

/// A chamber sitting with a timed quorum-registration window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    /// Opaque short token.
    pub id: String,
    pub chamber: Chamber,
    pub title: String,
    /// Free-text date as entered by the official.
    pub meeting_date: String,
    pub channel_id: Option<String>,
    pub thread_id: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Registration window length; zero until registration opens.
    pub duration_ms: i64,
    pub expires_at: Option<i64>,
    pub open: bool,
    pub quorum: u32,
    pub total_members: u32,
    pub status: MeetingStatus,
    /// Set when the registration window closes.
    pub quorum_met: Option<bool>,
    /// Set once voter roles have been handed out. A completed but
    /// unfinalized meeting is resumed by the next status tick.
    pub finalized: bool,
}

impl Meeting {
    /// Milliseconds until the registration window closes, never negative.
    pub fn remaining_ms(&self, now: i64) -> i64 {
        self.expires_at.map(|at| (at - now).max(0)).unwrap_or(0)
    }

    /// Whether the window has closed as completed but roles are still pending.
    pub fn needs_finalizing(&self) -> bool {
        !self.open && self.status == MeetingStatus::Completed && !self.finalized
    }

    /// Whether the registration window has passed.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A user's attendance record for a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRegistration {
    pub meeting_id: String,
    pub user_id: String,
    /// Epoch milliseconds; orders late registrations.
    pub registered_at: i64,
}

/// Partial update of a meeting.
///
/// A closed set of named fields; storage maps each one to a fixed column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingUpdate {
    pub status: Option<MeetingStatus>,
    pub open: Option<bool>,
    pub duration_ms: Option<i64>,
    pub expires_at: Option<i64>,
    pub quorum: Option<u32>,
    pub total_members: Option<u32>,
    pub quorum_met: Option<bool>,
}

impl MeetingUpdate {
    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == MeetingUpdate::default()
    }

    /// Apply this update to an in-memory meeting.
    pub fn apply_to(&self, meeting: &mut Meeting) {
        if let Some(status) = self.status {
            meeting.status = status;
        }
        if let Some(open) = self.open {
            meeting.open = open;
        }
        if let Some(duration_ms) = self.duration_ms {
            meeting.duration_ms = duration_ms;
        }
        if let Some(expires_at) = self.expires_at {
            meeting.expires_at = Some(expires_at);
        }
        if let Some(quorum) = self.quorum {
            meeting.quorum = quorum;
        }
        if let Some(total_members) = self.total_members {
            meeting.total_members = total_members;
        }
        if let Some(quorum_met) = self.quorum_met {
            meeting.quorum_met = Some(quorum_met);
        }
    }
}
