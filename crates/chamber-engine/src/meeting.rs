//! Meeting quorum controller.
//!
//! A meeting moves `Planned -> RegistrationOpen -> Completed`. While the
//! registration window is open a ticker refreshes the status panel; the first
//! tick past `expires_at` closes the window together with the quorum decision,
//! then grants the chamber's voter role to every registrant when quorum is
//! met. The ticker keeps running until the grants are recorded as done.

use std::sync::Arc;

use chamber_core::{
    Chamber, Meeting, MeetingStatus, MeetingUpdate, QuorumReport, RegistrationInsert, RoleFailure,
    RoleGrant,
};
use tracing::{debug, error, info, warn};

use crate::context::{short_id, EngineContext};
use crate::error::{EngineError, Result};
use crate::scheduler::{FailureBudget, TickOutcome, TimerKey};

/// Request to schedule a meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeeting {
    pub chamber: Chamber,
    pub title: String,
    /// Free-text date shown to members.
    pub meeting_date: String,
    pub channel_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    AlreadyRegistered,
}

/// What happened to the voter role on a late registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LateRole {
    Granted,
    AlreadyHeld,
    /// The meeting did not reach quorum, so no role is handed out.
    QuorumNotMet,
    /// The platform refused the grant.
    Failed(String),
}

/// Result of a registration after the window closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LateRegistration {
    pub newly_registered: bool,
    pub role: LateRole,
}

/// Result of revoking the voter role from a meeting's registrants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleClearReport {
    pub meeting_id: String,
    pub chamber: Chamber,
    pub revoked: u32,
    pub failures: Vec<RoleFailure>,
}

/// Owns the registration window of every meeting.
#[derive(Clone)]
pub struct QuorumController {
    ctx: EngineContext,
}

impl QuorumController {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Schedule a meeting in the `Planned` state.
    pub async fn create_meeting(&self, request: NewMeeting) -> Result<Meeting> {
        let meeting = Meeting {
            id: short_id(),
            chamber: request.chamber,
            title: request.title,
            meeting_date: request.meeting_date,
            channel_id: request.channel_id,
            thread_id: request.thread_id,
            created_at: self.ctx.now(),
            duration_ms: 0,
            expires_at: None,
            open: false,
            quorum: 0,
            total_members: 0,
            status: MeetingStatus::Planned,
            quorum_met: None,
            finalized: false,
        };
        self.ctx.storage.create_meeting(&meeting).await?;

        info!(meeting_id = %meeting.id, chamber = %meeting.chamber, "Meeting created");
        Ok(meeting)
    }

    /// Open the registration window and arm the status ticker.
    pub async fn open_registration(
        &self,
        meeting_id: &str,
        duration_ms: u64,
        quorum: u32,
        total_members: u32,
    ) -> Result<Meeting> {
        let mut meeting = self.load(meeting_id).await?;
        if meeting.open {
            return Err(EngineError::already_open("Meeting", meeting_id));
        }
        if meeting.status.is_terminal() {
            return Err(EngineError::Finalized(meeting_id.to_string()));
        }

        let now = self.ctx.now();
        let duration_ms = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        let update = MeetingUpdate {
            status: Some(MeetingStatus::RegistrationOpen),
            open: Some(true),
            duration_ms: Some(duration_ms),
            expires_at: Some(now.saturating_add(duration_ms)),
            quorum: Some(quorum),
            total_members: Some(total_members),
            quorum_met: None,
        };
        if !self.ctx.storage.update_meeting(meeting_id, &update).await? {
            return Err(EngineError::not_found("Meeting", meeting_id));
        }
        update.apply_to(&mut meeting);

        self.arm(meeting_id);

        let registered = self.ctx.storage.get_registration_count(meeting_id).await?;
        if let Err(e) = self
            .ctx
            .presenter
            .render_meeting_status(&meeting, meeting.remaining_ms(now), registered)
            .await
        {
            warn!(meeting_id = %meeting_id, "Failed to render meeting status: {}", e);
        }
        info!(
            meeting_id = %meeting_id,
            quorum,
            expires_at = ?meeting.expires_at,
            "Registration opened"
        );

        Ok(meeting)
    }

    /// Register a user while the window is open. Registering twice is a no-op.
    ///
    /// Storage re-checks that the window is open when the row is written, so
    /// a registration racing the close is refused rather than counted late.
    pub async fn register(&self, meeting_id: &str, user_id: &str) -> Result<Registration> {
        let meeting = self.load(meeting_id).await?;
        let now = self.ctx.now();
        if !meeting.open || meeting.is_expired(now) {
            return Err(EngineError::not_open("Meeting", meeting_id));
        }

        match self
            .ctx
            .storage
            .register_for_meeting(meeting_id, user_id, now)
            .await?
        {
            RegistrationInsert::Registered => {
                debug!(meeting_id = %meeting_id, "Registration recorded");
                Ok(Registration::Registered)
            }
            RegistrationInsert::AlreadyRegistered => Ok(Registration::AlreadyRegistered),
            RegistrationInsert::Closed => Err(EngineError::not_open("Meeting", meeting_id)),
        }
    }

    /// One status refresh. Finalizes the meeting once it has expired.
    pub async fn tick(&self, meeting_id: &str) -> TickOutcome {
        let meeting = match self.ctx.storage.get_meeting(meeting_id).await {
            Ok(Some(meeting)) => meeting,
            Ok(None) => {
                warn!(meeting_id = %meeting_id, "Meeting no longer exists");
                return TickOutcome::Missing;
            }
            Err(e) => {
                error!(meeting_id = %meeting_id, "Failed to load meeting: {}", e);
                return TickOutcome::Failed;
            }
        };
        if !meeting.open {
            if meeting.needs_finalizing() {
                return self.tick_finalize(meeting_id).await;
            }
            debug!(meeting_id = %meeting_id, "Stale meeting tick ignored");
            return TickOutcome::Stale;
        }

        let now = self.ctx.now();
        if meeting.is_expired(now) {
            return self.tick_finalize(meeting_id).await;
        }

        match self.ctx.storage.get_registration_count(meeting_id).await {
            Ok(registered) => {
                if let Err(e) = self
                    .ctx
                    .presenter
                    .render_meeting_status(&meeting, meeting.remaining_ms(now), registered)
                    .await
                {
                    warn!(meeting_id = %meeting_id, "Failed to render meeting status: {}", e);
                }
                TickOutcome::Refreshed
            }
            Err(e) => {
                error!(meeting_id = %meeting_id, "Failed to count registrations: {}", e);
                TickOutcome::Failed
            }
        }
    }

    async fn tick_finalize(&self, meeting_id: &str) -> TickOutcome {
        match self.finalize(meeting_id).await {
            Ok(Some(_)) => TickOutcome::Closed,
            Ok(None) => TickOutcome::Stale,
            Err(EngineError::NotFound { .. }) => TickOutcome::Missing,
            Err(e) => {
                error!(meeting_id = %meeting_id, "Failed to finalize meeting: {}", e);
                TickOutcome::Failed
            }
        }
    }

    /// Close the registration window and hand out voter roles.
    ///
    /// The window closes and the quorum decision is stored in one storage
    /// step, and only the call that closed it goes on to grant roles. The
    /// grants are recorded as done at the end; a meeting that completed
    /// without that record is resumed by the next call, normally the next
    /// tick, with its stored quorum decision. A resumed run asks for every
    /// grant again, and users who already got the role count as
    /// `already_had`.
    ///
    /// Returns `None` if there was nothing left to do. Individual grant
    /// failures are collected in the report and never stop the remaining
    /// grants.
    pub async fn finalize(&self, meeting_id: &str) -> Result<Option<QuorumReport>> {
        let meeting = self.load(meeting_id).await?;
        let stored_quorum = if meeting.open {
            match self.ctx.storage.complete_meeting(meeting_id).await? {
                Some(quorum_met) => Some(quorum_met),
                None => return Ok(None),
            }
        } else if meeting.needs_finalizing() {
            info!(meeting_id = %meeting_id, "Resuming unfinished meeting finalization");
            meeting.quorum_met
        } else {
            return Ok(None);
        };

        let registrations = self.ctx.storage.get_registrations(meeting_id).await?;
        let registered = u32::try_from(registrations.len()).unwrap_or(u32::MAX);
        let quorum_met = stored_quorum.unwrap_or(registered >= meeting.quorum);

        let mut report = QuorumReport {
            meeting_id: meeting_id.to_string(),
            chamber: meeting.chamber,
            registered,
            quorum: meeting.quorum,
            quorum_met,
            granted: 0,
            already_had: 0,
            failures: Vec::new(),
        };

        if quorum_met {
            for registration in &registrations {
                match self
                    .ctx
                    .presenter
                    .grant_voter_role(meeting.chamber, &registration.user_id)
                    .await
                {
                    Ok(RoleGrant::Granted) => report.granted += 1,
                    Ok(RoleGrant::AlreadyHeld) => report.already_had += 1,
                    Err(e) => {
                        warn!(
                            meeting_id = %meeting_id,
                            user_id = %registration.user_id,
                            "Failed to grant voter role: {}", e
                        );
                        report.failures.push(RoleFailure {
                            user_id: registration.user_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        } else {
            info!(
                meeting_id = %meeting_id,
                registered,
                quorum = meeting.quorum,
                "Quorum not met, no roles granted"
            );
        }

        self.ctx.storage.mark_meeting_finalized(meeting_id).await?;
        self.ctx
            .scheduler
            .cancel(&TimerKey::Meeting(meeting_id.to_string()));

        if let Err(e) = self.ctx.presenter.render_meeting_result(&report).await {
            warn!(meeting_id = %meeting_id, "Failed to render meeting result: {}", e);
        }
        info!(
            meeting_id = %meeting_id,
            quorum_met,
            granted = report.granted,
            already_had = report.already_had,
            failed = report.failures.len(),
            "Meeting finalized"
        );

        Ok(Some(report))
    }

    /// Register a straggler after the meeting was finalized.
    ///
    /// If the meeting reached quorum the user also receives the voter role.
    pub async fn late_register(&self, meeting_id: &str, user_id: &str) -> Result<LateRegistration> {
        let meeting = self.load(meeting_id).await?;
        if meeting.open {
            return Err(EngineError::already_open("Meeting", meeting_id));
        }
        if meeting.status != MeetingStatus::Completed {
            return Err(EngineError::not_open("Meeting", meeting_id));
        }

        let newly_registered = self
            .ctx
            .storage
            .register_late(meeting_id, user_id, self.ctx.now())
            .await?;

        let role = if meeting.quorum_met == Some(true) {
            match self
                .ctx
                .presenter
                .grant_voter_role(meeting.chamber, user_id)
                .await
            {
                Ok(RoleGrant::Granted) => LateRole::Granted,
                Ok(RoleGrant::AlreadyHeld) => LateRole::AlreadyHeld,
                Err(e) => {
                    warn!(meeting_id = %meeting_id, user_id = %user_id, "Failed to grant voter role: {}", e);
                    LateRole::Failed(e.to_string())
                }
            }
        } else {
            LateRole::QuorumNotMet
        };

        info!(meeting_id = %meeting_id, newly_registered, "Late registration");
        Ok(LateRegistration {
            newly_registered,
            role,
        })
    }

    /// Revoke the voter role from every registrant of a closed meeting.
    pub async fn clear_voter_roles(&self, meeting_id: &str) -> Result<RoleClearReport> {
        let meeting = self.load(meeting_id).await?;
        if meeting.open {
            return Err(EngineError::already_open("Meeting", meeting_id));
        }

        let mut report = RoleClearReport {
            meeting_id: meeting_id.to_string(),
            chamber: meeting.chamber,
            revoked: 0,
            failures: Vec::new(),
        };
        for registration in self.ctx.storage.get_registrations(meeting_id).await? {
            match self
                .ctx
                .presenter
                .revoke_voter_role(meeting.chamber, &registration.user_id)
                .await
            {
                Ok(()) => report.revoked += 1,
                Err(e) => {
                    warn!(
                        meeting_id = %meeting_id,
                        user_id = %registration.user_id,
                        "Failed to revoke voter role: {}", e
                    );
                    report.failures.push(RoleFailure {
                        user_id: registration.user_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            meeting_id = %meeting_id,
            revoked = report.revoked,
            failed = report.failures.len(),
            "Voter roles cleared"
        );
        Ok(report)
    }

    /// Cancel a planned or open meeting. No roles are granted.
    pub async fn cancel_meeting(&self, meeting_id: &str) -> Result<()> {
        let meeting = self.load(meeting_id).await?;
        if meeting.status.is_terminal() {
            return Err(EngineError::Finalized(meeting_id.to_string()));
        }

        if meeting.open {
            if !self
                .ctx
                .storage
                .close_meeting(meeting_id, MeetingStatus::Cancelled)
                .await?
            {
                return Err(EngineError::Finalized(meeting_id.to_string()));
            }
        } else {
            let update = MeetingUpdate {
                status: Some(MeetingStatus::Cancelled),
                ..Default::default()
            };
            self.ctx.storage.update_meeting(meeting_id, &update).await?;
        }
        self.ctx
            .scheduler
            .cancel(&TimerKey::Meeting(meeting_id.to_string()));

        info!(meeting_id = %meeting_id, "Meeting cancelled");
        Ok(())
    }

    /// Arm (or re-arm) the status ticker of a meeting.
    pub fn arm(&self, meeting_id: &str) {
        let key = TimerKey::Meeting(meeting_id.to_string());
        let budget = Arc::new(FailureBudget::new(self.ctx.config.max_tick_failures));
        let controller = self.clone();
        let id = meeting_id.to_string();
        let timer_key = key.clone();

        self.ctx
            .scheduler
            .arm(key, self.ctx.config.meeting_tick, move || {
                let controller = controller.clone();
                let id = id.clone();
                let budget = Arc::clone(&budget);
                let key = timer_key.clone();
                async move {
                    let outcome = controller.tick(&id).await;
                    budget.control(&key, outcome)
                }
            });
    }

    async fn load(&self, meeting_id: &str) -> Result<Meeting> {
        self.ctx
            .storage
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Meeting", meeting_id))
    }
}
