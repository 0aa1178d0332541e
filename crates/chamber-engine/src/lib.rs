//! Voting and quorum engine for the chamber voting bot.
//!
//! The engine owns the timed lifecycles of the bot:
//!
//! - [`VotingMachine`] - opens, closes and tallies voting stages, including
//!   runoffs of rated votes
//! - [`QuorumController`] - meeting registration windows, quorum and voter
//!   role grants
//! - [`ProposalRegistry`] - proposal submission, status and timeline
//! - [`Scheduler`] - one periodic ticker per open session or meeting
//! - [`restore_timers`] - re-arms tickers from storage after a restart
//!
//! Storage, rendering and time are injected through the `chamber-core`
//! traits, so the same engine runs against SQLite ([`SqliteStorage`]) in the
//! daemon and against `mock-chamber` in tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chamber_core::{Chamber, SystemClock};
//! use chamber_engine::{ChamberEngine, EngineConfig, NewProposal, SqliteStorage, StartVoting};
//! use database::Database;
//! # use chamber_core::Presenter;
//! # fn presenter() -> Arc<dyn Presenter> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("sqlite:chamber.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     let engine = ChamberEngine::new(
//!         Arc::new(SqliteStorage::new(db)),
//!         presenter(),
//!         Arc::new(SystemClock),
//!         EngineConfig::from_env(),
//!     );
//!     engine.restore().await?;
//!
//!     let proposal = engine
//!         .proposals()
//!         .submit(NewProposal::new("alice", Chamber::Senate, "Budget 2025"))
//!         .await?;
//!     engine
//!         .voting()
//!         .start_voting(StartVoting::new(&proposal.id, 3_600_000))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod meeting;
pub mod proposals;
pub mod restore;
pub mod scheduler;
pub mod store;
pub mod voting;

use std::sync::Arc;

use chamber_core::{Clock, Presenter, Storage};

pub use config::{DaemonConfig, EngineConfig};
pub use context::EngineContext;
pub use error::{EngineError, Result};
pub use meeting::{
    LateRegistration, LateRole, NewMeeting, QuorumController, Registration, RoleClearReport,
};
pub use proposals::{NewProposal, ProposalRegistry};
pub use restore::{restore_timers, RestoreReport};
pub use scheduler::{Scheduler, TickControl, TickOutcome, TimerKey};
pub use store::SqliteStorage;
pub use voting::{decide, StartVoting, VotingMachine};

/// All engine components wired to one set of collaborators.
#[derive(Clone)]
pub struct ChamberEngine {
    ctx: EngineContext,
    voting: VotingMachine,
    meetings: QuorumController,
    proposals: ProposalRegistry,
}

impl ChamberEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        presenter: Arc<dyn Presenter>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let ctx = EngineContext::new(storage, presenter, clock, config);
        Self {
            voting: VotingMachine::new(ctx.clone()),
            meetings: QuorumController::new(ctx.clone()),
            proposals: ProposalRegistry::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn voting(&self) -> &VotingMachine {
        &self.voting
    }

    pub fn meetings(&self) -> &QuorumController {
        &self.meetings
    }

    pub fn proposals(&self) -> &ProposalRegistry {
        &self.proposals
    }

    /// Re-arm tickers for everything stored as open. Call once at startup.
    pub async fn restore(&self) -> Result<RestoreReport> {
        restore_timers(&self.ctx, &self.voting, &self.meetings).await
    }

    /// Stop every ticker. Open sessions stay open in storage.
    pub fn shutdown(&self) {
        self.ctx.scheduler.shutdown();
    }
}
