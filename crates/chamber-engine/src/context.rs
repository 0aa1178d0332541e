//! Shared collaborators of the engine components.

use std::sync::Arc;

use chamber_core::{Chamber, Clock, Presenter, Storage};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::scheduler::Scheduler;

/// Everything an engine component needs to do its work.
///
/// Cloning shares the collaborators and the timer registry.
#[derive(Clone)]
pub struct EngineContext {
    pub storage: Arc<dyn Storage>,
    pub presenter: Arc<dyn Presenter>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Scheduler,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        storage: Arc<dyn Storage>,
        presenter: Arc<dyn Presenter>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            presenter,
            clock,
            scheduler: Scheduler::new(),
            config,
        }
    }

    /// Current time in epoch milliseconds.
    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Membership of a chamber, falling back to the configured default.
    pub(crate) async fn chamber_size(&self, chamber: Chamber) -> u32 {
        match self.presenter.chamber_size(chamber).await {
            Ok(size) => size,
            Err(e) => {
                debug!(
                    chamber = %chamber,
                    "Chamber size unavailable ({}), using default {}",
                    e,
                    self.config.default_chamber_size
                );
                self.config.default_chamber_size
            }
        }
    }
}

/// Length of generated proposal and meeting ids.
const SHORT_ID_LEN: usize = 8;

/// A short opaque id for a new proposal or meeting.
pub(crate) fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}
