//! Error types for engine operations.

use chamber_core::{StorageError, VoteChoice};
use thiserror::Error;

/// Errors returned by engine operations.
///
/// Everything except `Storage` is a rejected state transition: terminal for
/// the single call and safe to show to the user as "not accepted".
#[derive(Debug, Error)]
pub enum EngineError {
    /// The user already voted in this stage. The first ballot stands.
    #[error("user {user_id} already voted on {proposal_id} in stage {stage}")]
    DuplicateVote {
        proposal_id: String,
        user_id: String,
        stage: u32,
    },

    /// A session or registration window is already open.
    #[error("{entity} {id} is already open")]
    AlreadyOpen { entity: &'static str, id: String },

    /// The session or registration window is not open.
    #[error("{entity} {id} is not open")]
    NotOpen { entity: &'static str, id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The ballot value is not legal for the current session.
    #[error("choice {choice} is not valid for proposal {proposal_id}")]
    InvalidChoice {
        proposal_id: String,
        choice: VoteChoice,
    },

    /// A new stage must be higher than the last one.
    #[error("stage {requested} does not follow stage {current} for proposal {proposal_id}")]
    StageRegression {
        proposal_id: String,
        current: u32,
        requested: u32,
    },

    /// The meeting has reached a terminal status.
    #[error("meeting {0} is already finalized")]
    Finalized(String),

    /// Only the author may perform this action.
    #[error("user {user_id} is not the author of proposal {proposal_id}")]
    NotAuthor {
        proposal_id: String,
        user_id: String,
    },

    /// Proposal input failed validation.
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    /// Durable storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn not_open(entity: &'static str, id: &str) -> Self {
        EngineError::NotOpen {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn already_open(entity: &'static str, id: &str) -> Self {
        EngineError::AlreadyOpen {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this error came from storage rather than a rejected transition.
    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
