//! Core types and traits for the chamber voting bot.
//!
//! This crate holds everything the voting and quorum engine shares with its
//! collaborators:
//!
//! - Domain records: [`Proposal`], [`VotingSession`], [`Vote`], [`Meeting`]
//! - [`parse_duration_ms`] - free-form duration parsing ("1h30m")
//! - [`tally`] / [`rated_tally`] - pure vote-count formulas
//! - [`Storage`] - durable storage the engine reads and writes through
//! - [`Presenter`] - chat-platform side effects (rendering, voter roles)
//! - [`Clock`] - injectable source of the current time
//!
//! # Example
//!
//! ```rust
//! use chamber_core::{tally, VoteFormula};
//!
//! let result = tally(5, 4, 0, VoteFormula::SimpleMajority, 0);
//! assert_eq!(result.required_for, 5);
//! assert!(result.is_passed);
//! ```

mod chamber;
mod clock;
mod duration;
mod meeting;
mod outcome;
mod presenter;
mod proposal;
mod storage;
mod tally;
mod voting;

pub use chamber::{Chamber, ParseEnumError};
pub use clock::{Clock, SystemClock};
pub use duration::{parse_duration_ms, DEFAULT_DURATION_MS};
pub use meeting::{Meeting, MeetingRegistration, MeetingStatus, MeetingUpdate};
pub use outcome::{
    FinalResult, QuorumReport, RoleFailure, RoleGrant, VoteOutcome, VoteStatus,
};
pub use presenter::{Presenter, PresenterError};
pub use proposal::{EventKind, Proposal, ProposalEvent, ProposalStatus, QuantitativeItem};
pub use storage::{RegistrationInsert, Storage, StorageError, VoteInsert};
pub use tally::{rated_tally, tally, ItemResult, RatedTally, Tally, VoteFormula};
pub use voting::{Vote, VoteChoice, VoteCounts, VotingSession};

// Re-export async_trait for collaborator implementations
pub use async_trait::async_trait;
