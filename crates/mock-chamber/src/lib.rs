//! Test doubles for the chamber voting engine.
//!
//! This crate provides in-process implementations of the collaborator traits
//! defined in `chamber-core`:
//! - `MemoryStorage` - `Storage` kept in a mutex, with the same conditional
//!   write guarantees as the SQLite backend
//! - `RecordingPresenter` - `Presenter` that records every call for assertions
//! - `ManualClock` - `Clock` that only moves when told to
//!
//! For production persistence, use the `database` crate through the
//! engine's `SqliteStorage` adapter instead.
//!
//! # Example
//!
//! ```rust
//! use mock_chamber::{Clock, ManualClock};
//!
//! let clock = ManualClock::new(1_000);
//! clock.advance(500);
//! assert_eq!(clock.now_ms(), 1_500);
//! ```

mod clock;
mod presenter;
mod storage;

// Re-export chamber-core traits for convenience
pub use chamber_core::{async_trait, Clock, Presenter, Storage};

pub use clock::ManualClock;
pub use presenter::{ballot_message_id, Rendered, RecordingPresenter};
pub use storage::MemoryStorage;
