//! Voting sessions, ballots and per-stage counts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chamber::ParseEnumError;
use crate::tally::VoteFormula;

/// A single ballot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
    /// 1-based index of a quantitative item.
    Item(u32),
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteChoice::For => f.write_str("for"),
            VoteChoice::Against => f.write_str("against"),
            VoteChoice::Abstain => f.write_str("abstain"),
            VoteChoice::Item(index) => write!(f, "item:{}", index),
        }
    }
}

impl FromStr for VoteChoice {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "for" => Ok(VoteChoice::For),
            "against" => Ok(VoteChoice::Against),
            "abstain" => Ok(VoteChoice::Abstain),
            other => other
                .strip_prefix("item:")
                .and_then(|index| index.parse::<u32>().ok())
                .filter(|index| *index >= 1)
                .map(VoteChoice::Item)
                .ok_or_else(|| ParseEnumError::new("vote choice", s)),
        }
    }
}

/// A recorded ballot, immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: String,
    pub user_id: String,
    pub stage: u32,
    pub choice: VoteChoice,
    /// Epoch milliseconds.
    pub cast_at: i64,
}

/// Ballot counts for one (proposal, stage).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub for_count: u32,
    pub against_count: u32,
    pub abstain_count: u32,
    /// Votes per quantitative item index.
    pub items: BTreeMap<u32, u32>,
}

impl VoteCounts {
    /// Add `count` ballots of the given choice.
    pub fn record(&mut self, choice: VoteChoice, count: u32) {
        match choice {
            VoteChoice::For => self.for_count = self.for_count.saturating_add(count),
            VoteChoice::Against => self.against_count = self.against_count.saturating_add(count),
            VoteChoice::Abstain => self.abstain_count = self.abstain_count.saturating_add(count),
            VoteChoice::Item(index) => {
                let slot = self.items.entry(index).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
    }

    /// Votes cast for a given item.
    pub fn item(&self, index: u32) -> u32 {
        self.items.get(&index).copied().unwrap_or(0)
    }

    /// Votes cast for any item. Saturates at `u32::MAX`.
    pub fn item_total(&self) -> u32 {
        self.items
            .values()
            .fold(0u32, |total, count| total.saturating_add(*count))
    }

    /// Total ballots, abstentions included. Saturates at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.for_count
            .saturating_add(self.against_count)
            .saturating_add(self.abstain_count)
            .saturating_add(self.item_total())
    }
}

impl FromIterator<(VoteChoice, u32)> for VoteCounts {
    fn from_iter<I: IntoIterator<Item = (VoteChoice, u32)>>(iter: I) -> Self {
        let mut counts = VoteCounts::default();
        for (choice, count) in iter {
            counts.record(choice, count);
        }
        counts
    }
}

/// The vote session of a proposal. One row per proposal; each runoff stage
/// reuses it with a higher `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSession {
    pub proposal_id: String,
    pub open: bool,
    /// Epoch milliseconds.
    pub started_at: i64,
    pub duration_ms: i64,
    /// `started_at + duration_ms`, precomputed.
    pub expires_at: i64,
    pub ended_at: Option<i64>,
    pub is_secret: bool,
    pub formula: VoteFormula,
    /// 1 for the initial vote, 2+ for runoffs.
    pub stage: u32,
    /// Chamber membership captured when the stage opened.
    pub total_members: u32,
    /// Items still eligible in this stage; `None` for for/against votes.
    pub candidates: Option<Vec<u32>>,
    /// Ballot message posted for a runoff stage.
    pub runoff_message_id: Option<String>,
    /// Set once the closed stage's final result has been published. A closed
    /// but untallied stage is resumed by the next expiry tick.
    pub tallied: bool,
}

impl VotingSession {
    /// Whether this session runs a rated vote over items.
    pub fn is_quantitative(&self) -> bool {
        self.candidates.is_some()
    }

    /// Whether `choice` is a legal ballot for this stage.
    pub fn accepts(&self, choice: VoteChoice) -> bool {
        match (&self.candidates, choice) {
            (_, VoteChoice::Abstain) => true,
            (Some(candidates), VoteChoice::Item(index)) => candidates.contains(&index),
            (Some(_), _) => false,
            (None, VoteChoice::Item(_)) => false,
            (None, _) => true,
        }
    }

    /// Milliseconds until expiry, never negative.
    pub fn remaining_ms(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}
