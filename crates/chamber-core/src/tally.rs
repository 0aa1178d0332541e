//! Vote tally rules.
//!
//! Pure functions over vote counts. Nothing here touches storage or time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::voting::VoteCounts;

/// Threshold rule a vote is decided by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteFormula {
    /// More than half of the ballots cast.
    SimpleMajority,
    /// At least two thirds of the ballots cast.
    TwoThirds,
    /// At least three quarters of the ballots cast.
    ThreeQuarters,
    /// At least half of the whole chamber membership.
    AbsoluteMajority,
}

impl VoteFormula {
    /// Storage code for this formula.
    pub fn code(&self) -> &'static str {
        match self {
            VoteFormula::SimpleMajority => "simple",
            VoteFormula::TwoThirds => "two_thirds",
            VoteFormula::ThreeQuarters => "three_quarters",
            VoteFormula::AbsoluteMajority => "absolute",
        }
    }

    /// Parse a formula code. Unknown codes fall back to simple majority.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "two_thirds" | "2/3" => VoteFormula::TwoThirds,
            "three_quarters" | "3/4" => VoteFormula::ThreeQuarters,
            "absolute" | "absolute_majority" => VoteFormula::AbsoluteMajority,
            _ => VoteFormula::SimpleMajority,
        }
    }
}

impl fmt::Display for VoteFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of applying a formula to a set of counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Votes in favour needed to pass.
    pub required_for: u32,
    /// The base the threshold was computed from (ballots cast or membership).
    pub required_total: u32,
    pub is_passed: bool,
}

fn ceil_ratio(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = u64::from(value) * u64::from(numerator);
    scaled.div_ceil(u64::from(denominator)) as u32
}

/// Compute the passage threshold for a for/against/abstain vote.
///
/// Abstentions count as ballots cast. A threshold is never below one vote,
/// so an empty ballot box never passes. The ballot total saturates at
/// `u32::MAX`.
pub fn tally(
    for_count: u32,
    against_count: u32,
    abstain_count: u32,
    formula: VoteFormula,
    total_members: u32,
) -> Tally {
    let total_voted = for_count
        .saturating_add(against_count)
        .saturating_add(abstain_count);

    let (required_for, required_total) = match formula {
        VoteFormula::SimpleMajority => (total_voted / 2 + 1, total_voted),
        VoteFormula::TwoThirds => (ceil_ratio(total_voted, 2, 3), total_voted),
        VoteFormula::ThreeQuarters => (ceil_ratio(total_voted, 3, 4), total_voted),
        VoteFormula::AbsoluteMajority => (ceil_ratio(total_members, 1, 2), total_members),
    };
    let required_for = required_for.max(1);

    Tally {
        required_for,
        required_total,
        is_passed: for_count >= required_for,
    }
}

/// Per-item result of a rated vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_index: u32,
    pub votes: u32,
    pub tally: Tally,
}

/// Result of a rated vote stage over its candidate items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatedTally {
    /// One entry per candidate, highest vote count first.
    pub results: Vec<ItemResult>,
    /// The single item that met its threshold with the most votes.
    pub winner: Option<u32>,
    /// Candidates a runoff would be restricted to, in item order.
    pub leaders: Vec<u32>,
}

/// Tally a rated vote.
///
/// Each candidate is tallied as if its votes were "for", the votes for other
/// items "against", and abstentions as abstentions. The winner is the passing
/// item with the most votes, provided no other passing item ties it.
///
/// Leaders are every item tied for the top count when there is a tie,
/// otherwise the top item plus every item tied for second place.
pub fn rated_tally(
    counts: &VoteCounts,
    candidates: &[u32],
    formula: VoteFormula,
    total_members: u32,
) -> RatedTally {
    let item_total = candidates
        .iter()
        .fold(0u32, |total, i| total.saturating_add(counts.item(*i)));

    let mut results: Vec<ItemResult> = candidates
        .iter()
        .map(|&item_index| {
            let votes = counts.item(item_index);
            ItemResult {
                item_index,
                votes,
                tally: tally(
                    votes,
                    item_total.saturating_sub(votes),
                    counts.abstain_count,
                    formula,
                    total_members,
                ),
            }
        })
        .collect();
    results.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.item_index.cmp(&b.item_index)));

    let passing: Vec<&ItemResult> = results.iter().filter(|r| r.tally.is_passed).collect();
    let winner = match passing.as_slice() {
        [] => None,
        [only] => Some(only.item_index),
        [first, second, ..] if first.votes > second.votes => Some(first.item_index),
        _ => None,
    };

    let mut leaders = Vec::new();
    if let Some(top) = results.first().map(|r| r.votes) {
        let tied_top: Vec<u32> = results
            .iter()
            .filter(|r| r.votes == top)
            .map(|r| r.item_index)
            .collect();
        if tied_top.len() >= 2 {
            leaders = tied_top;
        } else {
            leaders.extend(tied_top);
            if let Some(second) = results.iter().map(|r| r.votes).find(|v| *v < top) {
                leaders.extend(
                    results
                        .iter()
                        .filter(|r| r.votes == second)
                        .map(|r| r.item_index),
                );
            }
        }
    }
    leaders.sort_unstable();

    RatedTally {
        results,
        winner,
        leaders,
    }
}
