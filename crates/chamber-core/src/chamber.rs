//! The fixed set of chambers simulated by the bot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a stored or user-supplied code does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enumeration was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// One of the five legislative bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chamber {
    /// Lower house.
    Assembly,
    /// Upper house.
    Senate,
    /// Executive cabinet.
    Government,
    /// Advisory state council.
    Council,
    /// Constitutional court.
    Court,
}

impl Chamber {
    /// All chambers in display order.
    pub const ALL: [Chamber; 5] = [
        Chamber::Assembly,
        Chamber::Senate,
        Chamber::Government,
        Chamber::Council,
        Chamber::Court,
    ];

    /// Storage code for this chamber.
    pub fn code(&self) -> &'static str {
        match self {
            Chamber::Assembly => "assembly",
            Chamber::Senate => "senate",
            Chamber::Government => "government",
            Chamber::Council => "council",
            Chamber::Court => "court",
        }
    }

    /// Prefix used when minting proposal display numbers (e.g. "AS-12").
    pub fn number_prefix(&self) -> &'static str {
        match self {
            Chamber::Assembly => "AS",
            Chamber::Senate => "SN",
            Chamber::Government => "GV",
            Chamber::Council => "SC",
            Chamber::Court => "CT",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Chamber::Assembly => "Assembly",
            Chamber::Senate => "Senate",
            Chamber::Government => "Government",
            Chamber::Council => "State Council",
            Chamber::Court => "Constitutional Court",
        }
    }
}

impl fmt::Display for Chamber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Chamber {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assembly" => Ok(Chamber::Assembly),
            "senate" => Ok(Chamber::Senate),
            "government" => Ok(Chamber::Government),
            "council" => Ok(Chamber::Council),
            "court" => Ok(Chamber::Court),
            _ => Err(ParseEnumError::new("chamber", s)),
        }
    }
}
