//! Engine and daemon configuration.

use std::env;
use std::time::Duration;

use database::Database;

/// Tunables for the voting and quorum engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the expiry check armed for every open voting session.
    pub vote_tick: Duration,
    /// Period of the status refresh armed for every open meeting.
    pub meeting_tick: Duration,
    /// Consecutive failed ticks after which a ticker cancels itself.
    pub max_tick_failures: u32,
    /// Highest stage a quantitative vote may reach through runoffs.
    pub max_vote_stages: u32,
    /// Membership assumed for absolute-majority votes when the presenter
    /// cannot report a chamber's size.
    pub default_chamber_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vote_tick: Duration::from_secs(10),
            meeting_tick: Duration::from_secs(10),
            max_tick_failures: 5,
            max_vote_stages: 3,
            default_chamber_size: 50,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `CHAMBER_VOTE_TICK_SECS` (default: 10)
    /// - `CHAMBER_MEETING_TICK_SECS` (default: 10)
    /// - `CHAMBER_MAX_TICK_FAILURES` (default: 5)
    /// - `CHAMBER_MAX_VOTE_STAGES` (default: 3)
    /// - `CHAMBER_DEFAULT_SIZE` (default: 50)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("CHAMBER_VOTE_TICK_SECS").filter(|s| *s > 0) {
            config.vote_tick = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CHAMBER_MEETING_TICK_SECS").filter(|s| *s > 0) {
            config.meeting_tick = Duration::from_secs(secs);
        }
        if let Some(value) = env_u32("CHAMBER_MAX_TICK_FAILURES").filter(|v| *v > 0) {
            config.max_tick_failures = value;
        }
        if let Some(value) = env_u32("CHAMBER_MAX_VOTE_STAGES").filter(|v| *v > 0) {
            config.max_vote_stages = value;
        }
        if let Some(value) = env_u32("CHAMBER_DEFAULT_SIZE") {
            config.default_chamber_size = value;
        }

        config
    }

    /// Use the same period for both tickers.
    pub fn with_tick(mut self, period: Duration) -> Self {
        self.vote_tick = period;
        self.meeting_tick = period;
        self
    }
}

/// Settings for the `chamber-daemon` binary.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// SQLite connection URL.
    pub sqlite_url: String,
    pub pool_size: u32,
}

impl DaemonConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `SQLITE_PATH` (path or sqlite URL, default: ./data/chamber.db)
    /// - `CHAMBER_DB_POOL_SIZE` (default: 20)
    pub fn from_env() -> Self {
        let sqlite_path =
            env::var("SQLITE_PATH").unwrap_or_else(|_| "./data/chamber.db".to_string());
        let pool_size = env_u32("CHAMBER_DB_POOL_SIZE")
            .filter(|v| *v > 0)
            .unwrap_or(Database::DEFAULT_POOL_SIZE);

        Self {
            sqlite_url: sqlite_url_from_path(&sqlite_path),
            pool_size,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok()?.parse().ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok()?.parse().ok()
}

fn sqlite_url_from_path(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", path)
    }
}
