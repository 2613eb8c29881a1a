//! Configuration management

use crate::types::DEFAULT_MESSAGE_LOG_CAP;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
///
/// Matchmaking and retention tunables are deliberately configurable rather
/// than hard-coded; the defaults mirror production behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database path for session persistence
    pub db_path: PathBuf,

    /// Redis URL for distributed session state (optional)
    pub redis_url: Option<String>,

    /// Messages a participant side must send before the session is
    /// credited to leaderboards (once per side)
    pub min_messages_for_leaderboard: u64,

    /// How many recently-matched counterpart users to remember per user
    pub recent_match_capacity: usize,

    /// How long a recent-match entry blocks re-pairing
    pub recent_match_ttl: Duration,

    /// Cap on the rolling in-memory message log per session
    pub message_log_cap: usize,

    /// How long an ended, unreported session snapshot stays cached
    pub ended_retention: Duration,

    /// Retention for ended sessions flagged via a report
    pub reported_retention: Duration,

    /// Local-cache TTL for sessions resolved through the distributed
    /// mirror; keeps the mirror authoritative for sessions another shard
    /// owns and ends
    pub mirror_backfill_ttl: Duration,

    /// Persisted ENDED rows older than this are removed by cleanup
    pub cleanup_max_age: Duration,

    /// Interval between cleanup sweeps in the maintenance worker
    pub cleanup_interval: Duration,

    /// Command-handling latency SLA
    pub command_sla: Duration,

    /// Match-acquisition latency SLA
    pub matching_sla: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("userphone.db"),
            redis_url: None,
            min_messages_for_leaderboard: 3,
            recent_match_capacity: 3,
            recent_match_ttl: Duration::from_secs(24 * 60 * 60),
            message_log_cap: DEFAULT_MESSAGE_LOG_CAP,
            ended_retention: Duration::from_secs(1800),
            reported_retention: Duration::from_secs(48 * 60 * 60),
            mirror_backfill_ttl: Duration::from_secs(5),
            cleanup_max_age: Duration::from_secs(48 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            command_sla: Duration::from_millis(1000),
            matching_sla: Duration::from_millis(10_000),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let db_path = std::env::var("USERPHONE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let redis_url = std::env::var("REDIS_URL").ok();

        Ok(Self {
            db_path,
            redis_url,
            min_messages_for_leaderboard: env_u64(
                "USERPHONE_LEADERBOARD_MIN_MESSAGES",
                defaults.min_messages_for_leaderboard,
            ),
            recent_match_capacity: env_u64(
                "USERPHONE_RECENT_MATCH_CAPACITY",
                defaults.recent_match_capacity as u64,
            ) as usize,
            recent_match_ttl: env_secs("USERPHONE_RECENT_MATCH_TTL_SECS", defaults.recent_match_ttl),
            message_log_cap: env_u64(
                "USERPHONE_MESSAGE_LOG_CAP",
                defaults.message_log_cap as u64,
            ) as usize,
            ended_retention: env_secs("USERPHONE_ENDED_RETENTION_SECS", defaults.ended_retention),
            reported_retention: env_secs(
                "USERPHONE_REPORTED_RETENTION_SECS",
                defaults.reported_retention,
            ),
            mirror_backfill_ttl: env_secs(
                "USERPHONE_MIRROR_BACKFILL_TTL_SECS",
                defaults.mirror_backfill_ttl,
            ),
            cleanup_max_age: env_secs("USERPHONE_CLEANUP_MAX_AGE_SECS", defaults.cleanup_max_age),
            cleanup_interval: env_secs("USERPHONE_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
            command_sla: env_millis("USERPHONE_COMMAND_SLA_MS", defaults.command_sla),
            matching_sla: env_millis("USERPHONE_MATCHING_SLA_MS", defaults.matching_sla),
        })
    }

    /// Cache retention for an ended session snapshot.
    pub fn retention_for(&self, reported: bool) -> Duration {
        if reported {
            self.reported_retention
        } else {
            self.ended_retention
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_messages_for_leaderboard, 3);
        assert_eq!(cfg.recent_match_capacity, 3);
        assert_eq!(cfg.recent_match_ttl, Duration::from_secs(86400));
        assert_eq!(cfg.ended_retention, Duration::from_secs(1800));
        assert_eq!(cfg.reported_retention, Duration::from_secs(172_800));
        assert_eq!(cfg.mirror_backfill_ttl, Duration::from_secs(5));
        assert_eq!(cfg.command_sla, Duration::from_millis(1000));
        assert_eq!(cfg.matching_sla, Duration::from_millis(10_000));
    }

    #[test]
    fn test_retention_for() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.retention_for(false), Duration::from_secs(1800));
        assert_eq!(cfg.retention_for(true), Duration::from_secs(172_800));
    }
}
