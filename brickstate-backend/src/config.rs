use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::host::ChunkOptions;
use crate::matcher::DedupOptions;
use crate::players::LeaderboardPolicy;
use crate::tracker::{RetryPolicy, TrackerOptions};

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval of the minigame round poll
    /// Env: MINIGAME_CHECK_INTERVAL_MS (default: 1000)
    pub minigame_check_interval: Duration,

    /// Interval of the leaderboard poll
    /// Env: LEADERBOARD_CHECK_INTERVAL_MS (default: 1000)
    pub leaderboard_check_interval: Duration,

    /// Retries of an unresolved join before it is dropped
    /// Env: JOIN_RETRY_LIMIT (default: 20)
    pub join_retry_limit: u32,

    /// Delay between join retries
    /// Env: JOIN_RETRY_DELAY_MS (default: 100)
    pub join_retry_delay: Duration,

    /// Upper bound of one console query
    /// Env: QUERY_TIMEOUT_MS (default: 5000)
    pub query_timeout: Duration,

    /// Quiet time after the last matching row that ends a console query
    /// Env: QUERY_AFTER_MATCH_DELAY_MS (default: 100)
    pub query_after_match_delay: Duration,

    /// Identical checkpoint lines closer than this are one join
    /// Env: DEDUP_WINDOW_MS (default: 100)
    pub dedup_window_ms: i64,

    /// Dedup table size that triggers a sweep
    /// Env: DEDUP_SWEEP_THRESHOLD (default: 2000)
    pub dedup_sweep_threshold: usize,

    /// Age after which a dedup entry is swept
    /// Env: DEDUP_MAX_AGE_MS (default: 3600000)
    pub dedup_max_age_ms: i64,

    /// Age after which an unseen minigame is pruned (GLOBAL never is)
    /// Env: MINIGAME_MAX_AGE_MS (default: 3600000)
    pub minigame_max_age_ms: i64,

    /// Age after which an inactive player entry is pruned
    /// Env: PLAYER_MAX_AGE_MS (default: 300000)
    pub player_max_age_ms: i64,

    /// Chance that a poll ends with a prune sweep
    /// Env: PRUNE_PROBABILITY (default: 0.02)
    pub prune_probability: f64,

    /// Leaderboard handling when a player joins a minigame ("reset" or "carry")
    /// Env: LEADERBOARD_ON_JOIN (default: reset)
    pub leaderboard_on_join: LeaderboardPolicy,

    /// Control API port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "brickstate.db")
    pub database_path: String,

    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 65536 = 64KB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 10)
    pub request_timeout: Duration,

    /// Command line that starts the game server
    /// Env: SERVER_COMMAND (required by the binary)
    pub server_command: Option<String>,

    /// Names of the consumers that can subscribe
    /// Env: CONSUMERS (comma separated, default: none)
    pub consumers: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv();
        let defaults = Self::default();
        Self {
            minigame_check_interval: env_or_default_millis(
                "MINIGAME_CHECK_INTERVAL_MS",
                defaults.minigame_check_interval,
            ),
            leaderboard_check_interval: env_or_default_millis(
                "LEADERBOARD_CHECK_INTERVAL_MS",
                defaults.leaderboard_check_interval,
            ),
            join_retry_limit: env_or_default("JOIN_RETRY_LIMIT", defaults.join_retry_limit),
            join_retry_delay: env_or_default_millis("JOIN_RETRY_DELAY_MS", defaults.join_retry_delay),
            query_timeout: env_or_default_millis("QUERY_TIMEOUT_MS", defaults.query_timeout),
            query_after_match_delay: env_or_default_millis(
                "QUERY_AFTER_MATCH_DELAY_MS",
                defaults.query_after_match_delay,
            ),
            dedup_window_ms: env_or_default("DEDUP_WINDOW_MS", defaults.dedup_window_ms),
            dedup_sweep_threshold: env_or_default(
                "DEDUP_SWEEP_THRESHOLD",
                defaults.dedup_sweep_threshold,
            ),
            dedup_max_age_ms: env_or_default("DEDUP_MAX_AGE_MS", defaults.dedup_max_age_ms),
            minigame_max_age_ms: env_or_default("MINIGAME_MAX_AGE_MS", defaults.minigame_max_age_ms),
            player_max_age_ms: env_or_default("PLAYER_MAX_AGE_MS", defaults.player_max_age_ms),
            prune_probability: env_or_default("PRUNE_PROBABILITY", defaults.prune_probability),
            leaderboard_on_join: env_or_default("LEADERBOARD_ON_JOIN", defaults.leaderboard_on_join),
            port: env_or_default("PORT", defaults.port),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            server_command: var("SERVER_COMMAND").ok().filter(|c| !c.trim().is_empty()),
            consumers: var("CONSUMERS")
                .map(|list| parse_list(&list))
                .unwrap_or_default(),
        }
    }

    /// Options of the console queries
    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            first_key: Some("index".to_string()),
            timeout: self.query_timeout,
            after_match_delay: self.query_after_match_delay,
        }
    }

    /// Options of the reconciliation engine
    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            minigame_check_interval: self.minigame_check_interval,
            leaderboard_check_interval: self.leaderboard_check_interval,
            retry: RetryPolicy {
                limit: self.join_retry_limit,
                delay: self.join_retry_delay,
            },
            query: self.chunk_options(),
            dedup: DedupOptions {
                window_ms: self.dedup_window_ms,
                sweep_threshold: self.dedup_sweep_threshold,
                max_age_ms: self.dedup_max_age_ms,
            },
            minigame_max_age_ms: self.minigame_max_age_ms,
            player_max_age_ms: self.player_max_age_ms,
            prune_probability: self.prune_probability,
            leaderboard_on_join: self.leaderboard_on_join,
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            minigame_check_interval: Duration::from_millis(1000),
            leaderboard_check_interval: Duration::from_millis(1000),
            join_retry_limit: 20,
            join_retry_delay: Duration::from_millis(100),
            query_timeout: Duration::from_millis(5000),
            query_after_match_delay: Duration::from_millis(100),
            dedup_window_ms: 100,
            dedup_sweep_threshold: 2000,
            dedup_max_age_ms: 60 * 60 * 1000,
            minigame_max_age_ms: 60 * 60 * 1000,
            player_max_age_ms: 5 * 60 * 1000,
            prune_probability: 0.02,
            leaderboard_on_join: LeaderboardPolicy::Reset,
            port: 3000,
            database_path: "brickstate.db".to_string(),
            request_body_limit: 64 * 1024,
            request_timeout: Duration::from_secs(10),
            server_command: None,
            consumers: Vec::new(),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse a millisecond environment variable or return default value
fn env_or_default_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or_default(key, default.as_millis() as u64))
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.minigame_check_interval, Duration::from_millis(1000));
        assert_eq!(config.leaderboard_check_interval, Duration::from_millis(1000));
        assert_eq!(config.join_retry_limit, 20);
        assert_eq!(config.join_retry_delay, Duration::from_millis(100));
        assert_eq!(config.query_timeout, Duration::from_millis(5000));
        assert_eq!(config.dedup_window_ms, 100);
        assert_eq!(config.dedup_sweep_threshold, 2000);
        assert_eq!(config.minigame_max_age_ms, 3_600_000);
        assert_eq!(config.player_max_age_ms, 300_000);
        assert_eq!(config.leaderboard_on_join, LeaderboardPolicy::Reset);
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_path, "brickstate.db");
        assert!(config.server_command.is_none());
    }

    #[test]
    fn test_tracker_options_follow_config() {
        let config = Config {
            join_retry_limit: 5,
            leaderboard_on_join: LeaderboardPolicy::CarryOver,
            ..Config::default()
        };
        let options = config.tracker_options();
        assert_eq!(options.retry.limit, 5);
        assert_eq!(options.leaderboard_on_join, LeaderboardPolicy::CarryOver);
        assert_eq!(options.query.first_key.as_deref(), Some("index"));
        assert_eq!(options.dedup.max_age_ms, 3_600_000);
    }

    #[test]
    fn test_parse_consumer_list() {
        assert_eq!(parse_list(" scores, ,chat-relay "), vec!["scores", "chat-relay"]);
        assert!(parse_list("").is_empty());
    }
}
