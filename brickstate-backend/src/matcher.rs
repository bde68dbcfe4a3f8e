//! Join detection from checkpoint lines.
//!
//! The server logs a checkpoint line whenever a player's per-minigame save is
//! loaded or created, which is the only reliable signal that a player entered a
//! minigame. The same line is frequently written twice in a row, so identical
//! payloads within a short window collapse into one attempt.

use crate::helpers::now_ms;
use crate::log_line::LogLine;
use regex::Regex;
use scc::HashMap;
use scc::hash_map::Entry;
use std::sync::LazyLock;
use tracing::debug;
use uuid::Uuid;

/// Subsystem tag of the game's own log channel.
pub const GAME_LOG_CHANNEL: &str = "LogBrickadia";

static CHECKPOINT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Ruleset (?<ruleset>.+) (?:no saved checkpoint for player|loading saved checkpoint for player) (?<player>.+) \((?<id>\w{8}-\w{4}-\w{4}-\w{4}-\w{12})\)!*$",
    )
    .expect("checkpoint pattern is valid")
});

static JOINING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<player>.+) \((?<id>\w{8}-\w{4}-\w{4}-\w{4}-\w{12})\) joining Ruleset (?<ruleset>.+?)!*$",
    )
    .expect("joining pattern is valid")
});

/// A player was seen entering a minigame, not yet resolved against live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAttempt {
    pub player_name: String,
    pub player_id: Uuid,
    pub ruleset_display_name: String,
    /// Embedded line timestamp, epoch milliseconds
    pub observed_at: i64,
}

/// Recognized line shapes that announce a minigame join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinLine<'a> {
    /// `Ruleset <name> loading saved checkpoint for player <player> (<uuid>)`
    Checkpoint {
        ruleset: &'a str,
        player: &'a str,
        id: Uuid,
    },
    /// `<player> (<uuid>) joining Ruleset <name>`
    Joining {
        ruleset: &'a str,
        player: &'a str,
        id: Uuid,
    },
}

impl<'a> JoinLine<'a> {
    pub fn classify(data: &'a str) -> Option<Self> {
        if let Some(caps) = CHECKPOINT_LINE.captures(data) {
            return Some(JoinLine::Checkpoint {
                ruleset: caps.name("ruleset")?.as_str(),
                player: caps.name("player")?.as_str(),
                id: Uuid::parse_str(caps.name("id")?.as_str()).ok()?,
            });
        }
        if let Some(caps) = JOINING_LINE.captures(data) {
            return Some(JoinLine::Joining {
                ruleset: caps.name("ruleset")?.as_str(),
                player: caps.name("player")?.as_str(),
                id: Uuid::parse_str(caps.name("id")?.as_str()).ok()?,
            });
        }
        None
    }

    pub fn into_attempt(self, observed_at: i64) -> JoinAttempt {
        let (ruleset, player, id) = match self {
            JoinLine::Checkpoint {
                ruleset,
                player,
                id,
            }
            | JoinLine::Joining {
                ruleset,
                player,
                id,
            } => (ruleset, player, id),
        };
        JoinAttempt {
            player_name: player.to_string(),
            player_id: id,
            ruleset_display_name: ruleset.to_string(),
            observed_at,
        }
    }
}

/// Dedup settings of the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOptions {
    /// Identical payloads closer than this are one event
    pub window_ms: i64,
    /// Table size above which old entries are swept
    pub sweep_threshold: usize,
    /// Entries older than this are dropped by a sweep
    pub max_age_ms: i64,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            window_ms: 100,
            sweep_threshold: 2000,
            max_age_ms: 60 * 60 * 1000,
        }
    }
}

/// Turns raw lines into join attempts, suppressing duplicated lines.
pub struct JoinMatcher {
    channel: String,
    options: DedupOptions,
    /// payload text -> last accepted timestamp
    seen: HashMap<String, i64>,
}

impl JoinMatcher {
    pub fn new(options: DedupOptions) -> Self {
        Self {
            channel: GAME_LOG_CHANNEL.to_string(),
            options,
            seen: HashMap::new(),
        }
    }

    /// Classify one line. Returns an attempt for the first sighting of a
    /// checkpoint payload inside the dedup window.
    pub async fn match_line(&self, line: &LogLine) -> Option<JoinAttempt> {
        if !line.is_from(&self.channel) {
            return None;
        }
        let shape = JoinLine::classify(&line.data)?;
        let observed_at = line.timestamp.unwrap_or_else(now_ms);

        if !self.observe(&line.data, observed_at).await {
            debug!(payload = %line.data, observed_at, "duplicate checkpoint line");
            return None;
        }
        self.sweep(observed_at).await;

        Some(shape.into_attempt(observed_at))
    }

    /// Record a payload sighting. Returns false if it duplicates an earlier one.
    async fn observe(&self, payload: &str, observed_at: i64) -> bool {
        match self.seen.entry_async(payload.to_string()).await {
            Entry::Occupied(mut entry) => {
                if *entry.get() + self.options.window_ms >= observed_at {
                    false
                } else {
                    *entry.get_mut() = observed_at;
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert_entry(observed_at);
                true
            }
        }
    }

    async fn sweep(&self, now: i64) {
        if self.seen.len() <= self.options.sweep_threshold {
            return;
        }
        let cutoff = now - self.options.max_age_ms;
        let before = self.seen.len();
        self.seen.retain_async(|_, seen_at| *seen_at >= cutoff).await;
        debug!(before, after = self.seen.len(), "swept dedup table");
    }

    pub fn tracked_lines(&self) -> usize {
        self.seen.len()
    }

    pub async fn clear(&self) {
        self.seen.clear_async().await;
    }
}

impl Default for JoinMatcher {
    fn default() -> Self {
        Self::new(DedupOptions::default())
    }
}
