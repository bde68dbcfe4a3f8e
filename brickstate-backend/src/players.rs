//! Per-player minigame membership and leaderboard tracking.

use crate::events::EventKind;
use crate::minigames::MinigameCache;
use brickstate_db::{Leaderboard, Player, PlayerStateEntry, PlayerStateMap, RulesetSnapshot};
use std::str::FromStr;

/// What happens to a tracked leaderboard when the player enters another minigame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeaderboardPolicy {
    /// Forget the previous tuple, the next poll compares against zeros
    #[default]
    Reset,
    /// Keep comparing against the tuple seen in the previous minigame
    CarryOver,
}

impl FromStr for LeaderboardPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reset" => Ok(LeaderboardPolicy::Reset),
            "carry" | "carryover" | "carry-over" => Ok(LeaderboardPolicy::CarryOver),
            other => Err(format!("unknown leaderboard policy '{other}'")),
        }
    }
}

/// A leaderboard row that differed from the tracked tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardChange {
    pub player_handle: String,
    /// Player cached by the last join, if any
    pub player: Option<Player>,
    pub old: Leaderboard,
    pub new: Leaderboard,
    pub minigame: RulesetSnapshot,
    /// Increment events for every column that strictly grew
    pub increments: Vec<EventKind>,
}

/// player state handle -> tracked entry.
#[derive(Debug, Clone, Default)]
pub struct PlayerStateCache {
    entries: PlayerStateMap,
}

impl PlayerStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: PlayerStateMap) -> Self {
        Self { entries }
    }

    pub fn as_map(&self) -> &PlayerStateMap {
        &self.entries
    }

    pub fn get(&self, player_handle: &str) -> Option<&PlayerStateEntry> {
        self.entries.get(player_handle)
    }

    /// Handle of a tracked player whose cached name matches.
    pub fn handle_by_name(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.player.as_ref().is_some_and(|p| p.name == name))
            .map(|(handle, _)| handle.as_str())
    }

    /// The live minigame a tracked player is in, if both are known.
    pub fn current_minigame<'a>(
        &self,
        player_handle: &str,
        minigames: &'a MinigameCache,
    ) -> Option<&'a RulesetSnapshot> {
        let ruleset = self.entries.get(player_handle)?.current_ruleset.as_deref()?;
        minigames.get(ruleset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Record that a player now belongs to `ruleset_id`.
    pub fn enter(&mut self, player: &Player, ruleset_id: &str, now: i64, policy: LeaderboardPolicy) {
        let carried = match policy {
            LeaderboardPolicy::Reset => None,
            LeaderboardPolicy::CarryOver => self
                .entries
                .get(&player.state)
                .and_then(|entry| entry.last_leaderboard),
        };
        self.entries.insert(
            player.state.clone(),
            PlayerStateEntry {
                current_ruleset: Some(ruleset_id.to_string()),
                last_leaderboard: carried,
                last_seen: now,
                player: Some(player.clone()),
            },
        );
    }

    pub fn remove(&mut self, player_handle: &str) -> Option<PlayerStateEntry> {
        self.entries.shift_remove(player_handle)
    }

    /// Compare a polled leaderboard against the tracked one.
    ///
    /// Rows for untracked players, or players whose minigame is not cached,
    /// are ignored. An untracked tuple compares as all zeros.
    pub fn apply_leaderboard(
        &mut self,
        player_handle: &str,
        leaderboard: Leaderboard,
        minigames: &MinigameCache,
        now: i64,
    ) -> Option<LeaderboardChange> {
        let minigame = self.current_minigame(player_handle, minigames)?.clone();
        let entry = self.entries.get_mut(player_handle)?;
        entry.last_seen = now;

        let old = entry.last_leaderboard.unwrap_or_default();
        if old == leaderboard {
            return None;
        }
        entry.last_leaderboard = Some(leaderboard);

        let increments = old
            .columns()
            .into_iter()
            .zip(leaderboard.columns())
            .zip(EventKind::INCREMENTS)
            .filter(|((before, after), _)| after > before)
            .map(|(_, kind)| kind)
            .collect();

        Some(LeaderboardChange {
            player_handle: player_handle.to_string(),
            player: entry.player.clone(),
            old,
            new: leaderboard,
            minigame,
            increments,
        })
    }

    /// Drop entries not seen since `cutoff`.
    pub fn prune(&mut self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen >= cutoff);
        before - self.entries.len()
    }
}
