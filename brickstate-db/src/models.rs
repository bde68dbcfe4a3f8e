use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ruleset display name of the always-present pseudo-match.
pub const GLOBAL_RULESET_NAME: &str = "GLOBAL";

/// A connected player as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
  /// Display name, transient across sessions.
  pub name: String,
  /// Account id, when known.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<Uuid>,
  /// Player state handle (e.g. "BP_PlayerState_C_2147482000").
  pub state: String,
}

/// Observable state of one ruleset (minigame) at a single poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetSnapshot {
  /// Stable internal handle (e.g. "BP_Ruleset_C_2147482111")
  #[serde(rename = "ruleset")]
  pub ruleset_id: String,
  /// User chosen name, may repeat across rulesets
  #[serde(rename = "name")]
  pub display_name: String,
  /// Position among visible minigames, GLOBAL is -1
  #[serde(rename = "index")]
  pub ordinal_index: i32,
  pub round_ended: bool,
  /// Unix epoch milliseconds of the poll that produced this snapshot
  #[serde(default)]
  pub last_seen: i64,
}

impl RulesetSnapshot {
  pub fn is_global(&self) -> bool {
    self.display_name == GLOBAL_RULESET_NAME
  }
}

/// `(score, kill, death)` leaderboard columns. Values are signed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leaderboard(pub i64, pub i64, pub i64);

impl Leaderboard {
  /// Columns in `(score, kill, death)` order.
  pub fn columns(&self) -> [i64; 3] {
    [self.0, self.1, self.2]
  }
}

impl From<[i64; 3]> for Leaderboard {
  fn from([score, kill, death]: [i64; 3]) -> Self {
    Self(score, kill, death)
  }
}

/// Tracked state of one player, keyed by player state handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateEntry {
  /// Ruleset id of the minigame the player is believed to be in
  #[serde(rename = "ruleset")]
  pub current_ruleset: Option<String>,
  #[serde(rename = "leaderboard", default, skip_serializing_if = "Option::is_none")]
  pub last_leaderboard: Option<Leaderboard>,
  pub last_seen: i64,
  /// Player as last resolved by a join, reused for leaderboard events
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub player: Option<Player>,
}

/// Keys of the persisted engine state.
pub mod keys {
  pub const MINIGAME_CACHE: &str = "minigameCache";
  pub const PLAYER_STATE_CACHE: &str = "playerStateCache";
  pub const SUBSCRIBER_NAMES: &str = "subscriberNames";
}
