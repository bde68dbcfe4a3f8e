//! Events delivered to subscribed consumers.

use brickstate_db::{Leaderboard, Player, RulesetSnapshot};
use serde::Serialize;
use std::fmt;

/// Closed set of event names consumers can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RoundChange,
    RoundEnd,
    JoinMinigame,
    LeaveMinigame,
    LeaderboardChange,
    Score,
    Kill,
    Death,
}

impl EventKind {
    /// Per-column increment events in `(score, kill, death)` order.
    pub const INCREMENTS: [EventKind; 3] = [EventKind::Score, EventKind::Kill, EventKind::Death];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RoundChange => "roundchange",
            EventKind::RoundEnd => "roundend",
            EventKind::JoinMinigame => "joinminigame",
            EventKind::LeaveMinigame => "leaveminigame",
            EventKind::LeaderboardChange => "leaderboardchange",
            EventKind::Score => "score",
            EventKind::Kill => "kill",
            EventKind::Death => "death",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minigame reference carried by join events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinigameRef {
    pub name: String,
    pub ruleset: String,
    pub index: i32,
}

impl From<&RulesetSnapshot> for MinigameRef {
    fn from(snapshot: &RulesetSnapshot) -> Self {
        Self {
            name: snapshot.display_name.clone(),
            ruleset: snapshot.ruleset_id.clone(),
            index: snapshot.ordinal_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinEvent {
    pub player: Player,
    pub minigame: MinigameRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveEvent {
    pub player: Player,
    pub minigame: RulesetSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_minigame: Option<MinigameRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEvent {
    /// None when the player could not be resolved from its state handle
    pub player: Option<Player>,
    pub leaderboard: Leaderboard,
    pub old_leaderboard: Leaderboard,
    pub minigame: RulesetSnapshot,
}

/// An event and its payload. Serializes as the bare payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Event {
    RoundChange(RulesetSnapshot),
    RoundEnd(RulesetSnapshot),
    JoinMinigame(JoinEvent),
    LeaveMinigame(LeaveEvent),
    LeaderboardChange(LeaderboardEvent),
    Score(LeaderboardEvent),
    Kill(LeaderboardEvent),
    Death(LeaderboardEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RoundChange(_) => EventKind::RoundChange,
            Event::RoundEnd(_) => EventKind::RoundEnd,
            Event::JoinMinigame(_) => EventKind::JoinMinigame,
            Event::LeaveMinigame(_) => EventKind::LeaveMinigame,
            Event::LeaderboardChange(_) => EventKind::LeaderboardChange,
            Event::Score(_) => EventKind::Score,
            Event::Kill(_) => EventKind::Kill,
            Event::Death(_) => EventKind::Death,
        }
    }

    /// Build the named increment event for a leaderboard change.
    /// Returns None for kinds that are not leaderboard increments.
    pub fn increment(kind: EventKind, payload: LeaderboardEvent) -> Option<Self> {
        match kind {
            EventKind::Score => Some(Event::Score(payload)),
            EventKind::Kill => Some(Event::Kill(payload)),
            EventKind::Death => Some(Event::Death(payload)),
            _ => None,
        }
    }

    /// JSON payload as handed to consumers.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
