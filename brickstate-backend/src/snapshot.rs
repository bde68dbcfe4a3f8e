//! Bulk console queries parsed into typed rows.

use crate::host::{ChunkOptions, Host, Row};
use brickstate_db::{GLOBAL_RULESET_NAME, Leaderboard, RulesetSnapshot};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

const RULESET_NAME_COMMAND: &str = "GetAll BP_Ruleset_C RulesetName";
const IN_SESSION_COMMAND: &str = "GetAll BP_Ruleset_C bInSession";
const LEADERBOARD_COMMAND: &str = "GetAll BP_PlayerState_C LeaderboardData";
pub const PLAYER_NAME_COMMAND: &str = "GetAll BP_PlayerState_C PlayerName";

static RULESET_NAME_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<index>\d+)\) BP_Ruleset_C (.+):PersistentLevel\.(?<ruleset>BP_Ruleset_C_\d+)\.RulesetName = (?<name>.*)$",
    )
    .expect("ruleset name pattern is valid")
});

static IN_SESSION_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<index>\d+)\) BP_Ruleset_C (.+):PersistentLevel\.(?<ruleset>BP_Ruleset_C_\d+)\.bInSession = (?<inSession>True|False)$",
    )
    .expect("in-session pattern is valid")
});

static LEADERBOARD_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<index>\d+)\) BP_PlayerState_C (.+):PersistentLevel\.(?<state>BP_PlayerState_C_\d+)\.LeaderboardData =$",
    )
    .expect("leaderboard header pattern is valid")
});

static LEADERBOARD_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\t(?<index>\d+): (?<column>-?\d+)$").expect("leaderboard column pattern is valid")
});

pub static PLAYER_NAME_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<index>\d+)\) BP_PlayerState_C (.+):PersistentLevel\.(?<state>BP_PlayerState_C_\d+)\.PlayerName = (?<name>.*)$",
    )
    .expect("player name pattern is valid")
});

/// One ruleset as listed by the name query, before ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetRow {
    pub ruleset_id: String,
    pub display_name: String,
}

/// Leaderboard columns of one player state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardRow {
    pub player_handle: String,
    pub leaderboard: Leaderboard,
}

/// Issues the bulk queries and parses their output. Holds no state between polls.
#[derive(Debug, Clone, Default)]
pub struct SnapshotReader {
    options: ChunkOptions,
}

impl SnapshotReader {
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }

    /// Read every ruleset with its round state and display ordinal.
    pub async fn read_minigames<H: Host>(&self, host: &H, now: i64) -> Vec<RulesetSnapshot> {
        let (names, sessions) = tokio::join!(
            host.watch_chunk(RULESET_NAME_COMMAND, &RULESET_NAME_ROW, &self.options),
            host.watch_chunk(IN_SESSION_COMMAND, &IN_SESSION_ROW, &self.options),
        );
        debug!(rulesets = names.len(), sessions = sessions.len(), "read minigame rounds");

        let rows = names.iter().filter_map(ruleset_row).collect();
        assign_ordinals(rows)
            .into_iter()
            .map(|(row, ordinal_index)| {
                // A ruleset with no session row is treated as mid-round.
                let round_ended = sessions
                    .iter()
                    .find(|s| s.get("ruleset") == Some(&row.ruleset_id))
                    .and_then(|s| s.get("inSession"))
                    .is_some_and(|in_session| in_session == "False");
                RulesetSnapshot {
                    ruleset_id: row.ruleset_id,
                    display_name: row.display_name,
                    ordinal_index,
                    round_ended,
                    last_seen: now,
                }
            })
            .collect()
    }

    /// Read `(score, kill, death)` for every player state.
    pub async fn read_leaderboards<H: Host>(&self, host: &H) -> Vec<LeaderboardRow> {
        let groups = host
            .watch_array(
                LEADERBOARD_COMMAND,
                &LEADERBOARD_HEADER,
                &LEADERBOARD_COLUMN,
                &self.options,
            )
            .await;

        groups
            .iter()
            .filter_map(|group| {
                let player_handle = group.item.get("state")?.clone();
                let columns: Vec<i64> = group
                    .members
                    .iter()
                    .filter_map(|m| m.get("column")?.parse().ok())
                    .collect();
                let columns: [i64; 3] = columns.get(..3)?.try_into().ok()?;
                Some(LeaderboardRow {
                    player_handle,
                    leaderboard: Leaderboard::from(columns),
                })
            })
            .collect()
    }
}

fn ruleset_row(row: &Row) -> Option<RulesetRow> {
    Some(RulesetRow {
        ruleset_id: row.get("ruleset")?.clone(),
        display_name: row.get("name")?.clone(),
    })
}

/// Order rulesets by id descending and assign display ordinals.
///
/// GLOBAL gets -1 and every ruleset sorted after it moves up one slot. Without
/// a GLOBAL ruleset the ordinal is the sorted position.
pub fn assign_ordinals(mut rows: Vec<RulesetRow>) -> Vec<(RulesetRow, i32)> {
    rows.sort_by(|a, b| b.ruleset_id.cmp(&a.ruleset_id));
    let global = rows
        .iter()
        .position(|r| r.display_name == GLOBAL_RULESET_NAME);

    rows.into_iter()
        .enumerate()
        .map(|(position, row)| {
            let position = position as i32;
            let ordinal = match global.map(|g| g as i32) {
                Some(g) if position == g => -1,
                Some(g) if position > g => position - 1,
                _ => position,
            };
            (row, ordinal)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, name: &str) -> RulesetRow {
        RulesetRow {
            ruleset_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn ordinals(rows: Vec<RulesetRow>) -> Vec<(String, i32)> {
        assign_ordinals(rows)
            .into_iter()
            .map(|(r, i)| (r.display_name, i))
            .collect()
    }

    #[test]
    fn test_global_is_reindexed() {
        let result = ordinals(vec![
            row("BP_Ruleset_C_1", "B"),
            row("BP_Ruleset_C_5", "A"),
            row("BP_Ruleset_C_3", "GLOBAL"),
        ]);
        assert_eq!(
            result,
            vec![
                ("A".to_string(), 0),
                ("GLOBAL".to_string(), -1),
                ("B".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_without_global_keeps_sorted_positions() {
        let result = ordinals(vec![row("BP_Ruleset_C_1", "B"), row("BP_Ruleset_C_2", "A")]);
        assert_eq!(result, vec![("A".to_string(), 0), ("B".to_string(), 1)]);
    }

    #[test]
    fn test_global_first_shifts_everyone() {
        let result = ordinals(vec![
            row("BP_Ruleset_C_9", "GLOBAL"),
            row("BP_Ruleset_C_4", "X"),
            row("BP_Ruleset_C_2", "Y"),
        ]);
        assert_eq!(
            result,
            vec![
                ("GLOBAL".to_string(), -1),
                ("X".to_string(), 0),
                ("Y".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_patterns_match_console_rows() {
        let name = "2) BP_Ruleset_C /Game/Maps/Plate/Plate.Plate:PersistentLevel.BP_Ruleset_C_2147482125.RulesetName = Hide and Seek";
        let caps = RULESET_NAME_ROW.captures(name).unwrap();
        assert_eq!(&caps["ruleset"], "BP_Ruleset_C_2147482125");
        assert_eq!(&caps["name"], "Hide and Seek");

        let session = "0) BP_Ruleset_C /Game/Maps/Plate/Plate.Plate:PersistentLevel.BP_Ruleset_C_2147482125.bInSession = False";
        assert_eq!(&IN_SESSION_ROW.captures(session).unwrap()["inSession"], "False");

        let header = "0) BP_PlayerState_C /Game/Maps/Plate/Plate.Plate:PersistentLevel.BP_PlayerState_C_2147482001.LeaderboardData =";
        assert_eq!(
            &LEADERBOARD_HEADER.captures(header).unwrap()["state"],
            "BP_PlayerState_C_2147482001"
        );
        assert_eq!(&LEADERBOARD_COLUMN.captures("\t2: -3").unwrap()["column"], "-3");
    }
}
