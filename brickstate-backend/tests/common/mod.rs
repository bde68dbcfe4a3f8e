#![allow(dead_code)]

use brickstate_backend::host::capture_row;
use brickstate_backend::matcher::JoinAttempt;
use brickstate_backend::{
    ChunkOptions, Consumer, ConsumerError, Event, Host, RetryPolicy, Row, RowGroup, Tracker,
    TrackerOptions,
};
use brickstate_db::{Database, Player};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const RULESET_NAME_COMMAND: &str = "GetAll BP_Ruleset_C RulesetName";
pub const IN_SESSION_COMMAND: &str = "GetAll BP_Ruleset_C bInSession";
pub const LEADERBOARD_COMMAND: &str = "GetAll BP_PlayerState_C LeaderboardData";

const LEVEL: &str = "/Game/Maps/Plate/Plate.Plate";

// =============================================================================
// CONSOLE OUTPUT BUILDERS
// =============================================================================

pub fn ruleset_name_line(index: usize, ruleset_id: &str, name: &str) -> String {
    format!("{index}) BP_Ruleset_C {LEVEL}:PersistentLevel.{ruleset_id}.RulesetName = {name}")
}

pub fn in_session_line(index: usize, ruleset_id: &str, in_session: bool) -> String {
    let value = if in_session { "True" } else { "False" };
    format!("{index}) BP_Ruleset_C {LEVEL}:PersistentLevel.{ruleset_id}.bInSession = {value}")
}

pub fn leaderboard_lines(index: usize, state: &str, columns: [i64; 3]) -> Vec<String> {
    let mut lines = vec![format!(
        "{index}) BP_PlayerState_C {LEVEL}:PersistentLevel.{state}.LeaderboardData ="
    )];
    lines.extend(
        columns
            .iter()
            .enumerate()
            .map(|(i, value)| format!("\t{i}: {value}")),
    );
    lines
}

// =============================================================================
// FAKE HOST
// =============================================================================

/// Scripted console: each command returns the lines stored for it.
#[derive(Default)]
pub struct FakeHost {
    outputs: Mutex<HashMap<String, Vec<String>>>,
    players: Mutex<Vec<Player>>,
    consumers: Vec<Arc<dyn Consumer>>,
    query_delay: Mutex<Option<Duration>>,
    lookup_delay: Mutex<Option<Duration>>,
}

impl FakeHost {
    pub fn new(consumers: Vec<Arc<dyn Consumer>>) -> Self {
        Self {
            consumers,
            ..Default::default()
        }
    }

    pub fn set_output(&self, command: &str, lines: Vec<String>) {
        self.outputs
            .lock()
            .unwrap()
            .insert(command.to_string(), lines);
    }

    /// Rulesets as `(id, name, in_session)`, listed in the given order.
    pub fn set_rulesets(&self, rulesets: &[(&str, &str, bool)]) {
        let names = rulesets
            .iter()
            .enumerate()
            .map(|(i, (id, name, _))| ruleset_name_line(i, id, name))
            .collect();
        let sessions = rulesets
            .iter()
            .enumerate()
            .map(|(i, (id, _, in_session))| in_session_line(i, id, *in_session))
            .collect();
        self.set_output(RULESET_NAME_COMMAND, names);
        self.set_output(IN_SESSION_COMMAND, sessions);
    }

    pub fn set_leaderboards(&self, rows: &[(&str, [i64; 3])]) {
        let lines = rows
            .iter()
            .enumerate()
            .flat_map(|(i, (state, columns))| leaderboard_lines(i, state, *columns))
            .collect();
        self.set_output(LEADERBOARD_COMMAND, lines);
    }

    pub fn add_player(&self, player: Player) {
        self.players.lock().unwrap().push(player);
    }

    pub fn remove_player(&self, name: &str) {
        self.players.lock().unwrap().retain(|p| p.name != name);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    fn lines(&self, command: &str) -> Vec<String> {
        self.outputs
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default()
    }

    async fn delay(&self) {
        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Host for FakeHost {
    async fn watch_chunk(&self, command: &str, pattern: &Regex, _options: &ChunkOptions) -> Vec<Row> {
        self.delay().await;
        self.lines(command)
            .iter()
            .filter_map(|line| pattern.captures(line).map(|caps| capture_row(pattern, &caps)))
            .collect()
    }

    async fn watch_array(
        &self,
        command: &str,
        header: &Regex,
        member: &Regex,
        _options: &ChunkOptions,
    ) -> Vec<RowGroup> {
        self.delay().await;
        let mut groups: Vec<RowGroup> = Vec::new();
        for line in self.lines(command) {
            if let Some(caps) = header.captures(&line) {
                groups.push(RowGroup {
                    item: capture_row(header, &caps),
                    members: Vec::new(),
                });
            } else if let Some(caps) = member.captures(&line) {
                if let Some(group) = groups.last_mut() {
                    group.members.push(capture_row(member, &caps));
                }
            }
        }
        groups
    }

    async fn lookup_player(&self, name_or_state: &str) -> Option<Player> {
        let delay = *self.lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.players
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name_or_state || p.state == name_or_state)
            .cloned()
    }

    async fn lookup_consumer(&self, name: &str) -> Option<Arc<dyn Consumer>> {
        self.consumers.iter().find(|c| c.name() == name).cloned()
    }
}

// =============================================================================
// CONSUMERS
// =============================================================================

/// Keeps every delivered event as `(kind, payload)`.
pub struct RecordingConsumer {
    name: String,
    loaded: bool,
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingConsumer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            loaded: true,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn unloaded(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            loaded: false,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|(kind, _)| kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Consumer for RecordingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn emit(&self, event: &Event) -> Result<(), ConsumerError> {
        self.events
            .lock()
            .unwrap()
            .push((event.kind().as_str().to_string(), event.payload()));
        Ok(())
    }
}

/// Rejects every event.
pub struct FailingConsumer(pub &'static str);

impl Consumer for FailingConsumer {
    fn name(&self) -> &str {
        self.0
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn emit(&self, _event: &Event) -> Result<(), ConsumerError> {
        Err(ConsumerError::Unavailable(self.0.to_string()))
    }
}

/// Panics on every event.
pub struct PanickingConsumer(pub &'static str);

impl Consumer for PanickingConsumer {
    fn name(&self) -> &str {
        self.0
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn emit(&self, _event: &Event) -> Result<(), ConsumerError> {
        panic!("consumer {} blew up", self.0)
    }
}

// =============================================================================
// SETUP
// =============================================================================

pub const GLOBAL_ID: &str = "BP_Ruleset_C_2147482000";
pub const ARENA_ID: &str = "BP_Ruleset_C_2147482100";
pub const RACE_ID: &str = "BP_Ruleset_C_2147482200";
pub const ALICE_STATE: &str = "BP_PlayerState_C_2147481000";
pub const ALICE_ID: &str = "01234567-89ab-cdef-0123-456789abcdef";

pub async fn setup_test_db() -> Database {
    Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database")
}

/// Options with short retries and no random pruning.
pub fn test_options() -> TrackerOptions {
    TrackerOptions {
        retry: RetryPolicy {
            limit: 3,
            delay: Duration::from_millis(100),
        },
        prune_probability: 0.0,
        ..TrackerOptions::default()
    }
}

pub fn alice() -> Player {
    Player {
        name: "Alice".to_string(),
        id: None,
        state: ALICE_STATE.to_string(),
    }
}

pub fn join_attempt(player: &str, minigame: &str) -> JoinAttempt {
    JoinAttempt {
        player_name: player.to_string(),
        player_id: Uuid::parse_str(ALICE_ID).unwrap(),
        ruleset_display_name: minigame.to_string(),
        observed_at: 0,
    }
}

/// Tracker over a fake host with GLOBAL, Arena and Race running, Alice online
/// and a recording consumer subscribed.
pub async fn setup_tracker() -> (Arc<Tracker<FakeHost>>, Arc<RecordingConsumer>) {
    let recorder = RecordingConsumer::new("recorder");
    let host = FakeHost::new(vec![recorder.clone() as Arc<dyn Consumer>]);
    host.set_rulesets(&[
        (GLOBAL_ID, "GLOBAL", true),
        (ARENA_ID, "Arena", true),
        (RACE_ID, "Race", true),
    ]);
    host.add_player(alice());

    let tracker = Arc::new(Tracker::new(host, setup_test_db().await, test_options()));
    assert!(tracker.subscribe("recorder").await);
    tracker.poll_minigames().await;
    (tracker, recorder)
}
