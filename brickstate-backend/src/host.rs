//! Capabilities the engine consumes from the environment it runs in.

use crate::error::ConsumerError;
use crate::events::Event;
use brickstate_db::Player;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Named capture groups of one matched console line.
pub type Row = HashMap<String, String>;

/// A header row and the indented member rows that followed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowGroup {
    pub item: Row,
    pub members: Vec<Row>,
}

/// How a bulk console query collects its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Capture group whose value `0` marks the first row of the chunk
    pub first_key: Option<String>,
    /// Give up after this long and return what was captured
    pub timeout: Duration,
    /// Stop once no row matched for this long after the last match
    pub after_match_delay: Duration,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            first_key: Some("index".to_string()),
            timeout: Duration::from_millis(5000),
            after_match_delay: Duration::from_millis(100),
        }
    }
}

/// Something that can receive a named event with a payload.
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;

    fn is_loaded(&self) -> bool;

    fn emit(&self, event: &Event) -> Result<(), ConsumerError>;
}

/// The game server side of the engine: console queries and lookups.
///
/// Queries never fail. A timed out or interrupted query yields whatever rows
/// were captured, possibly none.
pub trait Host: Send + Sync + 'static {
    /// Run `command` and collect every output line matching `pattern`.
    fn watch_chunk(
        &self,
        command: &str,
        pattern: &Regex,
        options: &ChunkOptions,
    ) -> impl Future<Output = Vec<Row>> + Send;

    /// Run `command` and group `member` lines under the preceding `header` line.
    fn watch_array(
        &self,
        command: &str,
        header: &Regex,
        member: &Regex,
        options: &ChunkOptions,
    ) -> impl Future<Output = Vec<RowGroup>> + Send;

    /// Find a connected player by display name or state handle.
    fn lookup_player(&self, name_or_state: &str) -> impl Future<Output = Option<Player>> + Send;

    /// Find a consumer by name.
    fn lookup_consumer(&self, name: &str)
    -> impl Future<Output = Option<Arc<dyn Consumer>>> + Send;
}

/// Collect the named groups of `caps` into a [`Row`].
pub fn capture_row(pattern: &Regex, caps: &Captures<'_>) -> Row {
    pattern
        .capture_names()
        .flatten()
        .filter_map(|name| {
            caps.name(name)
                .map(|m| (name.to_string(), m.as_str().to_string()))
        })
        .collect()
}
