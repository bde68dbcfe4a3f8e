//! Authoritative ruleset cache and round transition detection.

use brickstate_db::{MinigameMap, RulesetSnapshot};
use tracing::debug;

/// Round edges found by one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundTransitions {
    /// Rulesets whose round went from ended to running
    pub started: Vec<RulesetSnapshot>,
    /// Rulesets whose round went from running to ended
    pub ended: Vec<RulesetSnapshot>,
}

impl RoundTransitions {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.ended.is_empty()
    }
}

/// ruleset id -> latest snapshot, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct MinigameCache {
    entries: MinigameMap,
}

impl MinigameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: MinigameMap) -> Self {
        Self { entries }
    }

    pub fn as_map(&self) -> &MinigameMap {
        &self.entries
    }

    pub fn get(&self, ruleset_id: &str) -> Option<&RulesetSnapshot> {
        self.entries.get(ruleset_id)
    }

    /// First cached ruleset with this display name. Names are not unique.
    pub fn find_by_name(&self, display_name: &str) -> Option<&RulesetSnapshot> {
        self.entries
            .values()
            .find(|snapshot| snapshot.display_name == display_name)
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

    /// Merge a fresh poll into the cache and report round edges.
    ///
    /// A ruleset seen for the first time is stored without an event. Every
    /// sighting replaces the cached snapshot so `last_seen` stays current.
    pub fn reconcile(
        &mut self,
        latest: impl IntoIterator<Item = RulesetSnapshot>,
    ) -> RoundTransitions {
        let mut transitions = RoundTransitions::default();

        for snapshot in latest {
            match self.entries.get_mut(&snapshot.ruleset_id) {
                None => {
                    debug!(ruleset = %snapshot.ruleset_id, name = %snapshot.display_name, "new ruleset");
                    self.entries.insert(snapshot.ruleset_id.clone(), snapshot);
                }
                Some(cached) => {
                    match (cached.round_ended, snapshot.round_ended) {
                        (true, false) => transitions.started.push(snapshot.clone()),
                        (false, true) => transitions.ended.push(snapshot.clone()),
                        _ => {}
                    }
                    *cached = snapshot;
                }
            }
        }

        transitions
    }

    /// Drop rulesets not seen since `cutoff`. GLOBAL is always kept.
    pub fn prune(&mut self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, snapshot| snapshot.is_global() || snapshot.last_seen >= cutoff);
        before - self.entries.len()
    }
}
