//! The reconciliation engine.
//!
//! `Tracker` owns both caches behind one mutex so the polls and the join/leave
//! path never lose each other's updates. Events are dispatched only after the
//! mutation they describe is committed and the lock is released.

use crate::dispatch::Dispatcher;
use crate::events::{Event, JoinEvent, LeaderboardEvent, LeaveEvent, MinigameRef};
use crate::helpers::now_ms;
use crate::host::{ChunkOptions, Host};
use crate::log_line::LogLine;
use crate::matcher::{DedupOptions, JoinAttempt, JoinMatcher};
use crate::minigames::MinigameCache;
use crate::players::{LeaderboardChange, LeaderboardPolicy, PlayerStateCache};
use crate::snapshot::SnapshotReader;
use brickstate_db::{Database, MinigameMap, Player, PlayerStateEntry, PlayerStateMap, RulesetSnapshot};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Bounded retry of join attempts whose player or minigame is not visible yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first try
    pub limit: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 20,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub minigame_check_interval: Duration,
    pub leaderboard_check_interval: Duration,
    pub retry: RetryPolicy,
    pub query: ChunkOptions,
    pub dedup: DedupOptions,
    pub minigame_max_age_ms: i64,
    pub player_max_age_ms: i64,
    /// Chance in `[0, 1]` that a poll ends with a prune sweep
    pub prune_probability: f64,
    pub leaderboard_on_join: LeaderboardPolicy,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        crate::config::Config::default().tracker_options()
    }
}

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The previous run of the same poll had not finished
    InFlight,
    /// Nobody is subscribed, nothing was queried
    NoSubscribers,
    Completed { events: usize },
}

/// Final state of one join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Resolved(JoinEvent),
    Abandoned { retries: u32 },
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum PollKind {
    Minigames,
    Leaderboards,
}

/// Current engine state, as served by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub minigames: Vec<RulesetSnapshot>,
    pub players: Vec<PlayerStatus>,
    pub subscribers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub state: String,
    #[serde(flatten)]
    pub entry: PlayerStateEntry,
}

#[derive(Debug, Default)]
struct Caches {
    minigames: MinigameCache,
    players: PlayerStateCache,
}

/// Resets its flag when dropped, so a panicking poll cannot wedge the guard.
struct SingleFlight<'a>(&'a AtomicBool);

impl<'a> SingleFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Tracker<H> {
    host: H,
    db: Database,
    options: TrackerOptions,
    caches: Mutex<Caches>,
    matcher: JoinMatcher,
    dispatcher: Dispatcher,
    reader: SnapshotReader,
    minigame_poll: AtomicBool,
    leaderboard_poll: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl<H: Host> Tracker<H> {
    pub fn new(host: H, db: Database, options: TrackerOptions) -> Self {
        Self {
            matcher: JoinMatcher::new(options.dedup.clone()),
            dispatcher: Dispatcher::new(db.clone()),
            reader: SnapshotReader::new(options.query.clone()),
            host,
            db,
            options,
            caches: Mutex::new(Caches::default()),
            minigame_poll: AtomicBool::new(false),
            leaderboard_poll: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn subscribe(&self, name: &str) -> bool {
        self.dispatcher.subscribe(&self.host, name).await
    }

    pub async fn unsubscribe(&self, name: &str) {
        self.dispatcher.unsubscribe(name).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load caches and subscribers persisted by a previous run.
    pub async fn restore(&self) -> brickstate_db::Result<()> {
        let minigames = self.db.load_minigame_cache().await?;
        let players = self.db.load_player_state_cache().await?;
        info!(
            minigames = minigames.len(),
            players = players.len(),
            "restoring caches"
        );
        {
            let mut caches = self.caches.lock().await;
            caches.minigames = MinigameCache::from_map(minigames);
            caches.players = PlayerStateCache::from_map(players);
        }
        self.dispatcher.restore(&self.host).await
    }

    /// Write both caches to the database.
    pub async fn persist(&self) -> brickstate_db::Result<()> {
        let (minigames, players) = self.caches().await;
        self.db.save_minigame_cache(&minigames).await?;
        self.db.save_player_state_cache(&players).await?;
        debug!(
            minigames = minigames.len(),
            players = players.len(),
            "persisted caches"
        );
        Ok(())
    }

    /// Start both poll loops.
    pub fn start(self: &Arc<Self>) {
        self.spawn_poll_loop(PollKind::Minigames, self.options.minigame_check_interval);
        self.spawn_poll_loop(PollKind::Leaderboards, self.options.leaderboard_check_interval);
        info!(
            minigame_interval_ms = self.options.minigame_check_interval.as_millis() as u64,
            leaderboard_interval_ms = self.options.leaderboard_check_interval.as_millis() as u64,
            "tracker started"
        );
    }

    /// Stop polling, abandon pending join retries, then persist the caches.
    /// A poll already past its tick finishes first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        if let Err(e) = self.persist().await {
            error!(error = %e, "failed to persist caches on shutdown");
        }
        info!("tracker stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of poll loops, polls and join attempts still running.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// The game server (re)started. Everything cached is stale.
    pub async fn server_started(&self) {
        {
            let mut caches = self.caches.lock().await;
            caches.minigames.clear();
            caches.players.clear();
        }
        self.matcher.clear().await;
        info!("server started, caches cleared");
    }

    pub async fn caches(&self) -> (MinigameMap, PlayerStateMap) {
        let caches = self.caches.lock().await;
        (
            caches.minigames.as_map().clone(),
            caches.players.as_map().clone(),
        )
    }

    pub async fn status(&self) -> TrackerStatus {
        let (minigames, players) = self.caches().await;
        TrackerStatus {
            minigames: minigames.into_values().collect(),
            players: players
                .into_iter()
                .map(|(state, entry)| PlayerStatus { state, entry })
                .collect(),
            subscribers: self.dispatcher.subscriber_names().await,
        }
    }

    // ========================================================================
    // Joins and leaves
    // ========================================================================

    /// Feed one raw console line. Returns whether it started a join attempt.
    pub async fn handle_line(self: &Arc<Self>, raw: &str) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        let line = LogLine::parse(raw);
        let Some(attempt) = self.matcher.match_line(&line).await else {
            return false;
        };
        debug!(
            player = %attempt.player_name,
            minigame = %attempt.ruleset_display_name,
            "join attempt"
        );

        let tracker = Arc::clone(self);
        self.tasks.spawn(async move {
            tracker.resolve_join(attempt).await;
        });
        true
    }

    /// Resolve a join attempt, retrying while the player or minigame is not
    /// visible yet. Gives up silently once the retry limit is reached, and
    /// without any event once shutdown has begun.
    pub async fn resolve_join(&self, attempt: JoinAttempt) -> JoinOutcome {
        let mut retries = 0;
        loop {
            let resolved = tokio::select! {
                _ = self.cancel.cancelled() => return JoinOutcome::Cancelled,
                resolved = self.try_resolve(&attempt) => resolved,
            };
            if let Some((player, minigame)) = resolved {
                if self.is_shutting_down() {
                    return JoinOutcome::Cancelled;
                }
                return JoinOutcome::Resolved(self.join(player, &minigame).await);
            }
            if retries >= self.options.retry.limit {
                debug!(
                    player = %attempt.player_name,
                    minigame = %attempt.ruleset_display_name,
                    retries,
                    "join attempt abandoned"
                );
                return JoinOutcome::Abandoned { retries };
            }
            retries += 1;
            tokio::select! {
                _ = self.cancel.cancelled() => return JoinOutcome::Cancelled,
                _ = sleep(self.options.retry.delay) => {}
            }
        }
    }

    async fn try_resolve(&self, attempt: &JoinAttempt) -> Option<(Player, RulesetSnapshot)> {
        let mut player = self.host.lookup_player(&attempt.player_name).await?;
        player.id.get_or_insert(attempt.player_id);
        let minigame = self
            .caches
            .lock()
            .await
            .minigames
            .find_by_name(&attempt.ruleset_display_name)
            .cloned()?;
        Some((player, minigame))
    }

    /// Move a player into `minigame`: leave from the previous one first, then join.
    async fn join(&self, player: Player, minigame: &RulesetSnapshot) -> JoinEvent {
        let event = JoinEvent {
            player,
            minigame: MinigameRef::from(minigame),
        };
        self.leave(&event.player, Some(&event)).await;
        self.dispatcher
            .dispatch(&Event::JoinMinigame(event.clone()))
            .await;
        info!(
            player = %event.player.name,
            minigame = %event.minigame.name,
            ruleset = %event.minigame.ruleset,
            "player joined minigame"
        );
        event
    }

    /// Take a player out of their current minigame.
    ///
    /// With a join context the player is moved to that minigame, without one
    /// (a disconnect) the player stops being tracked. The leave event is only
    /// sent if the previous minigame is still cached.
    pub async fn leave(&self, player: &Player, join: Option<&JoinEvent>) -> Option<LeaveEvent> {
        let now = now_ms();
        let previous = {
            let mut guard = self.caches.lock().await;
            let caches = &mut *guard;
            let previous = caches
                .players
                .current_minigame(&player.state, &caches.minigames)
                .cloned();
            match join {
                Some(join) => caches.players.enter(
                    player,
                    &join.minigame.ruleset,
                    now,
                    self.options.leaderboard_on_join,
                ),
                None => {
                    caches.players.remove(&player.state);
                }
            }
            previous
        };

        let event = LeaveEvent {
            player: player.clone(),
            minigame: previous?,
            new_minigame: join.map(|j| j.minigame.clone()),
        };
        self.dispatcher
            .dispatch(&Event::LeaveMinigame(event.clone()))
            .await;
        debug!(
            player = %player.name,
            minigame = %event.minigame.display_name,
            "player left minigame"
        );
        Some(event)
    }

    /// A player disconnected from the server.
    pub async fn player_disconnected(&self, name: &str) -> Option<LeaveEvent> {
        let player = match self.host.lookup_player(name).await {
            Some(player) => player,
            None => {
                let caches = self.caches.lock().await;
                let cached = caches
                    .players
                    .handle_by_name(name)
                    .and_then(|handle| caches.players.get(handle))
                    .and_then(|entry| entry.player.clone());
                let Some(player) = cached else {
                    debug!(player = name, "disconnected player was not tracked");
                    return None;
                };
                player
            }
        };
        self.leave(&player, None).await
    }

    // ========================================================================
    // Polls
    // ========================================================================

    /// Query all rulesets and report round transitions.
    pub async fn poll_minigames(&self) -> PollOutcome {
        let Some(_flight) = SingleFlight::acquire(&self.minigame_poll) else {
            debug!("minigame poll still running, tick skipped");
            return PollOutcome::InFlight;
        };
        if !self.dispatcher.has_subscribers().await {
            return PollOutcome::NoSubscribers;
        }

        let now = now_ms();
        let latest = self.reader.read_minigames(&self.host, now).await;
        let transitions = {
            let mut caches = self.caches.lock().await;
            let transitions = caches.minigames.reconcile(latest);
            if self.should_prune() {
                let pruned = caches.minigames.prune(now - self.options.minigame_max_age_ms);
                if pruned > 0 {
                    debug!(pruned, "pruned stale minigames");
                }
            }
            transitions
        };

        let mut events = 0;
        for snapshot in transitions.started {
            info!(ruleset = %snapshot.ruleset_id, minigame = %snapshot.display_name, "round started");
            self.dispatcher.dispatch(&Event::RoundChange(snapshot)).await;
            events += 1;
        }
        for snapshot in transitions.ended {
            info!(ruleset = %snapshot.ruleset_id, minigame = %snapshot.display_name, "round ended");
            self.dispatcher.dispatch(&Event::RoundEnd(snapshot)).await;
            events += 1;
        }
        PollOutcome::Completed { events }
    }

    /// Query all leaderboards and report changes of tracked players.
    pub async fn poll_leaderboards(&self) -> PollOutcome {
        let Some(_flight) = SingleFlight::acquire(&self.leaderboard_poll) else {
            debug!("leaderboard poll still running, tick skipped");
            return PollOutcome::InFlight;
        };
        if !self.dispatcher.has_subscribers().await {
            return PollOutcome::NoSubscribers;
        }

        let now = now_ms();
        let rows = self.reader.read_leaderboards(&self.host).await;
        let changes: Vec<LeaderboardChange> = {
            let mut guard = self.caches.lock().await;
            let caches = &mut *guard;
            let mut changes = Vec::new();
            for row in rows {
                if let Some(change) = caches.players.apply_leaderboard(
                    &row.player_handle,
                    row.leaderboard,
                    &caches.minigames,
                    now,
                ) {
                    changes.push(change);
                }
            }
            if self.should_prune() {
                let pruned = caches.players.prune(now - self.options.player_max_age_ms);
                if pruned > 0 {
                    debug!(pruned, "pruned stale player states");
                }
            }
            changes
        };

        let mut events = 0;
        for change in changes {
            let player = match change.player {
                Some(player) => Some(player),
                None => self.host.lookup_player(&change.player_handle).await,
            };
            let payload = LeaderboardEvent {
                player,
                leaderboard: change.new,
                old_leaderboard: change.old,
                minigame: change.minigame,
            };
            self.dispatcher
                .dispatch(&Event::LeaderboardChange(payload.clone()))
                .await;
            events += 1;
            for kind in change.increments {
                if let Some(event) = Event::increment(kind, payload.clone()) {
                    self.dispatcher.dispatch(&event).await;
                    events += 1;
                }
            }
        }
        PollOutcome::Completed { events }
    }

    fn should_prune(&self) -> bool {
        rand::random::<f64>() < self.options.prune_probability
    }

    fn spawn_poll_loop(self: &Arc<Self>, kind: PollKind, period: Duration) {
        let tracker = Arc::clone(self);
        self.tasks.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tracker.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Each tick runs on its own task; the single-flight guard
                        // drops ticks that overlap a slow query. A started poll
                        // runs to completion so cached edges are always dispatched.
                        let poll = Arc::clone(&tracker);
                        tracker.tasks.spawn(async move {
                            poll.poll(kind).await;
                        });
                    }
                }
            }
            debug!(?kind, "poll loop stopped");
        });
    }

    async fn poll(&self, kind: PollKind) -> PollOutcome {
        match kind {
            PollKind::Minigames => self.poll_minigames().await,
            PollKind::Leaderboards => self.poll_leaderboards().await,
        }
    }
}
