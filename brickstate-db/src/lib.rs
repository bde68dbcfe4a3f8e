mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{GLOBAL_RULESET_NAME, Leaderboard, Player, PlayerStateEntry, RulesetSnapshot, keys};

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, params};
use tracing::{debug, info};

/// Persisted minigame cache, ruleset id -> snapshot.
pub type MinigameMap = IndexMap<String, RulesetSnapshot>;

/// Persisted player state cache, player state handle -> entry.
pub type PlayerStateMap = IndexMap<String, PlayerStateEntry>;

/// Key-value store that keeps engine state across restarts.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;

                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS kv_store (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL
                    );
                    "#,
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Raw values
  // ========================================================================

  /// Read and decode the value stored under `key`.
  /// Returns None if nothing was stored.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let owned_key = key.to_string();
    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached("SELECT value FROM kv_store WHERE key = ?1")?
          .query_row(params![&owned_key], |row| row.get(0))
          .optional()
      })
      .await?;

    raw
      .map(|raw| serde_json::from_str(&raw))
      .transpose()
      .map_err(|source| DbError::Json {
        key: key.to_string(),
        source,
      })
  }

  /// Encode `value` and store it under `key`, replacing any previous value.
  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|source| DbError::Json {
      key: key.to_string(),
      source,
    })?;
    let owned_key = key.to_string();
    let bytes = raw.len();
    let now = unix_now();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
          )?
          .execute(params![&owned_key, &raw, now])?;
        Ok::<_, rusqlite::Error>(())
      })
      .await?;

    debug!(key, bytes, "stored value");
    Ok(())
  }

  /// Remove the value stored under `key`. Returns whether anything was removed.
  pub async fn delete(&self, key: &str) -> Result<bool> {
    let owned_key = key.to_string();
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM kv_store WHERE key = ?1")?
          .execute(params![&owned_key])?;
        Ok::<_, rusqlite::Error>(deleted > 0)
      })
      .await?;

    if deleted {
      debug!(key, "deleted value");
    }
    Ok(deleted)
  }

  // ========================================================================
  // Engine state
  // ========================================================================

  pub async fn load_minigame_cache(&self) -> Result<MinigameMap> {
    Ok(self.get(keys::MINIGAME_CACHE).await?.unwrap_or_default())
  }

  pub async fn save_minigame_cache(&self, cache: &MinigameMap) -> Result<()> {
    self.set(keys::MINIGAME_CACHE, cache).await
  }

  pub async fn load_player_state_cache(&self) -> Result<PlayerStateMap> {
    Ok(self.get(keys::PLAYER_STATE_CACHE).await?.unwrap_or_default())
  }

  pub async fn save_player_state_cache(&self, cache: &PlayerStateMap) -> Result<()> {
    self.set(keys::PLAYER_STATE_CACHE, cache).await
  }

  pub async fn load_subscriber_names(&self) -> Result<Vec<String>> {
    Ok(self.get(keys::SUBSCRIBER_NAMES).await?.unwrap_or_default())
  }

  pub async fn save_subscriber_names(&self, names: &[String]) -> Result<()> {
    self.set(keys::SUBSCRIBER_NAMES, names).await
  }
}

fn unix_now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}
