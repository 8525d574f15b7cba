// SQLite persistence for local state: a single key-value table holding the
// serialized collection, preferences, the metal price cache and sync settings.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::model::Coin;
use crate::prices::PriceCache;

/// Keys of the local key-value table.
pub mod keys {
    pub const COINS: &str = "coinCollection";
    /// Stored records that could not be decoded, kept verbatim.
    pub const UNREADABLE_COINS: &str = "coinCollectionUnreadable";
    pub const API_KEY: &str = "coinApiKey";
    pub const THEME: &str = "coinTrackerTheme";
    pub const METAL_PRICES: &str = "metalPricesCache";
    pub const SYNC_MODE: &str = "syncMode";
    pub const USER_ID: &str = "userId";
}

// ---------------------------------------------------------------------------
// Persisted preference types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme `{other}`")),
        }
    }
}

/// Whether mutations are mirrored to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Offline,
    Cloud,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Offline => "offline",
            SyncMode::Cloud => "cloud",
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "offline" => Ok(SyncMode::Offline),
            "cloud" => Ok(SyncMode::Cloud),
            other => Err(format!("unknown sync mode `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite-backed local storage.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    /// Pass `":memory:"` for an ephemeral database (tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS local_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned, which only happens if another thread
    /// panicked mid-query.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Raw key-value access
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM local_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read local state `{key}`"))
    }

    /// Store `value` under `key`, overwriting any previous value.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO local_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value      = excluded.value,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![key, value],
        )
        .with_context(|| format!("failed to write local state `{key}`"))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM local_state WHERE key = ?1", params![key])
            .with_context(|| format!("failed to remove local state `{key}`"))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Load the stored collection. Content that is not a JSON array is
    /// discarded (and removed) in favour of an empty collection. Individual
    /// records that fail to decode are skipped and set aside under
    /// [`keys::UNREADABLE_COINS`] so the next save cannot lose them.
    pub fn load_coins(&self) -> Result<Vec<Coin>> {
        let Some(raw) = self.get(keys::COINS)? else {
            return Ok(Vec::new());
        };

        let items = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(other) => {
                warn!("stored collection is not an array ({}), discarding", json_kind(&other));
                self.remove(keys::COINS)?;
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!("stored collection is not valid JSON ({e}), discarding");
                self.remove(keys::COINS)?;
                return Ok(Vec::new());
            }
        };

        let total = items.len();
        let mut unreadable = Vec::new();
        let mut coins = Vec::with_capacity(total);
        for item in items {
            match serde_json::from_value::<Coin>(item.clone()) {
                Ok(coin) => coins.push(coin),
                Err(e) => {
                    let id = item.get("id").cloned().unwrap_or_default();
                    warn!(%id, "setting aside unreadable stored coin: {e}");
                    unreadable.push(item);
                }
            }
        }
        if !unreadable.is_empty() {
            self.set_aside(unreadable)?;
        }
        debug!("loaded {} of {} stored coins", coins.len(), total);
        Ok(coins)
    }

    /// Records previously set aside by [`Database::load_coins`].
    pub fn unreadable_coins(&self) -> Result<Vec<serde_json::Value>> {
        let Some(raw) = self.get(keys::UNREADABLE_COINS)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(serde_json::Value::Array(items)) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }

    fn set_aside(&self, records: Vec<serde_json::Value>) -> Result<()> {
        let mut kept = self.unreadable_coins()?;
        for record in records {
            if !kept.contains(&record) {
                kept.push(record);
            }
        }
        let json = serde_json::to_string(&kept).context("failed to serialize unreadable coins")?;
        self.set(keys::UNREADABLE_COINS, &json)
    }

    /// Persist the whole collection.
    pub fn save_coins(&self, coins: &[Coin]) -> Result<()> {
        let json = serde_json::to_string(coins).context("failed to serialize collection")?;
        self.set(keys::COINS, &json)
    }

    // ------------------------------------------------------------------
    // Preferences and caches
    // ------------------------------------------------------------------

    pub fn api_key(&self) -> Result<String> {
        Ok(self.get(keys::API_KEY)?.unwrap_or_default())
    }

    pub fn set_api_key(&self, key: &str) -> Result<()> {
        self.set(keys::API_KEY, key.trim())
    }

    /// The stored theme, or `None` when the user never chose one (or the
    /// stored value is not a theme).
    pub fn theme(&self) -> Result<Option<Theme>> {
        Ok(self.get(keys::THEME)?.and_then(|t| t.parse().ok()))
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.set(keys::THEME, theme.as_str())
    }

    /// The cached price object. An unreadable cache is treated as absent.
    pub fn metal_prices(&self) -> Result<Option<PriceCache>> {
        let Some(raw) = self.get(keys::METAL_PRICES)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(cache) => Ok(Some(cache)),
            Err(e) => {
                warn!("ignoring unreadable metal price cache: {e}");
                Ok(None)
            }
        }
    }

    pub fn set_metal_prices(&self, cache: &PriceCache) -> Result<()> {
        let json = serde_json::to_string(cache).context("failed to serialize price cache")?;
        self.set(keys::METAL_PRICES, &json)
    }

    pub fn sync_mode(&self) -> Result<SyncMode> {
        Ok(self
            .get(keys::SYNC_MODE)?
            .and_then(|m| m.parse().ok())
            .unwrap_or_default())
    }

    pub fn set_sync_mode(&self, mode: SyncMode) -> Result<()> {
        self.set(keys::SYNC_MODE, mode.as_str())
    }

    pub fn user_id(&self) -> Result<Option<String>> {
        Ok(self.get(keys::USER_ID)?.filter(|u| !u.is_empty()))
    }

    pub fn set_user_id(&self, user_id: &str) -> Result<()> {
        self.set(keys::USER_ID, user_id)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::PriceCache;
    use chrono::Utc;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    #[test]
    fn open_creates_table() {
        let db = test_db();
        let conn = db.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='local_state'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn set_get_remove() {
        let db = test_db();
        assert_eq!(db.get("k").unwrap(), None);
        db.set("k", "one").unwrap();
        db.set("k", "two").unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some("two"));
        db.remove("k").unwrap();
        assert_eq!(db.get("k").unwrap(), None);
    }

    #[test]
    fn missing_collection_loads_empty() {
        assert!(test_db().load_coins().unwrap().is_empty());
    }

    #[test]
    fn malformed_collection_is_discarded() {
        let db = test_db();
        db.set(keys::COINS, "{not json").unwrap();
        assert!(db.load_coins().unwrap().is_empty());
        assert_eq!(db.get(keys::COINS).unwrap(), None);

        db.set(keys::COINS, r#"{"id": 1}"#).unwrap();
        assert!(db.load_coins().unwrap().is_empty());
        assert_eq!(db.get(keys::COINS).unwrap(), None);
    }

    #[test]
    fn unreadable_records_are_set_aside() {
        let db = test_db();
        let raw = json!([
            { "id": 1, "type": "Dime", "year": 1964 },
            { "id": "not-a-number" },
            { "id": 2, "type": "Penny", "year": 1909 }
        ]);
        db.set(keys::COINS, &raw.to_string()).unwrap();
        let coins = db.load_coins().unwrap();
        let ids: Vec<_> = coins.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);

        // Saving the readable coins and loading again keeps one copy aside.
        db.save_coins(&coins).unwrap();
        db.set(keys::COINS, &raw.to_string()).unwrap();
        db.load_coins().unwrap();
        assert_eq!(db.unreadable_coins().unwrap(), vec![json!({ "id": "not-a-number" })]);
    }

    #[test]
    fn coins_survive_save_and_load() {
        let db = test_db();
        let coin: Coin = serde_json::from_value(json!({
            "id": 3, "type": "Quarter", "displayName": "Quarter", "year": 1932
        }))
        .unwrap();
        db.save_coins(std::slice::from_ref(&coin)).unwrap();
        assert_eq!(db.load_coins().unwrap(), vec![coin]);
    }

    #[test]
    fn preferences_have_defaults() {
        let db = test_db();
        assert_eq!(db.api_key().unwrap(), "");
        assert_eq!(db.theme().unwrap(), None);
        assert_eq!(db.sync_mode().unwrap(), SyncMode::Offline);
        assert_eq!(db.user_id().unwrap(), None);
        assert!(db.metal_prices().unwrap().is_none());
    }

    #[test]
    fn preferences_persist() {
        let db = test_db();
        db.set_api_key("  ebay-key ").unwrap();
        db.set_theme(Theme::Dark).unwrap();
        db.set_sync_mode(SyncMode::Cloud).unwrap();
        db.set_user_id("uid-1").unwrap();
        assert_eq!(db.api_key().unwrap(), "ebay-key");
        assert_eq!(db.theme().unwrap(), Some(Theme::Dark));
        assert_eq!(db.sync_mode().unwrap(), SyncMode::Cloud);
        assert_eq!(db.user_id().unwrap().as_deref(), Some("uid-1"));
    }

    #[test]
    fn invalid_theme_reads_as_unset() {
        let db = test_db();
        db.set(keys::THEME, "sepia").unwrap();
        assert_eq!(db.theme().unwrap(), None);
    }

    #[test]
    fn price_cache_round_trip_and_corrupt_cache() {
        let db = test_db();
        let cache = PriceCache::fallback(Utc::now(), "offline");
        db.set_metal_prices(&cache).unwrap();
        assert_eq!(db.metal_prices().unwrap(), Some(cache));

        db.set(keys::METAL_PRICES, "[]").unwrap();
        assert!(db.metal_prices().unwrap().is_none());
    }

    #[test]
    fn theme_toggles() {
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
    }
}
