//! Persisted local preferences: units, recent searches, favorites and the
//! last resolved device location.
//!
//! Values are JSON under `weatherflow:` keys. Every write is announced on a
//! broadcast channel so other sessions sharing the database can refresh;
//! delivery is best-effort and a session's own in-memory state wins.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::broadcast;

use weatherflow_core::Units;
use weatherflow_weather::GeoPoint;

pub const KEY_UNITS: &str = "weatherflow:units";
pub const KEY_RECENT_SEARCHES: &str = "weatherflow:recent-searches";
pub const KEY_FAVORITES: &str = "weatherflow:favorites";
pub const KEY_LAST_LOCATION: &str = "weatherflow:last-location";

pub const MAX_RECENT_SEARCHES: usize = 6;

/// Two favorites within this many degrees on both axes are the same place
const SAME_PLACE_DEGREES: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub added_at: DateTime<Utc>,
}

impl Favorite {
    pub fn from_point(point: &GeoPoint) -> Self {
        Self {
            name: point.name.clone().unwrap_or_else(|| point.label()),
            country: point.country.clone(),
            lat: point.lat,
            lon: point.lon,
            added_at: Utc::now(),
        }
    }

    pub fn matches(&self, point: &GeoPoint) -> bool {
        let name = point.name.clone().unwrap_or_else(|| point.label());
        self.name == name
            && self.country == point.country
            && (self.lat - point.lat).abs() < SAME_PLACE_DEGREES
            && (self.lon - point.lon).abs() < SAME_PLACE_DEGREES
    }

    pub fn to_point(&self) -> GeoPoint {
        GeoPoint::named(self.lat, self.lon, self.name.clone(), self.country.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastLocation {
    pub point: GeoPoint,
    pub resolved_at: DateTime<Utc>,
}

pub struct LocalStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StorageChange>,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open local store at {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (tests and ephemeral sessions).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        let (changes, _) = broadcast::channel(32);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Receive a [`StorageChange`] for every subsequent write
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    /// Read a JSON value. Unreadable values are treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;

        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring unreadable value for {}: {}", key, e);
                None
            }
        }))
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize value for {}", key))?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, json, Utc::now().timestamp_millis()],
        )?;
        self.notify(key);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        if removed > 0 {
            self.notify(key);
        }
        Ok(removed > 0)
    }

    fn notify(&self, key: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
    }

    pub fn units(&self) -> Result<Option<Units>> {
        self.get_json(KEY_UNITS)
    }

    pub fn set_units(&self, units: Units) -> Result<()> {
        self.set_json(KEY_UNITS, &units)
    }

    /// Recent searches, most recent first
    pub fn recent_searches(&self) -> Result<Vec<String>> {
        Ok(self.get_json(KEY_RECENT_SEARCHES)?.unwrap_or_default())
    }

    /// Record `query` as the most recent search. Exact duplicates move to the
    /// front; the list keeps at most [`MAX_RECENT_SEARCHES`] entries.
    pub fn push_recent_search(&self, query: &str) -> Result<Vec<String>> {
        let query = query.trim();
        let mut recent = self.recent_searches()?;
        if query.is_empty() {
            return Ok(recent);
        }

        recent.retain(|existing| existing != query);
        recent.insert(0, query.to_string());
        recent.truncate(MAX_RECENT_SEARCHES);
        self.set_json(KEY_RECENT_SEARCHES, &recent)?;
        Ok(recent)
    }

    pub fn clear_recent_searches(&self) -> Result<()> {
        self.remove(KEY_RECENT_SEARCHES)?;
        Ok(())
    }

    pub fn favorites(&self) -> Result<Vec<Favorite>> {
        Ok(self.get_json(KEY_FAVORITES)?.unwrap_or_default())
    }

    pub fn is_favorite(&self, point: &GeoPoint) -> Result<bool> {
        Ok(self.favorites()?.iter().any(|f| f.matches(point)))
    }

    /// Returns false if the place is already a favorite.
    pub fn add_favorite(&self, point: &GeoPoint) -> Result<bool> {
        let mut favorites = self.favorites()?;
        if favorites.iter().any(|f| f.matches(point)) {
            return Ok(false);
        }
        favorites.push(Favorite::from_point(point));
        self.set_json(KEY_FAVORITES, &favorites)?;
        tracing::debug!("Added favorite {}", point.label());
        Ok(true)
    }

    pub fn remove_favorite(&self, point: &GeoPoint) -> Result<bool> {
        let mut favorites = self.favorites()?;
        let before = favorites.len();
        favorites.retain(|f| !f.matches(point));
        if favorites.len() == before {
            return Ok(false);
        }
        self.set_json(KEY_FAVORITES, &favorites)?;
        Ok(true)
    }

    pub fn last_location(&self) -> Result<Option<LastLocation>> {
        self.get_json(KEY_LAST_LOCATION)
    }

    pub fn set_last_location(&self, point: &GeoPoint) -> Result<()> {
        self.set_json(
            KEY_LAST_LOCATION,
            &LastLocation {
                point: point.clone(),
                resolved_at: Utc::now(),
            },
        )
    }
}
