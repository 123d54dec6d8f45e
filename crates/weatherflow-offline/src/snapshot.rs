//! Last-known-good weather snapshots.
//!
//! One slot per payload kind, each overwritten on every successful fetch.
//! Snapshots are only read when the live path has failed, and always carry
//! their capture time so they are never mistaken for live data.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use weatherflow_core::Units;
use weatherflow_weather::format::format_snapshot_age;
use weatherflow_weather::{CurrentWeather, Forecast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Current,
    Forecast,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum SnapshotData {
    Current(CurrentWeather),
    Forecast(Forecast),
}

impl SnapshotData {
    pub fn kind(&self) -> SnapshotKind {
        match self {
            Self::Current(_) => SnapshotKind::Current,
            Self::Forecast(_) => SnapshotKind::Forecast,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: SnapshotData,
    pub captured_at: DateTime<Utc>,
    pub location_label: String,
    pub units: Units,
}

impl Snapshot {
    /// Snapshot captured now
    pub fn new(data: SnapshotData, location_label: impl Into<String>, units: Units) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
            location_label: location_label.into(),
            units,
        }
    }

    pub fn kind(&self) -> SnapshotKind {
        self.data.kind()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).max(Duration::zero())
    }

    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }

    /// Staleness indicator, e.g. "Offline data - last updated 12 minutes ago"
    pub fn staleness_label(&self, now: DateTime<Utc>) -> String {
        format!(
            "Offline data - last updated {}",
            format_snapshot_age(self.captured_at, now)
        )
    }
}

/// SQLite-backed snapshot store. The only writer of snapshot rows.
///
/// Keeps one row per [`SnapshotKind`]; [`SnapshotStore::load`] returns the
/// newest of them, which is the single most recent successful response.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open snapshot store at {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (tests and ephemeral sessions).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                kind TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                captured_at_ms INTEGER NOT NULL,
                location_label TEXT NOT NULL,
                units TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Persist `snapshot`, replacing the previous one of the same kind.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let data_json =
            serde_json::to_string(&snapshot.data).context("Failed to serialize snapshot")?;

        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO snapshots
            (kind, data_json, captured_at_ms, location_label, units)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                snapshot.kind().as_str(),
                data_json,
                snapshot.captured_at.timestamp_millis(),
                snapshot.location_label,
                snapshot.units.as_str(),
            ],
        )?;

        tracing::info!(
            "Saved {} snapshot for {}",
            snapshot.kind().as_str(),
            snapshot.location_label
        );
        Ok(())
    }

    /// Most recently captured snapshot of any kind
    pub fn load(&self) -> Result<Option<Snapshot>> {
        self.query_one(
            "SELECT data_json, captured_at_ms, location_label, units FROM snapshots
             ORDER BY captured_at_ms DESC LIMIT 1",
            [],
        )
    }

    pub fn load_kind(&self, kind: SnapshotKind) -> Result<Option<Snapshot>> {
        self.query_one(
            "SELECT data_json, captured_at_ms, location_label, units FROM snapshots WHERE kind = ?1",
            [kind.as_str()],
        )
    }

    /// Explicit user action only; nothing else deletes snapshots.
    pub fn clear(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM snapshots", [])?;
        tracing::info!("Cleared offline snapshots");
        Ok(())
    }

    fn query_one<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(sql, params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        let Some((data_json, captured_at_ms, location_label, units)) = row else {
            return Ok(None);
        };

        let data = match serde_json::from_str::<SnapshotData>(&data_json) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Ignoring unreadable snapshot: {}", e);
                return Ok(None);
            }
        };
        let Some(captured_at) = Utc.timestamp_millis_opt(captured_at_ms).single() else {
            tracing::warn!("Ignoring snapshot with invalid timestamp {}", captured_at_ms);
            return Ok(None);
        };

        Ok(Some(Snapshot {
            data,
            captured_at,
            location_label,
            units: units.parse().unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use chrono::NaiveDate;
    use weatherflow_weather::{codes, DailyForecast, GeoPoint};

    fn forecast() -> Forecast {
        Forecast {
            coord: GeoPoint::new(51.5074, -0.1278),
            utc_offset_seconds: 0,
            daily: vec![DailyForecast {
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                temp_min: 9.0,
                temp_max: 18.0,
                conditions: vec![codes::condition(61, true)],
            }],
            hourly: None,
            units: Units::Metric,
        }
    }

    fn snapshot_at(data: SnapshotData, captured_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            data,
            captured_at,
            location_label: "London, GB".to_string(),
            units: Units::Metric,
        }
    }

    #[test]
    fn test_empty_store_has_no_snapshot() {
        let store = SnapshotStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = SnapshotStore::in_memory().unwrap();
        let captured = Utc.timestamp_millis_opt(1_714_557_600_000).unwrap();
        let snapshot = snapshot_at(SnapshotData::Forecast(forecast()), captured);

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.kind(), SnapshotKind::Forecast);
    }

    #[test]
    fn test_save_overwrites_same_kind() {
        let store = SnapshotStore::in_memory().unwrap();
        let first = Utc.timestamp_millis_opt(1_000_000).unwrap();
        let second = Utc.timestamp_millis_opt(2_000_000).unwrap();

        store.save(&snapshot_at(SnapshotData::Forecast(forecast()), first)).unwrap();
        let mut newer = snapshot_at(SnapshotData::Forecast(forecast()), second);
        newer.location_label = "Paris, FR".to_string();
        store.save(&newer).unwrap();

        let loaded = store.load_kind(SnapshotKind::Forecast).unwrap().unwrap();
        assert_eq!(loaded.captured_at, second);
        assert_eq!(loaded.location_label, "Paris, FR");
        assert!(store.load_kind(SnapshotKind::Current).unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let store = SnapshotStore::in_memory().unwrap();
        store.save(&Snapshot::new(SnapshotData::Forecast(forecast()), "London", Units::Metric)).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.db");

        {
            let store = SnapshotStore::new(&path).unwrap();
            store
                .save(&Snapshot::new(SnapshotData::Forecast(forecast()), "London, GB", Units::Imperial))
                .unwrap();
        }

        let reopened = SnapshotStore::new(&path).unwrap();
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded.units, Units::Imperial);
        assert_eq!(loaded.location_label, "London, GB");
    }

    #[test]
    fn test_age_and_staleness_label() {
        let now = Utc::now();
        let snapshot = snapshot_at(SnapshotData::Forecast(forecast()), now - Duration::minutes(90));

        assert_eq!(snapshot.age(now), Duration::minutes(90));
        assert!(snapshot.is_older_than(Duration::hours(1), now));
        assert!(!snapshot.is_older_than(Duration::hours(2), now));
        assert_eq!(
            snapshot.staleness_label(now),
            "Offline data - last updated 1 hour ago"
        );
    }
}
