//! Named buckets of cached HTTP responses, keyed by request URL.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// An HTTP response as seen by the interception layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub url: String,
    pub response: HttpResponse,
    pub stored_at: DateTime<Utc>,
}

/// SQLite-backed response buckets. Owned by the offline worker.
pub struct ResponseCache {
    conn: Mutex<Connection>,
}

impl ResponseCache {
    /// Open (or create) the cache at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Create an in-memory cache (tests and ephemeral sessions).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                bucket TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                content_type TEXT,
                body BLOB NOT NULL,
                stored_at_ms INTEGER NOT NULL,
                PRIMARY KEY (bucket, url)
            );

            CREATE INDEX IF NOT EXISTS idx_responses_stored ON responses(bucket, stored_at_ms DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn put(&self, bucket: &str, url: &str, response: &HttpResponse) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO responses
            (bucket, url, status, content_type, body, stored_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                bucket,
                url,
                response.status,
                response.content_type,
                response.body,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Exact URL lookup
    pub fn lookup(&self, bucket: &str, url: &str) -> Result<Option<CachedResponse>> {
        let conn = self.conn.lock();
        let cached = conn
            .query_row(
                "SELECT url, status, content_type, body, stored_at_ms FROM responses
                 WHERE bucket = ?1 AND url = ?2",
                params![bucket, url],
                Self::row_to_cached,
            )
            .optional()?;
        Ok(cached)
    }

    /// Most recently stored response in `bucket`
    pub fn latest(&self, bucket: &str) -> Result<Option<CachedResponse>> {
        let conn = self.conn.lock();
        let cached = conn
            .query_row(
                "SELECT url, status, content_type, body, stored_at_ms FROM responses
                 WHERE bucket = ?1 ORDER BY stored_at_ms DESC, rowid DESC LIMIT 1",
                params![bucket],
                Self::row_to_cached,
            )
            .optional()?;
        Ok(cached)
    }

    pub fn bucket_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT bucket FROM responses ORDER BY bucket")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to read bucket names: {}", e))?;
        Ok(names)
    }

    /// Number of responses in `bucket`
    pub fn len(&self, bucket: &str) -> Result<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM responses WHERE bucket = ?1",
            params![bucket],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Drop a whole bucket. Returns whether anything was stored in it.
    pub fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM responses WHERE bucket = ?1", params![bucket])?;
        Ok(removed > 0)
    }

    fn row_to_cached(row: &Row<'_>) -> rusqlite::Result<CachedResponse> {
        let stored_at_ms: i64 = row.get(4)?;
        Ok(CachedResponse {
            url: row.get(0)?,
            response: HttpResponse {
                status: row.get(1)?,
                content_type: row.get(2)?,
                body: row.get(3)?,
            },
            stored_at: Utc
                .timestamp_millis_opt(stored_at_ms)
                .single()
                .unwrap_or_default(),
        })
    }
}
