//! Durable key-value store
//!
//! Sqlite-backed local store holding the three record collections the
//! cache engine persists between runs:
//! - `config`: last-write-wins key/value pairs (offline mode flag,
//!   install timestamp, active cache version)
//! - `pending_mutations`: writes attempted while offline, queued for
//!   replay by the reconnection synchronizer
//! - `cache_metadata`: which bucket owns a cached URL and when it was
//!   last written, consulted for staleness decisions
//!
//! The store is the sole serialization point for multi-step reads and
//! writes: every read-modify-write runs inside a sqlite transaction.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Current schema version recorded in `PRAGMA user_version`
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_mutations (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    route      TEXT NOT NULL,
    method     TEXT NOT NULL,
    headers    TEXT NOT NULL,
    body       BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    synced     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_pending_route ON pending_mutations(route);
CREATE INDEX IF NOT EXISTS idx_pending_created ON pending_mutations(created_at);

CREATE TABLE IF NOT EXISTS cache_metadata (
    url        TEXT PRIMARY KEY,
    bucket     TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metadata_bucket ON cache_metadata(bucket);
CREATE INDEX IF NOT EXISTS idx_metadata_updated ON cache_metadata(updated_at);
"#;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("pending mutation {0} not found")]
    MutationNotFound(i64),

    #[error("timestamp {0} out of range")]
    BadTimestamp(i64),
}

/// A write queued while the device was offline, awaiting replay
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub id: i64,
    pub route: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
}

/// Input for queueing a new pending mutation
#[derive(Debug, Clone)]
pub struct NewMutation {
    pub route: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Ownership and freshness record for a cached URL
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetadataRecord {
    pub url: String,
    pub bucket: String,
    pub updated_at: DateTime<Utc>,
}

impl CacheMetadataRecord {
    /// Age of the record relative to now
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.updated_at
    }

    /// Whether the record is older than the given staleness threshold
    pub fn is_stale(&self, threshold: chrono::Duration) -> bool {
        self.age() > threshold
    }
}

/// Durable key-value store shared by the strategies, interceptor,
/// controller and synchronizer
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct DurableStore {
    conn: Arc<Mutex<Connection>>,
}

impl DurableStore {
    /// Open or create the store at the given path and run migrations
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    // ===== Config records =====

    /// Set a configuration value (last-write-wins)
    pub fn set_config(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, serde_json::to_string(value)?, now_millis()],
        )?;
        Ok(())
    }

    /// Read a configuration value
    pub fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    // ===== Pending mutations =====

    /// Queue a write for later replay; returns the assigned id
    pub fn queue_mutation(&self, mutation: &NewMutation) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pending_mutations (route, method, headers, body, created_at, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                mutation.route,
                mutation.method,
                serde_json::to_string(&mutation.headers)?,
                mutation.body,
                now_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All unsynced mutations in creation order
    pub fn pending_mutations(&self) -> Result<Vec<PendingMutation>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, route, method, headers, body, created_at, synced
             FROM pending_mutations WHERE synced = 0
             ORDER BY created_at, id",
        )?;

        let rows = stmt.query_map([], row_to_mutation)?;

        let mut mutations = Vec::new();
        for row in rows {
            mutations.push(row??);
        }
        Ok(mutations)
    }

    /// Mark a mutation as replayed; the flag never flips back
    ///
    /// Runs as a transaction so a concurrent read never observes a
    /// half-applied update.
    pub fn mark_synced(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM pending_mutations WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            return Err(StoreError::MutationNotFound(id));
        }

        tx.execute(
            "UPDATE pending_mutations SET synced = 1 WHERE id = ?1",
            [id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Optional pruning hook: delete synced records older than the cutoff
    pub fn prune_synced(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM pending_mutations WHERE synced = 1 AND created_at < ?1",
            [before.timestamp_millis()],
        )?;
        Ok(deleted)
    }

    // ===== Cache metadata =====

    /// Record (or refresh) which bucket owns a cached URL
    pub fn record_cached(&self, url: &str, bucket: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cache_metadata (url, bucket, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET bucket = ?2, updated_at = ?3",
            params![url, bucket, now_millis()],
        )?;
        Ok(())
    }

    /// Metadata for a cached URL, if any
    pub fn cached_meta(&self, url: &str) -> Result<Option<CacheMetadataRecord>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT url, bucket, updated_at FROM cache_metadata WHERE url = ?1",
            [url],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?
        .map(|(url, bucket, millis)| {
            Ok(CacheMetadataRecord {
                url,
                bucket,
                updated_at: millis_to_datetime(millis)?,
            })
        })
        .transpose()
    }

    #[cfg(test)]
    pub(crate) fn backdate_metadata(&self, url: &str, updated_at: DateTime<Utc>) {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE cache_metadata SET updated_at = ?1 WHERE url = ?2",
            params![updated_at.timestamp_millis(), url],
        )
        .unwrap();
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(StoreError::BadTimestamp(millis))
}

fn row_to_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<PendingMutation, StoreError>> {
    let headers_json: String = row.get(3)?;
    let created_millis: i64 = row.get(5)?;

    Ok((|| -> Result<PendingMutation, StoreError> {
        Ok(PendingMutation {
            id: row.get(0)?,
            route: row.get(1)?,
            method: row.get(2)?,
            headers: serde_json::from_str(&headers_json)?,
            body: row.get(4)?,
            created_at: millis_to_datetime(created_millis)?,
            synced: row.get::<_, i64>(6)? != 0,
        })
    })())
}
