//! SQLite storage for ballot locations, ballot items and voter ballots.
//!
//! The store is split across modules by table family; each adds its own
//! `impl Db` block:
//! - [`crate::ballot_location`] for `ballot_locations`
//! - [`crate::ballot_item`] for `ballot_items`
//! - [`crate::voter_ballot`] for `voter_ballots`
//! - [`crate::election`] and [`crate::master`] for the read-only master summaries

use std::ops::Deref;
use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::warn;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("date parse error: {0}")]
    Date(#[from] chrono::ParseError),
    /// Concurrent writers left more than one row for a key and healing did
    /// not converge within the retry budget.
    #[error("duplicate rows in {table} for {key}")]
    DuplicateRows { table: &'static str, key: String },
    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_SITE_PREFIX: &str = "00";

pub struct Db {
    conn: Connection,
    site_prefix: String,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self, DbError> {
        // Before the pragmas: switching to WAL needs a lock other openers may hold.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self {
            conn,
            site_prefix: DEFAULT_SITE_PREFIX.to_string(),
        })
    }

    /// Sets the deployment prefix embedded in new permanent ids (`wv{prefix}ballot{n}`).
    pub fn with_site_prefix(mut self, prefix: &str) -> Self {
        self.site_prefix = prefix.trim().to_lowercase();
        self
    }

    pub fn site_prefix(&self) -> &str {
        &self.site_prefix
    }

    /// Get a reference to the underlying connection (for internal use and tests).
    #[doc(hidden)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Starts a write transaction that takes the write lock up front
    /// (`BEGIN IMMEDIATE`), so a busy database is waited on through the
    /// busy timeout instead of failing on lock upgrade. Inside an open
    /// transaction this becomes a savepoint.
    pub(crate) fn write_tx(&self) -> Result<WriteTx<'_>, DbError> {
        let nested = !self.conn.is_autocommit();
        self.conn.execute_batch(if nested {
            "SAVEPOINT ballotcache_write"
        } else {
            "BEGIN IMMEDIATE"
        })?;
        Ok(WriteTx {
            conn: &self.conn,
            nested,
            finished: false,
        })
    }

    pub fn init(&self) -> Result<(), DbError> {
        // Check schema version before applying DDL so migrations can add
        // columns that new indexes reference.
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.migrate_v1()?;
            self.conn.pragma_update(None, "user_version", 1)?;
        }

        if version < 2 {
            self.migrate_v2()?;
            self.conn.pragma_update(None, "user_version", 2)?;
        }

        let schema = include_str!("../../schema/sqlite.sql");
        self.conn.execute_batch(schema)?;

        Ok(())
    }

    /// Measure link and yes/no descriptions on ballot items.
    fn migrate_v1(&self) -> Result<(), DbError> {
        self.add_columns(&[
            "ALTER TABLE ballot_items ADD COLUMN measure_url TEXT",
            "ALTER TABLE ballot_items ADD COLUMN yes_vote_description TEXT",
            "ALTER TABLE ballot_items ADD COLUMN no_vote_description TEXT",
        ])
    }

    /// City/state/zip breakdowns on voter ballots. Rows written before this
    /// migration carry NULLs and are backfilled on read.
    fn migrate_v2(&self) -> Result<(), DbError> {
        self.add_columns(&[
            "ALTER TABLE voter_ballots ADD COLUMN original_text_city TEXT",
            "ALTER TABLE voter_ballots ADD COLUMN original_text_state TEXT",
            "ALTER TABLE voter_ballots ADD COLUMN original_text_zip TEXT",
            "ALTER TABLE voter_ballots ADD COLUMN substituted_address_city TEXT",
            "ALTER TABLE voter_ballots ADD COLUMN substituted_address_state TEXT",
            "ALTER TABLE voter_ballots ADD COLUMN substituted_address_zip TEXT",
        ])
    }

    fn add_columns(&self, statements: &[&str]) -> Result<(), DbError> {
        for sql in statements {
            match self.conn.execute(sql, []) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                    if msg.contains("duplicate column name")
                        || msg.contains("no such table") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, DbError> {
        self.conn
            .query_row(
                "SELECT value FROM ingest_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(DbError::from)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO ingest_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Atomically increments an integer counter stored in `ingest_meta`
    /// and returns the new value. Missing counters start at 1.
    pub(crate) fn next_counter(&self, key: &str) -> Result<i64, DbError> {
        let value: String = self.conn.query_row(
            "INSERT INTO ingest_meta (key, value) VALUES (?1, '1')
             ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
             RETURNING value",
            params![key],
            |row| row.get(0),
        )?;
        value
            .parse::<i64>()
            .map_err(|_| DbError::InvalidData(format!("counter {} = {:?}", key, value)))
    }

    /// Next permanent ballot id, e.g. `wv02ballot17`.
    pub(crate) fn next_ballot_we_vote_id(&self) -> Result<String, DbError> {
        let n = self.next_counter("we_vote_id_ballot_counter")?;
        Ok(format!("wv{}ballot{}", self.site_prefix, n).to_lowercase())
    }
}

/// Write transaction from [`Db::write_tx`]. Rolls back on drop unless
/// committed.
pub(crate) struct WriteTx<'a> {
    conn: &'a Connection,
    nested: bool,
    finished: bool,
}

impl WriteTx<'_> {
    pub(crate) fn commit(mut self) -> Result<(), DbError> {
        self.finished = true;
        let sql = if self.nested {
            "RELEASE ballotcache_write"
        } else {
            "COMMIT"
        };
        if let Err(e) = self.conn.execute_batch(sql) {
            self.rollback();
            return Err(e.into());
        }
        Ok(())
    }

    fn rollback(&self) {
        let sql = if self.nested {
            "ROLLBACK TO ballotcache_write; RELEASE ballotcache_write"
        } else {
            "ROLLBACK"
        };
        if let Err(e) = self.conn.execute_batch(sql) {
            warn!("Rollback failed: {}", e);
        }
    }
}

impl Deref for WriteTx<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}

/// Another connection held the lock past the busy timeout.
pub(crate) fn is_busy(err: &DbError) -> bool {
    matches!(
        err,
        DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Current time in the fixed-width RFC 3339 form stored in `*_updated` columns.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Collects a `query_map` result, propagating the first row error.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, DbError> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}
