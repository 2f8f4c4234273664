//! SQLite implementation of the replication capabilities.
//!
//! This is the production backend. It uses rusqlite with bundled SQLite; every
//! operation runs on `tokio::task::spawn_blocking`. Mutual exclusion between
//! concurrent sync rounds comes from guarded `UPDATE ... WHERE` statements and
//! their affected-row counts, never from the connection mutex alone, so the
//! same statements stay correct when several processes share one database.

mod ack;
mod admin;
mod catalog;
mod fetcher;
mod plan;
mod processor;
mod queuer;
mod session;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use replica_core::{RecordHash, RecordId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    AckContext, FetchContext, ProcessContext, RecordInventory, Repository,
};

pub use ack::SqliteMessageAcknowledger;
pub use fetcher::SqliteMessageFetcher;
pub use processor::SqliteMessageProcessor;

/// Shared handle to one SQLite connection.
#[derive(Clone)]
pub(crate) struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

/// SQLite-backed repository.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Db,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migration::migrate(&mut conn)?;
        Ok(Self { db: Db::new(conn) })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self { db: Db::new(conn) })
    }

    /// Run application-owned DDL, e.g. creating per-entity tables.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.db
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
    }
}

impl Repository for SqliteStore {
    type Fetcher = SqliteMessageFetcher;
    type Processor = SqliteMessageProcessor;
    type Acknowledger = SqliteMessageAcknowledger;

    fn message_fetcher(&self, ctx: FetchContext) -> Self::Fetcher {
        SqliteMessageFetcher::new(self.db.clone(), ctx)
    }

    fn message_processor(&self, ctx: ProcessContext) -> Self::Processor {
        SqliteMessageProcessor::new(self.db.clone(), ctx)
    }

    fn message_acknowledger(&self, ctx: AckContext) -> Self::Acknowledger {
        SqliteMessageAcknowledger::new(self.db.clone(), ctx)
    }
}

#[async_trait]
impl RecordInventory for SqliteStore {
    async fn record_hashes(&self) -> Result<Vec<(String, RecordId, RecordHash)>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT EntitySingularName, RecordId, RecordHash FROM sync_state
                     ORDER BY EntitySingularName, RecordId",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            RecordId(row.get(1)?),
                            RecordHash(row.get(2)?),
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }
}

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Map an affected-row count of a single-row guarded update.
///
/// Anything above one means the key the guard relies on is not unique.
pub(crate) fn expect_at_most_one(affected: usize, what: &str) -> Result<bool> {
    match affected {
        0 => Ok(false),
        1 => Ok(true),
        n => Err(StoreError::InvariantViolation(format!(
            "{} affected {} rows, expected at most 1",
            what, n
        ))),
    }
}
