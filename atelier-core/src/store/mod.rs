//! Embedded store wrapper: bounded connection pool, scoped transactions,
//! retry on contention, per-statement deadline.
//!
//! WAL mode keeps readers unblocked while the single write path (guarded by
//! the index service scan lock) runs batch transactions.

pub mod schema;

use crate::config::StoreConfig;
use crate::error::AtelierError;
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::Rng;
use rusqlite::{Connection, ErrorCode, Params, Row};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LOCK_RETRY_ATTEMPTS: u32 = 6;
const LOCK_RETRY_BASE: Duration = Duration::from_millis(50);
const LOCK_RETRY_CAP: Duration = Duration::from_millis(750);
/// VM instructions between progress-handler callbacks.
const PROGRESS_OPS: i32 = 10_000;

/// Transaction mode for [`Store::transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    Deferred,
    #[default]
    Immediate,
    Exclusive,
}

impl TxMode {
    fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Connection pool manager for the embedded SQLite store.
///
/// Maintains a bounded pool of connections to keep WAL-friendly concurrency
/// without over-subscribing file handles. The pool channel doubles as the
/// semaphore: acquiring blocks when all connections are handed out.
pub struct Store {
    db_path: PathBuf,
    pool_tx: Sender<Connection>,
    pool_rx: Receiver<Connection>,
    query_timeout: Duration,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl Store {
    /// Open (or create) the store at `db_path` with a bounded pool.
    pub fn open(db_path: &Path, config: &StoreConfig) -> crate::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let max_conn = config.max_connections.max(1);
        let (pool_tx, pool_rx) = bounded(max_conn);
        for _ in 0..max_conn {
            let conn = create_connection(db_path, config.busy_timeout_ms)?;
            pool_tx
                .send(conn)
                .map_err(|_| AtelierError::Db("connection pool closed".into()))?;
        }

        info!(path = %db_path.display(), connections = max_conn, "database initialized");

        Ok(Self {
            db_path: db_path.to_path_buf(),
            pool_tx,
            pool_rx,
            query_timeout: Duration::from_secs_f64(config.query_timeout_secs.max(0.0)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn acquire(&self) -> crate::Result<PooledConn<'_>> {
        let conn = self
            .pool_rx
            .recv()
            .map_err(|_| AtelierError::Db("connection pool closed".into()))?;
        Ok(PooledConn {
            pool: &self.pool_tx,
            conn: Some(conn),
        })
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute<P: Params + Clone>(&self, sql: &str, params: P) -> crate::Result<usize> {
        let guard = self.acquire()?;
        with_retry(|| {
            let _deadline = Deadline::install(guard.conn(), self.query_timeout);
            guard.conn().execute(sql, params.clone())
        })
    }

    /// Execute an INSERT, returning the last inserted rowid.
    pub fn insert<P: Params + Clone>(&self, sql: &str, params: P) -> crate::Result<i64> {
        let guard = self.acquire()?;
        with_retry(|| {
            let _deadline = Deadline::install(guard.conn(), self.query_timeout);
            guard.conn().execute(sql, params.clone())?;
            Ok(guard.conn().last_insert_rowid())
        })
    }

    /// Run a query and map every row.
    pub fn query_map<T, P, F>(&self, sql: &str, params: P, mut f: F) -> crate::Result<Vec<T>>
    where
        P: Params + Clone,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let guard = self.acquire()?;
        with_retry(|| {
            let _deadline = Deadline::install(guard.conn(), self.query_timeout);
            let mut stmt = guard.conn().prepare(sql)?;
            let rows = stmt.query_map(params.clone(), &mut f)?;
            rows.collect::<rusqlite::Result<Vec<T>>>()
        })
    }

    /// Run a query expected to yield at most one row.
    pub fn query_row_opt<T, P, F>(&self, sql: &str, params: P, mut f: F) -> crate::Result<Option<T>>
    where
        P: Params + Clone,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let guard = self.acquire()?;
        with_retry(|| {
            let _deadline = Deadline::install(guard.conn(), self.query_timeout);
            let mut stmt = guard.conn().prepare(sql)?;
            let mut rows = stmt.query_map(params.clone(), &mut f)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Execute the same statement for every parameter set, returning the
    /// total number of affected rows.
    pub fn execute_many<P: Params + Clone>(&self, sql: &str, batches: &[P]) -> crate::Result<usize> {
        let guard = self.acquire()?;
        with_retry(|| {
            let _deadline = Deadline::install(guard.conn(), self.query_timeout);
            let mut stmt = guard.conn().prepare(sql)?;
            let mut affected = 0usize;
            for params in batches {
                affected += stmt.execute(params.clone())?;
            }
            Ok(affected)
        })
    }

    /// Execute a multi-statement script.
    pub fn execute_script(&self, sql: &str) -> crate::Result<()> {
        let guard = self.acquire()?;
        with_retry(|| {
            let _deadline = Deadline::install(guard.conn(), self.query_timeout);
            guard.conn().execute_batch(sql)
        })
    }

    /// Open a scoped transaction. `Immediate` by default elsewhere in the
    /// codebase to acquire the write lock deterministically.
    ///
    /// The guard owns one pooled connection for its whole lifetime; nested
    /// logical scopes must run on the same guard rather than opening a new
    /// transaction. Rolls back on drop unless [`StoreTx::commit`] was called.
    pub fn transaction(&self, mode: TxMode) -> crate::Result<StoreTx<'_>> {
        let guard = self.acquire()?;
        with_retry(|| guard.conn().execute_batch(mode.begin_sql()))?;
        Ok(StoreTx {
            guard,
            query_timeout: self.query_timeout,
            committed: false,
        })
    }

    pub fn get_schema_version(&self) -> i64 {
        if !self.has_table("metadata") {
            return 0;
        }
        let value: Option<String> = self
            .query_row_opt(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        match value.and_then(|v| v.parse::<i64>().ok()) {
            Some(v) => v,
            None => {
                debug!("no valid schema_version value in database");
                0
            }
        }
    }

    pub fn set_schema_version(&self, version: i64) -> crate::Result<()> {
        self.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            [version.to_string()],
        )?;
        Ok(())
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        self.query_row_opt(
            "SELECT name FROM sqlite_master WHERE type='table' AND name = ?",
            [table_name],
            |row| row.get::<_, String>(0),
        )
        .map(|r| r.is_some())
        .unwrap_or(false)
    }

    pub fn vacuum(&self) -> crate::Result<()> {
        self.execute_script("VACUUM")?;
        info!("database vacuumed");
        Ok(())
    }
}

/// RAII handle returning the connection to the pool on drop.
struct PooledConn<'a> {
    pool: &'a Sender<Connection>,
    conn: Option<Connection>,
}

impl PooledConn<'_> {
    fn conn(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.pool.send(conn);
        }
    }
}

/// Scoped transaction handle. All statements issued through the handle run on
/// the same pooled connection. Dropped without `commit()` it rolls back.
pub struct StoreTx<'a> {
    guard: PooledConn<'a>,
    query_timeout: Duration,
    committed: bool,
}

impl StoreTx<'_> {
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> crate::Result<usize> {
        let _deadline = Deadline::install(self.guard.conn(), self.query_timeout);
        Ok(self.guard.conn().execute(sql, params)?)
    }

    pub fn insert<P: Params>(&self, sql: &str, params: P) -> crate::Result<i64> {
        let _deadline = Deadline::install(self.guard.conn(), self.query_timeout);
        self.guard.conn().execute(sql, params)?;
        Ok(self.guard.conn().last_insert_rowid())
    }

    pub fn query_map<T, P, F>(&self, sql: &str, params: P, mut f: F) -> crate::Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let _deadline = Deadline::install(self.guard.conn(), self.query_timeout);
        let mut stmt = self.guard.conn().prepare(sql)?;
        let rows = stmt.query_map(params, &mut f)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    pub fn query_row_opt<T, P, F>(&self, sql: &str, params: P, mut f: F) -> crate::Result<Option<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let _deadline = Deadline::install(self.guard.conn(), self.query_timeout);
        let mut stmt = self.guard.conn().prepare(sql)?;
        let mut rows = stmt.query_map(params, &mut f)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn execute_script(&self, sql: &str) -> crate::Result<()> {
        let _deadline = Deadline::install(self.guard.conn(), self.query_timeout);
        Ok(self.guard.conn().execute_batch(sql)?)
    }

    /// Commit the transaction, retrying on transient lock contention.
    pub fn commit(mut self) -> crate::Result<()> {
        with_retry(|| self.guard.conn().execute_batch("COMMIT"))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StoreTx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(conn) = self.guard.conn.as_ref() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    debug!("rollback on drop failed: {e}");
                }
            }
        }
    }
}

/// Per-statement deadline via SQLite's progress handler. Installed on scope
/// entry, cleared on drop; a handler must not leak across pooled connections.
struct Deadline<'c> {
    conn: Option<&'c Connection>,
}

impl<'c> Deadline<'c> {
    fn install(conn: &'c Connection, timeout: Duration) -> Self {
        if timeout.is_zero() {
            return Self { conn: None };
        }
        let start = Instant::now();
        conn.progress_handler(PROGRESS_OPS, Some(move || start.elapsed() >= timeout));
        Self { conn: Some(conn) }
    }
}

impl Drop for Deadline<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn {
            conn.progress_handler(0, None::<fn() -> bool>);
        }
    }
}

fn create_connection(db_path: &Path, busy_timeout_ms: u64) -> crate::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA foreign_keys = ON;"
    ))?;
    Ok(conn)
}

fn is_locked_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = LOCK_RETRY_BASE.saturating_mul(1u32 << attempt.min(16));
    let jitter = Duration::from_millis(rand::rng().random_range(0..30));
    exp.min(LOCK_RETRY_CAP) + jitter
}

/// Run an operation, retrying on busy/locked errors with jittered
/// exponential backoff before surfacing the failure.
fn with_retry<T, F>(mut op: F) -> crate::Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_locked_error(&err) && attempt < LOCK_RETRY_ATTEMPTS => {
                debug!(attempt, "database locked, backing off");
                std::thread::sleep(backoff_delay(attempt));
                attempt += 1;
            }
            Err(err) => {
                if !matches!(err, rusqlite::Error::QueryReturnedNoRows) {
                    warn!("database operation failed: {err}");
                }
                return Err(err.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("test.sqlite"), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_execute_and_query() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let id = store
            .insert("INSERT INTO t (name) VALUES (?)", ["alpha"])
            .unwrap();
        assert_eq!(id, 1);

        let names: Vec<String> = store
            .query_map("SELECT name FROM t ORDER BY id", [], |row| row.get(0))
            .unwrap();
        assert_eq!(names, vec!["alpha".to_string()]);
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let tx = store.transaction(TxMode::Immediate).unwrap();
        tx.execute("INSERT INTO t (name) VALUES (?)", ["kept"]).unwrap();
        tx.commit().unwrap();

        {
            let tx = store.transaction(TxMode::Immediate).unwrap();
            tx.execute("INSERT INTO t (name) VALUES (?)", ["dropped"])
                .unwrap();
            // dropped without commit -> rollback
        }

        let count: i64 = store
            .query_row_opt("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_has_table_and_schema_version() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(!store.has_table("metadata"));
        assert_eq!(store.get_schema_version(), 0);

        store
            .execute_script("CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .unwrap();
        store.set_schema_version(8).unwrap();
        assert_eq!(store.get_schema_version(), 8);
    }

    #[test]
    fn test_execute_many() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let affected = store
            .execute_many(
                "INSERT INTO t (name) VALUES (?)",
                &[["a"], ["b"], ["c"]],
            )
            .unwrap();
        assert_eq!(affected, 3);
    }
}
