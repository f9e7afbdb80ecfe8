//! Cache metadata sidecar with connection pooling.
//!
//! One row per cached archive: key stem, origin, size, last access. The
//! database lives next to the archives and is the part of the cache that
//! must survive process restarts; the directories are reconciled against it
//! at startup.

use crate::error::{MetaError, MetaResult};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// One archive's persisted accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRow {
    pub stem: String,
    pub repo: String,
    pub commit: String,
    pub bytes: u64,
    pub last_access: i64,
}

/// Seconds since the Unix epoch; the clock for LRU and age eviction.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// Metadata database handle.
///
/// Uses r2d2 because `rusqlite::Connection` is NOT Sync.
/// The pool manages thread-safe access to `SQLite` connections; cloning
/// shares the pool.
#[derive(Clone)]
pub struct CacheMeta {
    pool: Pool<SqliteConnectionManager>,
}

impl CacheMeta {
    /// Opens or creates the metadata database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Pool` if connection pool creation fails.
    /// Returns `MetaError::Sqlite` if schema initialization fails.
    pub fn open(path: &Path) -> MetaResult<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(4).min_idle(Some(1)).build(manager)?;

        // Initialize schema on first connection
        {
            let conn = pool.get()?;
            apply_pragmas(&conn)?;
            init_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Creates an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Pool` if connection pool creation fails.
    pub fn in_memory() -> MetaResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;

        {
            let conn = pool.get()?;
            apply_pragmas(&conn)?;
            init_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    fn conn(&self) -> MetaResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(MetaError::from)
    }

    /// Inserts or replaces an archive row.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Sqlite` if the write fails.
    pub fn upsert(&self, row: &ArchiveRow) -> MetaResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO archives (stem, repo, commit_oid, bytes, last_access)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(stem) DO UPDATE SET
                repo = excluded.repo,
                commit_oid = excluded.commit_oid,
                bytes = excluded.bytes,
                last_access = excluded.last_access
            ",
            rusqlite::params![row.stem, row.repo, row.commit, row.bytes, row.last_access],
        )?;
        Ok(())
    }

    /// Bumps an archive's last-access time.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Sqlite` if the write fails.
    pub fn touch(&self, stem: &str, now: i64) -> MetaResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE archives SET last_access = ?2 WHERE stem = ?1",
            rusqlite::params![stem, now],
        )?;
        Ok(())
    }

    /// Deletes an archive row.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Sqlite` if the delete fails.
    pub fn remove(&self, stem: &str) -> MetaResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM archives WHERE stem = ?1", rusqlite::params![stem])?;
        Ok(())
    }

    /// All rows, least-recently-accessed first (eviction order).
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Sqlite` if the query fails.
    pub fn list(&self) -> MetaResult<Vec<ArchiveRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r"
            SELECT stem, repo, commit_oid, bytes, last_access
            FROM archives
            ORDER BY last_access ASC, stem ASC
            ",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ArchiveRow {
                    stem: row.get(0)?,
                    repo: row.get(1)?,
                    commit: row.get(2)?,
                    bytes: row.get::<_, i64>(3)? as u64,
                    last_access: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sum of all cached archive sizes.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Sqlite` if the query fails.
    pub fn total_bytes(&self) -> MetaResult<u64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(bytes), 0) FROM archives",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}

/// Applies performance-tuned PRAGMA settings.
///
/// WAL keeps readers unblocked during accounting writes; NORMAL sync is safe
/// with WAL; the busy timeout rides out pool contention.
///
/// # Errors
///
/// Returns `MetaError::Sqlite` if any PRAGMA statement fails.
fn apply_pragmas(conn: &rusqlite::Connection) -> MetaResult<()> {
    // Prepare + step handles both void and result-returning statements
    conn.prepare("PRAGMA journal_mode = WAL")?.query([])?.next()?;
    conn.prepare("PRAGMA synchronous = NORMAL")?
        .query([])?
        .next()?;
    conn.prepare("PRAGMA busy_timeout = 5000")?.query([])?.next()?;
    conn.prepare("PRAGMA temp_store = MEMORY")?.query([])?.next()?;
    Ok(())
}

/// Initializes the database schema.
///
/// Handles schema versioning - if an older schema version exists,
/// drops all tables and recreates them with the new schema. Losing the
/// accounting on upgrade is fine: archives are re-fetched on demand.
///
/// # Errors
///
/// Returns `MetaError::Sqlite` if schema creation fails.
fn init_schema(conn: &rusqlite::Connection) -> MetaResult<()> {
    let existing_version: Option<u32> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();

    match existing_version {
        Some(v) if v >= SCHEMA_VERSION => return Ok(()), // Already up to date
        Some(_) => {
            conn.execute_batch(
                r"
                DROP TABLE IF EXISTS archives;
                DROP TABLE IF EXISTS schema_info;
                ",
            )?;
        }
        None => {} // Fresh database
    }

    conn.execute_batch(
        r"
        -- One row per cached archive directory
        CREATE TABLE IF NOT EXISTS archives (
            stem TEXT PRIMARY KEY,
            repo TEXT NOT NULL,
            commit_oid TEXT NOT NULL,
            bytes INTEGER NOT NULL,
            last_access INTEGER NOT NULL
        ) WITHOUT ROWID;

        -- Eviction scans in access order
        CREATE INDEX IF NOT EXISTS idx_archives_last_access
            ON archives(last_access);

        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;

        INSERT OR REPLACE INTO schema_info (key, value)
        VALUES ('version', '1');
        ",
    )?;

    Ok(())
}
