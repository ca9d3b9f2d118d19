pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Job {0} not found")]
    JobNotFound(i64),
    #[error("Corrupt job record {id}: {message}")]
    Corrupt { id: i64, message: String },
    #[error("Database connection poisoned by a panicked writer")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, DbError>;

/// SQLite job store.
///
/// The connection sits behind a mutex so pipeline workers on different
/// threads can share one store; every write is a single statement.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Lock the connection.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        // WAL mode so status readers in other processes don't block workers
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            Self::migrate_v1(conn)?;
        }
        if version < 2 {
            Self::migrate_v2(conn)?;
        }
        if version < 3 {
            Self::migrate_v3(conn)?;
        }

        conn.pragma_update(None, "user_version", 3)?;
        Ok(())
    }

    /// V1: jobs table
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                filename        TEXT NOT NULL,
                input_path      TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
                progress        REAL NOT NULL DEFAULT 0.0,

                -- JSON object: canonical stem name -> file path
                stems           TEXT,
                error_message   TEXT,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            ",
        )
        .map_err(|e| DbError::Migration(format!("v1: {e}")))?;
        Ok(())
    }

    /// V2: persisted chord sequences
    fn migrate_v2(conn: &Connection) -> Result<()> {
        Self::add_column(conn, "ALTER TABLE jobs ADD COLUMN chords TEXT")
            .map_err(|e| DbError::Migration(format!("v2: {e}")))
    }

    /// V3: per-job quality flag and the claim owner
    fn migrate_v3(conn: &Connection) -> Result<()> {
        for sql in [
            "ALTER TABLE jobs ADD COLUMN high_quality INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE jobs ADD COLUMN claimed_by TEXT",
        ] {
            Self::add_column(conn, sql).map_err(|e| DbError::Migration(format!("v3: {e}")))?;
        }
        Ok(())
    }

    // SQLite doesn't have IF NOT EXISTS for ALTER TABLE ADD COLUMN,
    // so we ignore "duplicate column" errors
    fn add_column(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
        match conn.execute(sql, []) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ffi::ErrorCode::Unknown || err.extended_code == 1 =>
            {
                // Column already exists
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
