//! SQLite persistence for task state, defects and time summaries.

pub mod defects;
pub mod tasks;
pub mod time_summary;

pub use defects::DefectTable;
pub use time_summary::TimeSummaryTable;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// WAL with full fsync: a committed tick or defect survives a crash.
const FILE_PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=FULL;
     PRAGMA foreign_keys=ON;
     PRAGMA busy_timeout=5000;";

const MEMORY_PRAGMAS: &str = "PRAGMA foreign_keys=ON;";

/// Shared handle to the metrics database. Clones use the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening database");
        Self::init(Connection::open(path)?, FILE_PRAGMAS)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, MEMORY_PRAGMAS)
    }

    fn init(mut conn: Connection, pragmas: &str) -> Result<Self> {
        conn.execute_batch(pragmas)?;
        let report = embedded::migrations::runner().run(&mut conn)?;
        for migration in report.applied_migrations() {
            debug!(version = migration.version(), name = migration.name(), "applied migration");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Flush committed pages from the WAL into the main database file.
    pub fn sync(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
            Ok(())
        })
    }
}

/// Current time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
