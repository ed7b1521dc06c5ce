//! SQLite persistence for detection records.
//!
//! One connection serves the whole process: uploads insert, workers update
//! their own row, and HTTP handlers read.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::config::DatabaseConfig;

pub mod detection_repo;
pub mod error;
pub mod migrations;

pub use detection_repo::{ResultRepository, SqliteResultRepository};
pub use error::DatabaseError;

/// Wait for a locked database file before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the record store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the file named in the config, creating its directory on demand,
    /// and brings the schema up to date.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Self::open(Path::new(&config.path))
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| DatabaseError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::run_all(&conn)?;

        log::info!(
            "Result store ready at {} (schema v{})",
            path.display(),
            migrations::current_version(&conn)?
        );

        Ok(Self::wrap(conn))
    }

    /// Fresh private database; used by tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}
