//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Parse configured database URLs (`sqlite://path`, `sqlite::memory:`,
//!   bare paths).
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas and trigger schema migrations before
//!   returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - File-backed connections run in WAL journal mode.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SQLITE_SCHEME: &str = "sqlite://";
const MEMORY_URLS: [&str; 3] = ["sqlite::memory:", "sqlite://:memory:", ":memory:"];

/// Concrete storage location resolved from a configured database URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// On-disk database file.
    File(PathBuf),
    /// Private in-memory database. Every connection sees its own database.
    Memory,
}

impl DatabaseTarget {
    /// Parses a database URL.
    ///
    /// Accepted forms: `sqlite://<path>`, `sqlite::memory:`, `:memory:` and a
    /// bare filesystem path. Other schemes are rejected.
    pub fn parse(url: &str) -> DbResult<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(DbError::InvalidUrl(String::new()));
        }
        if MEMORY_URLS.contains(&trimmed) {
            return Ok(Self::Memory);
        }
        if let Some(path) = trimmed.strip_prefix(SQLITE_SCHEME) {
            if path.is_empty() {
                return Err(DbError::InvalidUrl(trimmed.to_string()));
            }
            return Ok(Self::File(PathBuf::from(path)));
        }
        if trimmed.contains("://") {
            return Err(DbError::InvalidUrl(trimmed.to_string()));
        }
        Ok(Self::File(PathBuf::from(trimmed)))
    }

    /// Returns whether this target is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens a connection for the given target and applies pending migrations.
pub fn open_target(target: &DatabaseTarget) -> DbResult<Connection> {
    match target {
        DatabaseTarget::File(path) => open_db(path),
        DatabaseTarget::Memory => open_db_in_memory(),
    }
}

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let target = DatabaseTarget::File(path.to_path_buf());
    open_logged(&target, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_logged(&DatabaseTarget::Memory, Connection::open_in_memory)
}

fn open_logged(
    target: &DatabaseTarget,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = open().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
            started_at.elapsed().as_millis()
        );
        DbError::from(err)
    })?;

    match bootstrap_connection(&mut conn, target) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, target: &DatabaseTarget) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if !target.is_memory() {
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }
    apply_migrations(conn)?;
    Ok(())
}
