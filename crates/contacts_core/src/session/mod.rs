//! Transactional session manager.
//!
//! # Responsibility
//! - Own the connection pool for the configured store.
//! - Hand every logical operation an exclusive [`ScopedSession`]: one pooled
//!   connection with an open unit-of-work.
//! - Guarantee rollback of uncommitted work and release of the connection on
//!   every exit path (return, `?`, panic unwind).
//!
//! # Invariants
//! - A `ScopedSession` is owned by exactly one operation and cannot outlive
//!   the manager's pool (it holds its own pool reference).
//! - Nothing commits implicitly; callers call [`ScopedSession::commit`].
//! - Rollback failures are logged and swallowed; the fault that triggered the
//!   rollback is always what the caller sees.
//! - The pooled connection is released exactly once, when the session drops.
//! - Plain scopes begin deferred, so concurrent readers never block each
//!   other. Write scopes take the store's write lock up front and serialize
//!   only against other writers.

use crate::config::Settings;
use crate::db::{
    ConnectionPool, DatabaseTarget, DbError, PoolConfig, PoolError, PoolStatus, PooledConnection,
};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How a scope's unit-of-work acquires store locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// Locks are taken on first read or write.
    Deferred,
    /// The write lock is taken at begin, so a read-then-write unit cannot
    /// fail halfway on lock upgrade.
    Write,
}

impl ScopeMode {
    fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED;",
            Self::Write => "BEGIN IMMEDIATE;",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Write => "write",
        }
    }
}

/// Session lifecycle failure.
#[derive(Debug)]
pub enum SessionError {
    /// The store cannot be used: manager never initialized, pool exhausted
    /// past its timeout, or the store is unreachable.
    Unavailable(String),
    /// Store error while beginning, committing or rolling back.
    Store(DbError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "store unavailable: {reason}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unavailable(_) => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<PoolError> for SessionError {
    fn from(value: PoolError) -> Self {
        Self::Unavailable(value.to_string())
    }
}

impl From<rusqlite::Error> for SessionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(DbError::Sqlite(value))
    }
}

/// Produces scoped units-of-work against the configured store.
///
/// Cheap to clone and safe to share across threads; every
/// [`SessionManager::open_scope`] call gets an independent connection.
#[derive(Clone)]
pub struct SessionManager {
    pool: Option<ConnectionPool>,
}

impl SessionManager {
    /// Builds a manager from settings.
    ///
    /// An empty `database_url` yields an uninitialized manager whose scopes
    /// fail with [`SessionError::Unavailable`]. A URL that cannot be parsed
    /// or opened fails here.
    pub fn new(settings: &Settings) -> Result<Self, SessionError> {
        if settings.database_url.trim().is_empty() {
            warn!("event=session_manager_init module=session status=uninitialized reason=no_database_url");
            return Ok(Self::uninitialized());
        }

        let target = DatabaseTarget::parse(&settings.database_url)
            .map_err(|err| SessionError::Unavailable(err.to_string()))?;
        let config = PoolConfig {
            max_size: settings.pool_size,
            acquire_timeout: settings.pool_timeout(),
        };
        Self::with_target(target, config)
    }

    /// Builds a manager over an explicit target and pool policy.
    pub fn with_target(target: DatabaseTarget, config: PoolConfig) -> Result<Self, SessionError> {
        let pool = ConnectionPool::open(target, config).map_err(|err| {
            error!(
                "event=session_manager_init module=session status=error error_code=store_unreachable error={err}"
            );
            SessionError::from(err)
        })?;
        info!(
            "event=session_manager_init module=session status=ok max_connections={}",
            pool.status().max_size
        );
        Ok(Self { pool: Some(pool) })
    }

    /// A manager that was never pointed at a store.
    pub fn uninitialized() -> Self {
        Self { pool: None }
    }

    /// Returns whether a store is configured.
    pub fn is_initialized(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns pool occupancy, or `None` when uninitialized.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.pool.as_ref().map(ConnectionPool::status)
    }

    /// Acquires a connection and begins a deferred unit-of-work on it.
    pub fn open_scope(&self) -> Result<ScopedSession, SessionError> {
        self.open_scope_with(ScopeMode::Deferred)
    }

    /// Acquires a connection and begins a unit-of-work holding the write lock.
    ///
    /// Blocks (up to the store's busy timeout) while another write scope is
    /// open; readers are unaffected.
    pub fn open_write_scope(&self) -> Result<ScopedSession, SessionError> {
        self.open_scope_with(ScopeMode::Write)
    }

    fn open_scope_with(&self, mode: ScopeMode) -> Result<ScopedSession, SessionError> {
        let pool = self.pool.as_ref().ok_or_else(|| {
            error!("event=session_open module=session status=error error_code=not_initialized");
            SessionError::Unavailable("session manager is not initialized".to_string())
        })?;

        let mut conn = pool.get().map_err(|err| {
            error!("event=session_open module=session status=error error_code=acquire_failed error={err}");
            SessionError::from(err)
        })?;

        if let Err(err) = begin(&conn, mode) {
            // A connection that cannot begin is not worth keeping.
            conn.discard();
            error!("event=session_open module=session status=error error_code=begin_failed error={err}");
            return Err(err);
        }

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "event=session_open module=session status=ok session_id={id} mode={}",
            mode.as_str()
        );
        Ok(ScopedSession { conn, id, mode })
    }

    /// Runs `operation` inside a fresh scope.
    ///
    /// On `Err` the unit-of-work is rolled back before the error is returned
    /// unchanged. On `Ok` nothing is committed here; commit inside
    /// `operation` after successful mutation. Uncommitted work is discarded
    /// when the scope closes either way.
    pub fn with_session<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedSession) -> Result<T, E>,
        E: From<SessionError> + Display,
    {
        self.run_scoped(ScopeMode::Deferred, operation)
    }

    /// [`SessionManager::with_session`] over a write scope.
    pub fn with_write_session<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedSession) -> Result<T, E>,
        E: From<SessionError> + Display,
    {
        self.run_scoped(ScopeMode::Write, operation)
    }

    fn run_scoped<T, E, F>(&self, mode: ScopeMode, operation: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedSession) -> Result<T, E>,
        E: From<SessionError> + Display,
    {
        let mut session = self.open_scope_with(mode)?;
        match operation(&mut session) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    "event=session_fault module=session status=rolled_back session_id={} error={err}",
                    session.id
                );
                session.rollback_quietly();
                Err(err)
            }
        }
    }
}

/// Exclusive unit-of-work bound to one pooled connection.
///
/// Dereferences to [`rusqlite::Connection`] for queries. Dropping the session
/// rolls back anything not yet committed and releases the connection.
pub struct ScopedSession {
    conn: PooledConnection,
    id: u64,
    mode: ScopeMode,
}

impl ScopedSession {
    /// Process-unique id, for log correlation.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Commits the current unit-of-work and begins the next one in the same
    /// mode.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        if let Err(err) = self.conn.execute_batch("COMMIT;") {
            error!(
                "event=session_commit module=session status=error session_id={} error={err}",
                self.id
            );
            self.rollback_quietly();
            // Keep the session inside a unit-of-work; `restart` logs and
            // discards the connection itself if that fails too.
            let _ = self.restart();
            return Err(err.into());
        }
        debug!("event=session_commit module=session status=ok session_id={}", self.id);
        self.restart()
    }

    /// Discards the current unit-of-work and begins the next one.
    pub fn rollback(&mut self) -> Result<(), SessionError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;")?;
        }
        self.restart()
    }

    fn restart(&mut self) -> Result<(), SessionError> {
        begin(&self.conn, self.mode).inspect_err(|err| {
            error!(
                "event=session_begin module=session status=error session_id={} error={err}",
                self.id
            );
            self.conn.discard();
        })
    }

    /// Rolls back without surfacing failure; a connection that cannot roll
    /// back is discarded so it never re-enters the pool.
    fn rollback_quietly(&mut self) {
        if self.conn.is_autocommit() {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
            error!(
                "event=session_rollback module=session status=error session_id={} error={err}",
                self.id
            );
            self.conn.discard();
        }
    }
}

impl Deref for ScopedSession {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(
                "event=session_close module=session status=rolled_back session_id={} reason=panic",
                self.id
            );
        }
        self.rollback_quietly();
        debug!("event=session_close module=session status=ok session_id={}", self.id);
        // `conn` drops next and returns itself to the pool.
    }
}

fn begin(conn: &Connection, mode: ScopeMode) -> Result<(), SessionError> {
    conn.execute_batch(mode.begin_sql())?;
    Ok(())
}
