//! Bounded SQLite connection pool.
//!
//! # Responsibility
//! - Own every connection opened against one [`DatabaseTarget`].
//! - Hand out exclusive [`PooledConnection`] guards, blocking when the pool
//!   is at its ceiling.
//! - Take connections back on guard drop, discarding broken ones.
//!
//! # Invariants
//! - `idle + in_use <= max_size` at all times.
//! - A connection is returned to the pool at most once.
//! - Idle connections are in autocommit mode (no open transaction).
//! - In-memory targets are clamped to a single connection. Discarding it
//!   discards the database; the replacement opens empty.

use super::open::{open_target, DatabaseTarget};
use super::DbError;
use log::{debug, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_MAX_SIZE: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool sizing and wait policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of simultaneously open connections.
    pub max_size: u32,
    /// How long `get` waits for a free connection before giving up.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections waiting in the pool.
    pub idle: u32,
    /// Connections currently checked out (or being opened).
    pub in_use: u32,
    /// Pool ceiling.
    pub max_size: u32,
}

impl PoolStatus {
    /// Total connections owned by the pool.
    pub fn open_connections(&self) -> u32 {
        self.idle + self.in_use
    }
}

/// Pool acquisition failure.
#[derive(Debug)]
pub enum PoolError {
    /// No connection became free within the acquire timeout.
    Timeout { waited: Duration },
    /// Opening a fresh connection failed.
    Open(DbError),
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { waited } => write!(
                f,
                "timed out after {}ms waiting for a database connection",
                waited.as_millis()
            ),
            Self::Open(err) => write!(f, "failed to open database connection: {err}"),
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Timeout { .. } => None,
            Self::Open(err) => Some(err),
        }
    }
}

impl From<DbError> for PoolError {
    fn from(value: DbError) -> Self {
        Self::Open(value)
    }
}

struct PoolState {
    idle: Vec<Connection>,
    in_use: u32,
}

struct PoolShared {
    target: DatabaseTarget,
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Pool bookkeeping stays consistent across a panicking holder: every
        // critical section is a handful of field updates.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back(&self, conn: Connection) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if conn.is_autocommit() {
            state.idle.push(conn);
        } else {
            warn!("event=pool_release module=db status=discarded reason=open_transaction");
        }
        drop(state);
        self.released.notify_one();
    }

    fn forget_one(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }
}

/// Shared handle to a bounded set of connections for one database.
///
/// Cloning is cheap; all clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Creates a pool and eagerly opens its first connection.
    ///
    /// Opening eagerly surfaces an unreachable store or a failed migration at
    /// startup and leaves later connections with nothing to migrate.
    pub fn open(target: DatabaseTarget, config: PoolConfig) -> Result<Self, PoolError> {
        let mut config = config;
        config.max_size = config.max_size.max(1);
        if target.is_memory() {
            config.max_size = 1;
        }

        let first = open_target(&target)?;
        debug!(
            "event=pool_open module=db status=ok max_size={} acquire_timeout_ms={}",
            config.max_size,
            config.acquire_timeout.as_millis()
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                target,
                config,
                state: Mutex::new(PoolState {
                    idle: vec![first],
                    in_use: 0,
                }),
                released: Condvar::new(),
            }),
        })
    }

    /// Checks out one connection, opening a new one if below the ceiling.
    ///
    /// Blocks while the pool is exhausted, up to `acquire_timeout`.
    pub fn get(&self) -> Result<PooledConnection, PoolError> {
        let started_at = Instant::now();
        let deadline = started_at + self.shared.config.acquire_timeout;
        let mut state = self.shared.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                state.in_use += 1;
                return Ok(PooledConnection::new(conn, Arc::clone(&self.shared)));
            }

            let open_count = state.in_use + state.idle.len() as u32;
            if open_count < self.shared.config.max_size {
                // Reserve the slot, then open outside the lock.
                state.in_use += 1;
                drop(state);
                if self.shared.target.is_memory() {
                    // The eager first connection was discarded; its data is gone.
                    warn!(
                        "event=pool_open module=db status=reopened mode=memory reason=previous_connection_discarded"
                    );
                }
                return match open_target(&self.shared.target) {
                    Ok(conn) => Ok(PooledConnection::new(conn, Arc::clone(&self.shared))),
                    Err(err) => {
                        self.shared.forget_one();
                        Err(PoolError::Open(err))
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "event=pool_acquire module=db status=error error_code=pool_timeout waited_ms={}",
                    started_at.elapsed().as_millis()
                );
                return Err(PoolError::Timeout {
                    waited: started_at.elapsed(),
                });
            }

            let (guard, _timeout) = self
                .shared
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Returns current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            idle: state.idle.len() as u32,
            in_use: state.in_use,
            max_size: self.shared.config.max_size,
        }
    }

    /// Returns the target this pool connects to.
    pub fn target(&self) -> &DatabaseTarget {
        &self.shared.target
    }
}

/// Exclusive checkout of one pooled connection.
///
/// Dereferences to [`rusqlite::Connection`]. Dropping the guard returns the
/// connection to the pool, or closes it if [`PooledConnection::discard`] was
/// called or a transaction is still open.
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<PoolShared>,
    discard: bool,
}

impl PooledConnection {
    fn new(conn: Connection, shared: Arc<PoolShared>) -> Self {
        Self {
            conn: Some(conn),
            shared,
            discard: false,
        }
    }

    /// Marks this connection as unusable; it is closed instead of reused.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.discard {
            drop(conn);
            self.shared.forget_one();
            debug!("event=pool_release module=db status=discarded reason=marked_broken");
        } else {
            self.shared.give_back(conn);
        }
    }
}
