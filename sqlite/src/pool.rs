//! A small blocking connection pool.
//!
//! Connections are opened lazily up to `pool.max_connections` and handed out
//! as [`PooledConnection`] guards. A guard returns its connection when it is
//! dropped, including during unwinding, so every exit path of a caller
//! releases the connection.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, SqliteError};

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// Pool of configured SQLite connections to one database.
///
/// # Examples
///
/// ```
/// use tablemap_sqlite::{ConnectionPool, DatabaseConfig};
///
/// let pool = ConnectionPool::open(DatabaseConfig::in_memory()).unwrap();
/// let conn = pool.get().unwrap();
/// let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
/// assert_eq!(one, 1);
/// ```
pub struct ConnectionPool {
    config: DatabaseConfig,
    max_connections: usize,
    state: Mutex<PoolState>,
    cv: Condvar,
}

impl ConnectionPool {
    /// Validates the configuration and opens the first connection, so that
    /// an unreachable database fails here rather than on first use.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let max_connections = if config.is_memory() {
            1
        } else {
            config.pool.max_connections
        };
        let first = open_connection(&config)?;
        debug!(path = %config.path, max_connections, "opened connection pool");
        Ok(Self {
            config,
            max_connections,
            state: Mutex::new(PoolState {
                idle: vec![first],
                open: 1,
            }),
            cv: Condvar::new(),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| SqliteError::ConnectionError("connection pool lock poisoned".into()))
    }

    /// Borrows a connection, waiting up to `pool.acquire_timeout_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::ConnectionError`] on timeout or if a new
    /// connection cannot be opened.
    pub fn get(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.config.acquire_timeout();
        let mut state = self.lock()?;
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.open < self.max_connections {
                state.open += 1;
                drop(state);
                return match open_connection(&self.config) {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        self.lock()?.open -= 1;
                        self.cv.notify_one();
                        Err(e)
                    }
                };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout());
            }
            let (next, wait) = self.cv.wait_timeout(state, remaining).map_err(|_| {
                SqliteError::ConnectionError("connection pool lock poisoned".into())
            })?;
            state = next;
            if wait.timed_out() && state.idle.is_empty() && state.open >= self.max_connections {
                return Err(self.timeout());
            }
        }
    }

    fn timeout(&self) -> SqliteError {
        SqliteError::ConnectionError(format!(
            "timed out after {}ms waiting for a connection to '{}'",
            self.config.pool.acquire_timeout_ms, self.config.path
        ))
    }

    fn release(&self, conn: Connection) {
        match self.state.lock() {
            Ok(mut state) => {
                if conn.is_autocommit() {
                    state.idle.push(conn);
                } else {
                    // an open transaction must not leak into the next borrower
                    warn!("discarding pooled connection left inside a transaction");
                    state.open -= 1;
                }
                drop(state);
                self.cv.notify_one();
            }
            Err(_) => warn!("connection pool lock poisoned, dropping connection"),
        }
    }
}

/// Opens and configures one connection.
fn open_connection(config: &DatabaseConfig) -> Result<Connection> {
    let conn = if config.is_memory() {
        Connection::open_in_memory()
    } else {
        Connection::open(&config.path)
    }
    .map_err(|e| {
        SqliteError::ConnectionError(format!("failed to open '{}': {e}", config.path))
    })?;

    conn.busy_timeout(config.busy_timeout())?;
    let fk = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {fk};"))?;
    if let Some(mode) = &config.journal_mode {
        if !config.is_memory() {
            let applied: String =
                conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
            debug!(requested = %mode, applied = %applied, "journal mode");
        }
    }
    Ok(conn)
}

/// A borrowed connection; returned to its pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only `drop` takes the connection out
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
