//! Connection pool for SQLite
//!
//! A fixed-size pool of `rusqlite::Connection`s behind a mutex + condvar.
//! WAL mode lets readers proceed concurrently while SQLite serializes
//! writers; the pool just bounds how many connections exist and hands them
//! out one at a time. Feedback writes are `INSERT`-only, so contention
//! stays low.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{DbError, DbResult};
use crate::schema;

/// Default connection count.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default acquire timeout.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15);

struct Shared {
    idle: Mutex<VecDeque<Connection>>,
    available: Condvar,
}

/// Fixed-size SQLite connection pool.
pub struct DbPool {
    shared: Arc<Shared>,
    path: PathBuf,
    acquire_timeout: Duration,
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPool")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DbPool {
    /// Open `size` connections against the database at `path`, creating
    /// the schema when missing.
    ///
    /// # Errors
    /// Returns `DbError` when the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>, size: usize) -> DbResult<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::Pool(format!("cannot create db dir: {e}")))?;
        }

        let size = size.max(1);
        let mut idle = VecDeque::with_capacity(size);
        for i in 0..size {
            let conn = Self::open_connection(&path)?;
            if i == 0 {
                schema::init_schema(&conn)?;
            }
            idle.push_back(conn);
        }

        tracing::info!(path = %path.display(), size, "database pool opened");
        Ok(Arc::new(Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(idle),
                available: Condvar::new(),
            }),
            path,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }))
    }

    fn open_connection(path: &Path) -> DbResult<Connection> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Borrow a connection, blocking up to the acquire timeout.
    ///
    /// # Errors
    /// Returns `DbError::Pool` when no connection frees up in time.
    pub fn acquire(self: &Arc<Self>) -> DbResult<PooledConnection> {
        let mut idle = self
            .shared
            .idle
            .lock()
            .map_err(|_| DbError::Pool("pool lock poisoned".to_owned()))?;
        let deadline = std::time::Instant::now() + self.acquire_timeout;
        loop {
            if let Some(conn) = idle.pop_front() {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    shared: Arc::clone(&self.shared),
                });
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(DbError::Pool("acquire timeout".to_owned()));
            }
            let (guard, _result) = self
                .shared
                .available
                .wait_timeout(idle, remaining)
                .map_err(|_| DbError::Pool("pool lock poisoned".to_owned()))?;
            idle = guard;
        }
    }

    /// Run `f` on a pooled connection.
    ///
    /// # Errors
    /// Propagates acquire failures and whatever `f` returns.
    pub fn with<T>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut Connection) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut pooled = self.acquire()?;
        f(pooled.conn_mut())
    }
}

/// A connection borrowed from the pool; returned on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<Shared>,
}

impl PooledConnection {
    /// Mutable access (required for transactions).
    #[allow(clippy::missing_panics_doc)]
    pub fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Ok(mut idle) = self.shared.idle.lock()
        {
            idle.push_back(conn);
            self.shared.available.notify_one();
        }
    }
}
