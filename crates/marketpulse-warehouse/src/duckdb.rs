//! `DuckDB` connection pool.
//!
//! One database instance is opened per file and every pooled handle is a clone
//! of its root connection, so all handles share the same catalog and
//! transaction manager. Up to `max_pool_size` idle handles are kept per access
//! mode; a [`PooledConnection`] returns itself to the pool on drop.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::Connection;

/// Access mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Default)]
struct IdleConnections {
    read_only: Vec<Connection>,
    read_write: Vec<Connection>,
}

impl IdleConnections {
    fn slot(&mut self, mode: AccessMode) -> &mut Vec<Connection> {
        match mode {
            AccessMode::ReadOnly => &mut self.read_only,
            AccessMode::ReadWrite => &mut self.read_write,
        }
    }
}

struct PoolInner {
    db_path: PathBuf,
    max_pool_size: usize,
    root: Mutex<Connection>,
    idle: Mutex<IdleConnections>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared pool of `DuckDB` connections for one database file.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open the database file and build a pool around it.
    ///
    /// # Errors
    /// Returns the `DuckDB` error when the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_pool_size: max_pool_size.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(IdleConnections::default()),
            }),
        })
    }

    /// Take an idle connection for `mode`, cloning a new one when none is idle.
    ///
    /// # Errors
    /// Returns the `DuckDB` error when a new handle cannot be created.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = relock(&self.inner.idle).slot(mode).pop();
        let connection = match reused {
            Some(connection) => connection,
            None => {
                let connection = relock(&self.inner.root).try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Number of idle connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        let mut idle = relock(&self.inner.idle);
        idle.slot(AccessMode::ReadOnly).len() + idle.slot(AccessMode::ReadWrite).len()
    }
}

/// A checked-out connection; goes back to the pool when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match self.connection.as_ref() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let max = self.pool.max_pool_size;
        let mut idle = relock(&self.pool.idle);
        let slot = idle.slot(self.mode);
        if slot.len() < max {
            slot.push(connection);
        }
    }
}

// Access mode is fixed per database instance, so read-only handles rely on the
// statement checks in the query layer rather than a connection setting.
fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}
