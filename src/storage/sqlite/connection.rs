//! Shared connection handling for `SQLite` backends.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// the inner value is recovered and a warning is logged, so one panicking
/// call does not take every later call down with it.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens a file-backed connection, or an in-memory one when `path` is `None`.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns [`Error::Storage`] if the directory or database cannot be opened.
pub fn open_connection(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::storage("create_db_dir", e))?;
            }
            Connection::open(path).map_err(|e| Error::storage("open_sqlite", e))?
        },
        None => {
            Connection::open_in_memory().map_err(|e| Error::storage("open_sqlite_memory", e))?
        },
    };
    configure_connection(&conn)?;
    Ok(conn)
}

/// Configures a `SQLite` connection for concurrent access.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: durable at transaction commit under WAL
/// - **`busy_timeout`**: waits up to 5 seconds for locks instead of failing immediately
/// - **`foreign_keys`**: enables `ON DELETE CASCADE` on association tables
///
/// # Errors
///
/// Returns [`Error::Storage`] if the foreign key pragma cannot be set.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so failures here are tolerated (in-memory
    // databases report "memory")
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::storage("configure_sqlite", e))?;
    Ok(())
}
