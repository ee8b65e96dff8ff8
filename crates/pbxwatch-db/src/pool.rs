//! Shared SQLite pool for tenant lookups and pause toggles.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;

/// Tunables from the `[database]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a statement waits on a locked file, and how long a caller
    /// waits for a free pooled connection.
    pub busy_timeout_ms: u64,

    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

fn prepare(conn: &mut Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // In-memory databases report "memory".
    if mode != "wal" && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            Some(format!("journal_mode stayed {mode}")),
        ));
    }
    Ok(())
}

/// Opens the pool used by the tenant directory and the pause command.
///
/// Every connection runs in WAL mode so pause toggles never block the
/// lookups made while classifying events. `:memory:` gives each pooled
/// connection its own database; tests that share rows use a temp file.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if no connection can be opened.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let wait = Duration::from_millis(settings.busy_timeout_ms.max(1));
    let manager =
        SqliteConnectionManager::file(db_path).with_init(move |conn| prepare(conn, wait));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(wait)
        .build(manager)?;

    tracing::debug!(path = db_path, max_size = settings.pool_max_size, "database pool ready");
    Ok(pool)
}
