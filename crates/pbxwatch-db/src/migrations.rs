//! Schema versioning on `PRAGMA user_version`.
//!
//! The schema version is the number of scripts in [`SCHEMA`] that have been
//! applied. Each pending script runs in its own transaction together with the
//! version bump, so a failed script leaves both schema and version untouched.

use rusqlite::Connection;
use thiserror::Error;

/// Schema scripts; version `n` is reached by applying the first `n`.
const SCHEMA: &[&str] = &[
    include_str!("migrations/000_endpoints.sql"),
    include_str!("migrations/001_queue_members.sql"),
];

/// Errors raised while bringing the schema up to date.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A schema script failed; the database stays at `version - 1`.
    #[error("schema upgrade to version {version} failed: {source}")]
    ExecutionFailed {
        version: usize,
        source: rusqlite::Error,
    },

    /// The database was written by a newer build.
    #[error("database schema version {found} is newer than the supported {known}")]
    SchemaAhead { found: usize, known: usize },

    #[error("failed to read schema version: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending schema script and returns how many ran.
///
/// # Errors
///
/// Returns `MigrationError::SchemaAhead` when the database is newer than this
/// build, or the first failure while reading the version or running a script.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    upgrade(conn, SCHEMA)
}

fn schema_version(conn: &Connection) -> Result<usize, MigrationError> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(MigrationError::StateQuery)?;
    Ok(usize::try_from(version).unwrap_or(0))
}

fn upgrade(conn: &Connection, scripts: &[&str]) -> Result<usize, MigrationError> {
    let current = schema_version(conn)?;
    if current > scripts.len() {
        return Err(MigrationError::SchemaAhead {
            found: current,
            known: scripts.len(),
        });
    }

    for (index, script) in scripts.iter().enumerate().skip(current) {
        let version = index + 1;
        let failed = |source| MigrationError::ExecutionFailed { version, source };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(script).map_err(failed)?;
        tx.pragma_update(None, "user_version", version as i64)
            .map_err(failed)?;
        tx.commit().map_err(failed)?;

        tracing::info!(version, "database schema upgraded");
    }

    Ok(scripts.len() - current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        Connection::open_in_memory().expect("should open in-memory db")
    }

    #[test]
    fn fresh_database_reaches_latest_version() {
        let conn = open();
        assert_eq!(run_migrations(&conn).expect("upgrade"), SCHEMA.len());
        assert_eq!(schema_version(&conn).expect("version"), SCHEMA.len());
        assert_eq!(run_migrations(&conn).expect("second run"), 0);
    }

    #[test]
    fn partially_upgraded_database_applies_only_the_rest() {
        let conn = open();
        assert_eq!(upgrade(&conn, &SCHEMA[..1]).expect("first script"), 1);
        assert_eq!(run_migrations(&conn).expect("rest"), SCHEMA.len() - 1);
    }

    #[test]
    fn failed_script_keeps_schema_and_version() {
        let conn = open();
        let scripts = [
            "CREATE TABLE endpoints_v1 (id TEXT PRIMARY KEY);",
            "CREATE TABLE half_done (id INTEGER PRIMARY KEY);
             INSERT INTO no_such_table (id) VALUES (1);",
        ];

        let err = upgrade(&conn, &scripts).expect_err("second script should fail");
        assert!(matches!(
            err,
            MigrationError::ExecutionFailed { version: 2, .. }
        ));
        assert_eq!(schema_version(&conn).expect("version"), 1);

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'half_done')",
                [],
                |row| row.get(0),
            )
            .expect("should query sqlite_master");
        assert!(!exists, "failed script should roll back");
    }

    #[test]
    fn newer_database_is_refused() {
        let conn = open();
        conn.pragma_update(None, "user_version", 99_i64)
            .expect("set version");
        let err = run_migrations(&conn).expect_err("newer schema should be refused");
        assert!(matches!(
            err,
            MigrationError::SchemaAhead { found: 99, known } if known == SCHEMA.len()
        ));
    }
}
