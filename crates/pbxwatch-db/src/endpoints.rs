//! Endpoint ownership and queue-member pause queries.

use pbxwatch_types::TenantId;
use rusqlite::{params, Connection, OptionalExtension};

/// Looks up the tenant owning a bare extension.
///
/// A missing row is a normal outcome (`Ok(None)`): unprovisioned extensions
/// show up on the wire all the time.
///
/// # Errors
///
/// Returns the underlying `rusqlite::Error` on SQL failure.
pub fn tenant_for_endpoint(
    conn: &Connection,
    extension: &str,
) -> Result<Option<TenantId>, rusqlite::Error> {
    conn.query_row(
        "SELECT tenant_id FROM endpoints WHERE id = ?1",
        [extension],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|found| found.map(TenantId))
}

/// Records (or re-assigns) the owner of an extension.
///
/// # Errors
///
/// Returns the underlying `rusqlite::Error` on SQL failure.
pub fn register_endpoint(
    conn: &Connection,
    extension: &str,
    tenant: TenantId,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO endpoints (id, tenant_id) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET tenant_id = excluded.tenant_id",
        params![extension, tenant.0],
    )?;
    Ok(())
}

/// Adds an interface to a queue, unpaused.
///
/// # Errors
///
/// Returns the underlying `rusqlite::Error` on SQL failure.
pub fn register_queue_member(
    conn: &Connection,
    queue_name: &str,
    interface: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO queue_members (queue_name, interface, paused) VALUES (?1, ?2, 0)",
        params![queue_name, interface],
    )?;
    Ok(())
}

/// Flips the `paused` flag on every queue membership of `interface`.
///
/// Returns the number of memberships changed; zero means the interface is
/// not a member of any queue.
///
/// # Errors
///
/// Returns the underlying `rusqlite::Error` on SQL failure.
pub fn toggle_member_pause(conn: &Connection, interface: &str) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE queue_members
         SET paused = CASE WHEN paused = 1 THEN 0 ELSE 1 END
         WHERE interface = ?1",
        [interface],
    )
}
