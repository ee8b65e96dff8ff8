use pbxwatch_db::{
    create_pool, register_endpoint, register_queue_member, run_migrations, tenant_for_endpoint,
    toggle_member_pause, DbRuntimeSettings,
};
use pbxwatch_types::TenantId;

fn file_pool(dir: &tempfile::TempDir) -> pbxwatch_db::DbPool {
    let path = dir.path().join("pbxwatch.db");
    create_pool(
        path.to_str().expect("temp path should be utf-8"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool")
}

#[test]
fn db_initialization_creates_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = file_pool(&dir);
    let conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&conn).expect("failed to run migrations");
    assert_eq!(applied, 2);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(tables, vec!["endpoints", "queue_members"]);

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("schema version");
    assert_eq!(version, 2);
}

#[test]
fn endpoint_lookup_returns_owner_or_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = file_pool(&dir);
    let conn = pool.get().expect("connection");
    run_migrations(&conn).expect("migrations");

    register_endpoint(&conn, "101", TenantId(110001)).expect("register");

    // A second pooled connection sees the same file.
    let other = pool.get().expect("second connection");
    assert_eq!(
        tenant_for_endpoint(&other, "101").expect("lookup"),
        Some(TenantId(110001))
    );
    assert_eq!(tenant_for_endpoint(&other, "999").expect("lookup"), None);

    register_endpoint(&conn, "101", TenantId(110002)).expect("reassign");
    assert_eq!(
        tenant_for_endpoint(&conn, "101").expect("lookup"),
        Some(TenantId(110002))
    );
}

#[test]
fn toggle_pause_flips_every_membership() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = file_pool(&dir);
    let conn = pool.get().expect("connection");
    run_migrations(&conn).expect("migrations");

    register_queue_member(&conn, "support", "PJSIP/101").expect("member");
    register_queue_member(&conn, "sales", "PJSIP/101").expect("member");

    assert_eq!(toggle_member_pause(&conn, "PJSIP/101").expect("toggle"), 2);
    let paused: i64 = conn
        .query_row(
            "SELECT SUM(paused) FROM queue_members WHERE interface = 'PJSIP/101'",
            [],
            |row| row.get(0),
        )
        .expect("sum");
    assert_eq!(paused, 2);

    toggle_member_pause(&conn, "PJSIP/101").expect("toggle back");
    let paused: i64 = conn
        .query_row(
            "SELECT SUM(paused) FROM queue_members WHERE interface = 'PJSIP/101'",
            [],
            |row| row.get(0),
        )
        .expect("sum");
    assert_eq!(paused, 0);

    assert_eq!(toggle_member_pause(&conn, "PJSIP/404").expect("toggle"), 0);
}
