//! Database layer for pbxwatch.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the two queries the monitoring core needs
//! from relational storage: which tenant owns an endpoint, and the persisted
//! queue-member pause flag that operators toggle.
//!
//! Everything else about users, tenants, and credentials belongs to the
//! provisioning side and is not modelled here.

mod endpoints;
mod migrations;
mod pool;

pub use endpoints::{register_endpoint, register_queue_member, tenant_for_endpoint, toggle_member_pause};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
