//! Tenant attribution of raw events.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use pbxwatch_ami::EventRecord;
use pbxwatch_db::{tenant_for_endpoint, DbPool};
use pbxwatch_types::TenantId;

use crate::error::DirectoryError;
use crate::identify::is_extension;
use crate::sync;

/// Fields that may carry an owning extension, in the order they are tried.
///
/// `Peer` and `Interface` name the device on registration and queue member
/// events, which have no `Device` field.
const CANDIDATE_FIELDS: [&str; 6] = [
    "Channel",
    "Device",
    "Peer",
    "Interface",
    "ConnectedLineNum",
    "CallerIDNum",
];

/// Source of truth for which tenant owns an extension.
pub trait EndpointDirectory: Send + Sync {
    /// Returns the owner of `extension`, or `None` if it is not provisioned.
    fn tenant_for_extension(&self, extension: &str) -> Result<Option<TenantId>, DirectoryError>;
}

/// Endpoint directory backed by the `endpoints` table.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: DbPool,
}

impl SqliteDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl EndpointDirectory for SqliteDirectory {
    fn tenant_for_extension(&self, extension: &str) -> Result<Option<TenantId>, DirectoryError> {
        let conn = self.pool.get()?;
        Ok(tenant_for_endpoint(&conn, extension)?)
    }
}

impl fmt::Debug for SqliteDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDirectory").finish_non_exhaustive()
    }
}

/// Extension → tenant mappings learned so far.
///
/// Entries are never invalidated: an extension's owner is assumed fixed for
/// the life of the process. Misses are not cached, so an extension
/// provisioned after startup resolves as soon as it appears in the
/// directory.
#[derive(Debug, Default)]
pub struct TenantCache {
    entries: RwLock<HashMap<String, TenantId>>,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, extension: &str) -> Option<TenantId> {
        sync::read(&self.entries, "tenant_cache").get(extension).copied()
    }

    pub fn insert(&self, extension: &str, tenant: TenantId) {
        sync::write(&self.entries, "tenant_cache").insert(extension.to_string(), tenant);
    }

    pub fn len(&self) -> usize {
        sync::read(&self.entries, "tenant_cache").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps events and bare extensions to their owning tenant.
#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn EndpointDirectory>,
    cache: Arc<TenantCache>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn EndpointDirectory>, cache: Arc<TenantCache>) -> Self {
        Self { directory, cache }
    }

    /// Attributes an event to a tenant.
    ///
    /// Tries the channel and device fields, then the connected-line and
    /// caller numbers, and returns the first candidate that resolves. `None` means the
    /// event must be dropped.
    pub fn resolve(&self, record: &EventRecord) -> Option<TenantId> {
        CANDIDATE_FIELDS
            .iter()
            .filter_map(|field| extract_extension(record.get(field)))
            .find_map(|extension| self.lookup(extension))
    }

    /// Resolves a single raw extension (or channel name) on its own.
    pub fn resolve_by_extension(&self, raw: &str) -> Option<TenantId> {
        extract_extension(raw).and_then(|extension| self.lookup(extension))
    }

    fn lookup(&self, extension: &str) -> Option<TenantId> {
        if let Some(tenant) = self.cache.get(extension) {
            return Some(tenant);
        }
        match self.directory.tenant_for_extension(extension) {
            Ok(Some(tenant)) => {
                self.cache.insert(extension, tenant);
                tracing::debug!(extension, tenant = %tenant, "extension resolved");
                Some(tenant)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(extension, error = %e, "endpoint lookup failed");
                None
            }
        }
    }
}

impl fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantResolver")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Bare numeric extension from a channel name, device or number.
///
/// Strips a `PJSIP/` prefix and cuts at the first `-` leg suffix:
/// `PJSIP/101-0000002a` → `101`, `202` → `202`. Anything that is not all
/// digits afterwards (trunks, queues, `Local/` channels) is rejected.
pub fn extract_extension(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let bare = raw.strip_prefix("PJSIP/").unwrap_or(raw);
    let bare = bare.split('-').next().unwrap_or(bare);
    is_extension(bare).then_some(bare)
}
