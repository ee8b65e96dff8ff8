//! Tenant-partitioned in-memory stores.

mod agents;
mod calls;
mod queues;

use pbxwatch_types::{MonitorSnapshot, TenantId};

pub use agents::AgentStore;
pub use calls::{CallLeg, CallStore, LegRemoval};
pub use queues::QueueStore;

/// The three stores that make up the monitored state.
#[derive(Debug, Default)]
pub struct Monitor {
    pub agents: AgentStore,
    pub calls: CallStore,
    pub queues: QueueStore,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of one tenant's state.
    ///
    /// The three maps are read one after another, not under a common lock,
    /// so a concurrent mutation may land between them.
    pub fn snapshot(&self, tenant: TenantId) -> MonitorSnapshot {
        MonitorSnapshot {
            agents: self.agents.get(tenant),
            calls: self.calls.get(tenant),
            queues: self.queues.get(tenant),
        }
    }

    /// Returns every agent bound to `call_id` in `tenant` to idle, then
    /// removes the call.
    ///
    /// This is the one way a call ends, whether by last-leg hangup, sweep,
    /// or operator command. Returns whether a call was removed.
    pub fn end_call(&self, tenant: TenantId, call_id: &str) -> bool {
        let released = self.agents.release_bound(tenant, call_id);
        let removed = self.calls.remove(tenant, call_id).is_some();
        if removed || !released.is_empty() {
            tracing::debug!(
                tenant = %tenant,
                call_id,
                released = ?released,
                "call ended"
            );
        }
        removed
    }
}
