use std::collections::HashMap;
use std::sync::RwLock;

use pbxwatch_types::{AgentState, AgentStatus, TenantId};

use crate::fanout::{Fanout, StoreKind, Subscription};
use crate::sync;

/// Agent presence and call binding, per tenant.
///
/// Writes go through [`AgentStore::update`], which merges rather than
/// replaces: an update that carries no call id or no address keeps the
/// stored one. Leaving a call always goes through [`AgentStore::release`]
/// or [`AgentStore::release_bound`], which clear the binding explicitly.
#[derive(Debug)]
pub struct AgentStore {
    agents: RwLock<HashMap<TenantId, HashMap<String, AgentState>>>,
    fanout: Fanout,
}

impl Default for AgentStore {
    fn default() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            fanout: Fanout::new(StoreKind::Agents),
        }
    }
}

impl AgentStore {
    /// Upserts an agent and returns the stored result.
    ///
    /// A call binding only survives while the status is ringing or in-call:
    /// an empty `active_call_id` inherits the stored one for those statuses,
    /// and any other status clears it. An empty `ip_address` keeps the
    /// stored address.
    pub fn update(&self, tenant: TenantId, mut agent: AgentState) -> AgentState {
        if !agent.status.is_on_call() {
            agent.active_call_id.clear();
        }
        let stored = {
            let mut agents = sync::write(&self.agents, "agents");
            let tenant_agents = agents.entry(tenant).or_default();
            if let Some(previous) = tenant_agents.get(&agent.name) {
                if agent.active_call_id.is_empty() && agent.status.is_on_call() {
                    agent.active_call_id.clone_from(&previous.active_call_id);
                }
                if agent.ip_address.is_empty() {
                    agent.ip_address.clone_from(&previous.ip_address);
                }
            }
            tenant_agents.insert(agent.name.clone(), agent.clone());
            agent
        };
        tracing::debug!(
            tenant = %tenant,
            agent = %stored.name,
            status = %stored.status,
            call_id = %stored.active_call_id,
            "agent updated"
        );
        self.fanout.notify(tenant);
        stored
    }

    /// Sets `status` and clears the call binding, keeping the address.
    pub fn release(&self, tenant: TenantId, name: &str, status: AgentStatus) -> AgentState {
        let stored = {
            let mut agents = sync::write(&self.agents, "agents");
            let agent = agents
                .entry(tenant)
                .or_default()
                .entry(name.to_string())
                .or_insert_with(|| AgentState::new(name, status));
            agent.status = status;
            agent.active_call_id.clear();
            agent.clone()
        };
        tracing::debug!(tenant = %tenant, agent = name, status = %status, "agent released");
        self.fanout.notify(tenant);
        stored
    }

    /// Releases every agent of `tenant` bound to `call_id` back to idle.
    ///
    /// Returns the names of the agents released.
    pub fn release_bound(&self, tenant: TenantId, call_id: &str) -> Vec<String> {
        if call_id.is_empty() {
            return Vec::new();
        }
        let released: Vec<String> = {
            let mut agents = sync::write(&self.agents, "agents");
            let Some(tenant_agents) = agents.get_mut(&tenant) else {
                return Vec::new();
            };
            tenant_agents
                .values_mut()
                .filter(|agent| agent.active_call_id == call_id)
                .map(|agent| {
                    agent.status = AgentStatus::Idle;
                    agent.active_call_id.clear();
                    agent.name.clone()
                })
                .collect()
        };
        if !released.is_empty() {
            self.fanout.notify(tenant);
        }
        released
    }

    /// Records `ip` for the agent named `name` in every tenant that knows it.
    ///
    /// Returns the tenants that were updated.
    pub fn set_ip_everywhere(&self, name: &str, ip: &str) -> Vec<TenantId> {
        let touched: Vec<TenantId> = {
            let mut agents = sync::write(&self.agents, "agents");
            agents
                .iter_mut()
                .filter_map(|(tenant, tenant_agents)| {
                    let agent = tenant_agents.get_mut(name)?;
                    if agent.ip_address == ip {
                        return None;
                    }
                    agent.ip_address = ip.to_string();
                    Some(*tenant)
                })
                .collect()
        };
        for tenant in &touched {
            self.fanout.notify(*tenant);
        }
        touched
    }

    /// Whether any agent of `tenant` is bound to `call_id`.
    pub fn is_call_claimed(&self, tenant: TenantId, call_id: &str) -> bool {
        sync::read(&self.agents, "agents")
            .get(&tenant)
            .is_some_and(|tenant_agents| {
                tenant_agents
                    .values()
                    .any(|agent| agent.active_call_id == call_id)
            })
    }

    pub fn get_agent(&self, tenant: TenantId, name: &str) -> Option<AgentState> {
        sync::read(&self.agents, "agents")
            .get(&tenant)
            .and_then(|tenant_agents| tenant_agents.get(name).cloned())
    }

    /// Copy of every agent of `tenant`.
    pub fn get(&self, tenant: TenantId) -> HashMap<String, AgentState> {
        sync::read(&self.agents, "agents")
            .get(&tenant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe(&self, tenant: TenantId) -> Subscription {
        self.fanout.subscribe(tenant)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.fanout.unsubscribe(subscription);
    }

    /// Number of live observers of this tenant's agents.
    pub fn subscriber_count(&self, tenant: TenantId) -> usize {
        self.fanout.subscriber_count(tenant)
    }
}
