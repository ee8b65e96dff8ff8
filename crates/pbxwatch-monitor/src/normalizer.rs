//! The protocol state machine: raw events in, store mutations out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pbxwatch_ami::{ChannelSignal, EventRecord, ManagerEvent};
use pbxwatch_types::{AgentState, AgentStatus, TenantId};

use crate::identify::{
    agent_from_channel, agent_from_device, agent_from_member, ip_from_address, ip_from_uri,
    IpCache,
};
use crate::resolver::TenantResolver;
use crate::stores::{CallLeg, LegRemoval, Monitor};
use crate::sweep::{self, ChannelEnumeration};
use crate::sync;

/// Behavior switches for the normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizerOptions {
    /// Let presence events clear an agent stuck in `ringing`. Agents
    /// `in-call` are never overridden by presence.
    pub presence_clears_ringing: bool,
}

/// What the normalizer remembers about queues between events.
///
/// Queue parameter reports and callers dialing in from outside carry no
/// provisioned extension, so they are attributed through their queue's
/// owner, learned from queue events that could be attributed. A report for
/// a queue whose owner is not known yet is held (latest only) until a member
/// or caller event reveals it.
///
/// Members are tracked by name per queue, so a membership listing that is
/// repeated (every login runs one) does not count anyone twice.
#[derive(Debug, Default)]
struct QueueTracking {
    owners: HashMap<String, TenantId>,
    pending: HashMap<String, ManagerEvent>,
    members: HashMap<(TenantId, String), HashMap<String, bool>>,
}

/// Applies manager events to the stores.
///
/// Events must be fed from one task, in wire order. Every method is
/// synchronous and may block briefly on an endpoint lookup, so async
/// callers run it on the blocking pool.
pub struct Normalizer {
    monitor: Arc<Monitor>,
    resolver: TenantResolver,
    addresses: Arc<IpCache>,
    enumeration: Mutex<ChannelEnumeration>,
    queues: Mutex<QueueTracking>,
    options: NormalizerOptions,
}

impl Normalizer {
    pub fn new(
        monitor: Arc<Monitor>,
        resolver: TenantResolver,
        addresses: Arc<IpCache>,
        options: NormalizerOptions,
    ) -> Self {
        Self {
            monitor,
            resolver,
            addresses,
            enumeration: Mutex::new(ChannelEnumeration::default()),
            queues: Mutex::new(QueueTracking::default()),
            options,
        }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Starts a new channel enumeration cycle, discarding any partial one.
    pub fn begin_enumeration(&self, action_id: &str) {
        sync::lock(&self.enumeration, "enumeration").begin(action_id);
    }

    /// Forgets queue memberships ahead of a new connection's bootstrap, which
    /// lists every member again.
    pub fn begin_session(&self) {
        sync::lock(&self.queues, "queue_owners").members.clear();
        let tenants = self.monitor.queues.reset_membership();
        tracing::debug!(tenants = tenants.len(), "queue membership counters reset");
    }

    /// Processes one raw record.
    pub fn handle(&self, record: &EventRecord) {
        let Some(event) = ManagerEvent::decode(record) else {
            return;
        };
        if let ManagerEvent::Other(tag) = &event {
            tracing::trace!(event = %tag, "ignoring event");
            return;
        }
        if event.is_tenant_independent() {
            self.apply_global(event);
            return;
        }
        let queue = queue_of(&event).map(str::to_string);
        let resolved = self.resolver.resolve(record).or_else(|| {
            let queue = queue.as_deref()?;
            sync::lock(&self.queues, "queue_owners").owners.get(queue).copied()
        });
        let Some(tenant) = resolved else {
            match queue {
                Some(queue) if matches!(event, ManagerEvent::QueueParams { .. }) => {
                    tracing::trace!(queue = %queue, "holding queue report until owner is known");
                    sync::lock(&self.queues, "queue_owners").pending.insert(queue, event);
                }
                _ => {
                    tracing::trace!(event = ?record.event_type(), "event not attributable to a tenant");
                }
            }
            return;
        };
        let is_report = matches!(event, ManagerEvent::QueueParams { .. });
        self.apply(tenant, event);

        if let Some(queue) = queue {
            let pending = {
                let mut queues = sync::lock(&self.queues, "queue_owners");
                queues.owners.insert(queue.clone(), tenant);
                queues.pending.remove(&queue)
            };
            if let Some(report) = pending.filter(|_| !is_report) {
                tracing::debug!(tenant = %tenant, queue = %queue, "applying held queue report");
                self.apply(tenant, report);
            }
        }
    }

    fn apply_global(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::ContactStatus { aor, uri, reachable } => {
                if aor.is_empty() || !reachable {
                    return;
                }
                let ip = ip_from_uri(&uri);
                if ip.is_empty() {
                    return;
                }
                self.addresses.insert(&aor, ip);
                let tenants = self.monitor.agents.set_ip_everywhere(&aor, ip);
                tracing::debug!(agent = %aor, ip, tenants = tenants.len(), "contact address learned");
            }
            ManagerEvent::CoreShowChannel { linked_id, action_id } => {
                sync::lock(&self.enumeration, "enumeration").observe(&action_id, &linked_id);
            }
            ManagerEvent::CoreShowChannelsComplete { action_id } => {
                let live = sync::lock(&self.enumeration, "enumeration").complete(&action_id);
                match live {
                    Some(live) => {
                        sweep::reconcile(&self.monitor, &live);
                    }
                    None => {
                        tracing::debug!(
                            action_id = %action_id,
                            "ignoring enumeration from another cycle"
                        );
                    }
                }
            }
            other => tracing::warn!(event = ?other, "tenant-scoped event routed as global"),
        }
    }

    fn apply(&self, tenant: TenantId, event: ManagerEvent) {
        let monitor = &self.monitor;
        match event {
            ManagerEvent::QueueParams {
                queue,
                completed,
                hold_time,
                talk_time,
                service_level_perf,
            } => {
                monitor.queues.update(tenant, &queue, |q| {
                    q.completed = completed;
                    q.hold_time = hold_time;
                    q.talk_time = talk_time;
                    q.sla_ratio = service_level_perf / 100.0;
                });
            }
            ManagerEvent::QueueMember {
                queue,
                member_name,
                in_call,
            } => {
                let (agents, busy) = {
                    let mut queues = sync::lock(&self.queues, "queue_owners");
                    let members = queues.members.entry((tenant, queue.clone())).or_default();
                    members.insert(member_name, in_call);
                    (members.len(), members.values().filter(|busy| **busy).count())
                };
                monitor.queues.update(tenant, &queue, |q| {
                    q.agents = u32::try_from(agents).unwrap_or(u32::MAX);
                    q.in_call = u32::try_from(busy).unwrap_or(u32::MAX);
                });
            }
            ManagerEvent::QueueCallerJoin {
                queue,
                call_id,
                caller_id_num,
                channel,
            } => {
                monitor.queues.update(tenant, &queue, |q| {
                    q.waiting = q.waiting.saturating_add(1);
                });
                monitor.calls.upsert(
                    tenant,
                    CallLeg {
                        id: call_id,
                        from: caller_id_num,
                        to: queue,
                        channel,
                    },
                );
            }
            ManagerEvent::QueueCallerLeave { queue, call_id } => {
                monitor.queues.update(tenant, &queue, |q| {
                    q.waiting = q.waiting.saturating_sub(1);
                });
                if call_id.is_empty() {
                    return;
                }
                if monitor.agents.is_call_claimed(tenant, &call_id) {
                    tracing::debug!(
                        tenant = %tenant,
                        call_id = %call_id,
                        queue = %queue,
                        "caller left queue for an agent"
                    );
                } else if monitor.calls.remove(tenant, &call_id).is_some() {
                    tracing::debug!(
                        tenant = %tenant,
                        call_id = %call_id,
                        queue = %queue,
                        "caller abandoned queue"
                    );
                }
            }
            ManagerEvent::QueueMemberPause { member_name, paused } => {
                if member_name.is_empty() {
                    return;
                }
                let status = if paused {
                    AgentStatus::Paused
                } else {
                    AgentStatus::Idle
                };
                monitor
                    .agents
                    .release(tenant, agent_from_member(&member_name), status);
            }
            ManagerEvent::DialBegin(signal) | ManagerEvent::Newstate(signal) => {
                self.on_ringing(tenant, signal);
            }
            ManagerEvent::BridgeEnter(signal) => self.on_bridge(tenant, signal),
            ManagerEvent::Hangup { channel, linked_id } => {
                self.on_hangup(tenant, &channel, &linked_id);
            }
            ManagerEvent::PeerStatus { peer, status, address } => {
                let Some(agent) = agent_from_channel(&peer) else {
                    return;
                };
                let next = if status == "Reachable" {
                    AgentStatus::Idle
                } else {
                    AgentStatus::Offline
                };
                self.on_presence(tenant, agent, next, ip_from_address(&address));
            }
            ManagerEvent::DeviceStateChange { device, state } => {
                let Some(agent) = agent_from_device(&device) else {
                    return;
                };
                let next = match state.as_str() {
                    "NOT_INUSE" => AgentStatus::Idle,
                    "UNAVAILABLE" | "INVALID" => AgentStatus::Offline,
                    _ => return,
                };
                self.on_presence(tenant, agent, next, "");
            }
            ManagerEvent::ContactStatus { .. }
            | ManagerEvent::CoreShowChannel { .. }
            | ManagerEvent::CoreShowChannelsComplete { .. }
            | ManagerEvent::Other(_) => {}
        }
    }

    fn on_ringing(&self, tenant: TenantId, signal: ChannelSignal) {
        if !signal.channel_state.is_empty() && signal.channel_state != "Ringing" {
            return;
        }
        if signal.linked_id.is_empty() {
            return;
        }
        let agent = agent_from_channel(&signal.channel).map(str::to_string);
        let call_id = signal.linked_id.clone();
        self.monitor.calls.upsert(
            tenant,
            CallLeg {
                id: signal.linked_id,
                from: signal.caller_id_num,
                to: signal.connected_line_num,
                channel: signal.channel,
            },
        );
        if let Some(agent) = agent {
            let state = AgentState::new(&agent, AgentStatus::Ringing)
                .with_call(call_id)
                .with_ip(self.cached_ip(&agent));
            self.monitor.agents.update(tenant, state);
        }
    }

    /// Adds the answered leg to its call. Trunk and local legs join the call
    /// but bind no agent and are never mirrored.
    fn on_bridge(&self, tenant: TenantId, signal: ChannelSignal) {
        if signal.linked_id.is_empty() {
            return;
        }
        let agent = agent_from_channel(&signal.channel).map(str::to_string);
        let leg = CallLeg {
            id: signal.linked_id.clone(),
            from: signal.caller_id_num.clone(),
            to: signal.connected_line_num.clone(),
            channel: signal.channel.clone(),
        };
        let Some(agent) = agent else {
            self.monitor.calls.upsert(tenant, leg);
            return;
        };

        let other_party = if signal.connected_line_num == agent {
            &signal.caller_id_num
        } else {
            &signal.connected_line_num
        };
        let other_tenant = self
            .resolver
            .resolve_by_extension(other_party)
            .filter(|other| *other != tenant);
        if let Some(other) = other_tenant {
            tracing::debug!(
                tenant = %tenant,
                other_tenant = %other,
                call_id = %leg.id,
                "mirroring cross-tenant call"
            );
            self.monitor.calls.upsert(other, leg.clone());
        }
        self.monitor.calls.upsert(tenant, leg);

        let state = AgentState::new(&agent, AgentStatus::InCall)
            .with_call(signal.linked_id)
            .with_ip(self.cached_ip(&agent));
        self.monitor.agents.update(tenant, state);
    }

    fn on_hangup(&self, tenant: TenantId, channel: &str, call_id: &str) {
        if call_id.is_empty() {
            return;
        }
        match self.monitor.calls.remove_leg(tenant, call_id, channel) {
            LegRemoval::NotFound => {
                tracing::debug!(tenant = %tenant, call_id, channel, "hangup for unknown call");
            }
            LegRemoval::Remaining(call) => {
                tracing::debug!(
                    tenant = %tenant,
                    call_id,
                    channel,
                    remaining = call.channels.len(),
                    "call leg ended"
                );
            }
            LegRemoval::Last(_) => {
                self.monitor.end_call(tenant, call_id);
            }
        }
    }

    /// Applies a presence-family status unless a call owns the agent.
    fn on_presence(&self, tenant: TenantId, agent: &str, status: AgentStatus, ip: &str) {
        let current = self.monitor.agents.get_agent(tenant, agent);
        let ip = if ip.is_empty() {
            self.cached_ip(agent)
        } else {
            ip.to_string()
        };
        match current.map(|a| a.status) {
            Some(AgentStatus::InCall) => {
                tracing::trace!(tenant = %tenant, agent, "presence ignored during call");
            }
            Some(AgentStatus::Ringing) if !self.options.presence_clears_ringing => {
                tracing::trace!(tenant = %tenant, agent, "presence ignored while ringing");
            }
            Some(AgentStatus::Ringing) => {
                tracing::debug!(
                    tenant = %tenant,
                    agent,
                    status = %status,
                    "presence clearing stale ringing"
                );
                self.monitor.agents.release(tenant, agent, status);
                self.monitor
                    .agents
                    .update(tenant, AgentState::new(agent, status).with_ip(ip));
            }
            _ => {
                self.monitor
                    .agents
                    .update(tenant, AgentState::new(agent, status).with_ip(ip));
            }
        }
    }

    fn cached_ip(&self, agent: &str) -> String {
        self.addresses.get(agent).unwrap_or_default()
    }
}

fn queue_of(event: &ManagerEvent) -> Option<&str> {
    let queue = match event {
        ManagerEvent::QueueParams { queue, .. }
        | ManagerEvent::QueueMember { queue, .. }
        | ManagerEvent::QueueCallerJoin { queue, .. }
        | ManagerEvent::QueueCallerLeave { queue, .. } => queue,
        _ => return None,
    };
    (!queue.is_empty()).then_some(queue.as_str())
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
