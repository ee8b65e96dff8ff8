//! Shared types for the pbxwatch monitoring core.
//!
//! This crate holds the entity shapes that every other crate passes around:
//! tenant identifiers, agent presence/call state, live calls, queue counters,
//! and the point-in-time snapshot pushed to observers. All types serialize
//! with the camelCase field names the monitoring frontend expects.
//!
//! Nothing here touches I/O or locking. Merge rules live in the stores of
//! `pbxwatch-monitor`; this crate only defines what is being merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of the customer organization that owns a set of endpoints.
///
/// Every piece of monitored state is partitioned by tenant. An event whose
/// tenant cannot be resolved is dropped, so there is no "zero" tenant in
/// the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Presence/call status of an agent endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    /// Registered and available.
    #[default]
    Idle,
    /// A call is being offered to the endpoint.
    Ringing,
    /// The endpoint is bridged into a call.
    InCall,
    /// Paused in its queues by an operator.
    Paused,
    /// Not reachable.
    Offline,
}

impl AgentStatus {
    /// Returns the wire label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing => "ringing",
            Self::InCall => "in-call",
            Self::Paused => "paused",
            Self::Offline => "offline",
        }
    }

    /// Whether the status is driven by call signaling (ringing or in-call).
    pub fn is_on_call(self) -> bool {
        matches!(self, Self::Ringing | Self::InCall)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one agent endpoint within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Endpoint identifier (the bare extension, e.g. `"101"`).
    pub name: String,
    /// Current status.
    pub status: AgentStatus,
    /// Linkage id of the call the agent is ringing for or talking on.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_call_id: String,
    /// Last known network address of the endpoint.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

impl AgentState {
    /// Creates an agent state with no call binding and no known address.
    pub fn new(name: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            name: name.into(),
            status,
            active_call_id: String::new(),
            ip_address: String::new(),
        }
    }

    /// Sets the call binding.
    pub fn with_call(mut self, call_id: impl Into<String>) -> Self {
        self.active_call_id = call_id.into();
        self
    }

    /// Sets the network address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }
}

/// One logical call, possibly spanning several channel legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// Linkage id shared by every leg of the call.
    pub id: String,
    /// Caller number.
    pub from: String,
    /// Callee number or queue name.
    pub to: String,
    /// One representative leg, kept for single-channel consumers.
    #[serde(rename = "channel")]
    pub primary_channel: String,
    /// Every leg currently part of the call, in join order.
    pub channels: Vec<String>,
    /// When the call was first seen. Never updated after creation.
    pub started_at: DateTime<Utc>,
}

/// Per-queue counters.
///
/// `waiting`, `in_call` and `agents` are maintained incrementally and are
/// unsigned so they cannot go negative; the remaining fields are replaced
/// wholesale from the PBX's periodic queue parameter reports.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Callers currently waiting.
    pub waiting: u32,
    /// Members currently on a call.
    pub in_call: u32,
    /// Members reported for the queue.
    pub agents: u32,
    /// Calls completed (PBX-reported).
    pub completed: u64,
    /// Average hold time in seconds (PBX-reported).
    pub hold_time: u64,
    /// Average talk time in seconds (PBX-reported).
    pub talk_time: u64,
    /// Service level as a ratio in `0.0..=1.0` (PBX-reported).
    pub sla_ratio: f64,
}

impl QueueStats {
    /// Creates an empty stats record for a queue.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Full per-tenant state pushed to observers on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// Agent name → state.
    pub agents: HashMap<String, AgentState>,
    /// Call id → call.
    pub calls: HashMap<String, Call>,
    /// Queue name → counters.
    pub queues: HashMap<String, QueueStats>,
}
