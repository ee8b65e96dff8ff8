//! Operator commands: forced hangup and queue pause toggle.

use std::sync::Arc;

use pbxwatch_ami::ManagerClient;
use pbxwatch_db::{toggle_member_pause, DbPool};
use pbxwatch_types::TenantId;
use serde::Serialize;

use crate::error::CommandError;
use crate::stores::Monitor;

/// What a successful hangup acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupReceipt {
    pub call_id: String,
    pub channel: String,
    /// Tenant whose store held the call.
    pub owner: TenantId,
}

/// Operator actions against the PBX and the persisted pause flags.
#[derive(Clone)]
pub struct OperatorCommands {
    monitor: Arc<Monitor>,
    client: ManagerClient,
    pool: DbPool,
}

impl OperatorCommands {
    pub fn new(monitor: Arc<Monitor>, client: ManagerClient, pool: DbPool) -> Self {
        Self {
            monitor,
            client,
            pool,
        }
    }

    /// Hangs up a call on behalf of an operator of `tenant`.
    ///
    /// The call is looked up in the operator's own tenant first, then in
    /// every tenant. After the command is written, agents bound to the call
    /// are released and the call is removed without waiting for the PBX to
    /// echo the hangup.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown call, `NoChannel` if it has no legs,
    /// `NotConnected` or `Transport` if the command cannot be sent.
    pub async fn hangup(
        &self,
        tenant: TenantId,
        call_id: &str,
    ) -> Result<HangupReceipt, CommandError> {
        if call_id.is_empty() {
            return Err(CommandError::Invalid("callId is required".to_string()));
        }
        let (owner, call) = self
            .monitor
            .calls
            .get_call(tenant, call_id)
            .map(|call| (tenant, call))
            .or_else(|| self.monitor.calls.find_any(call_id))
            .ok_or_else(|| CommandError::NotFound(format!("call {call_id}")))?;

        let channel = if call.primary_channel.is_empty() {
            call.channels.first().cloned().unwrap_or_default()
        } else {
            call.primary_channel.clone()
        };
        if channel.is_empty() {
            return Err(CommandError::NoChannel(call_id.to_string()));
        }

        self.client
            .send_command("Hangup", &[("Channel", channel.as_str())])
            .await?;
        tracing::info!(tenant = %tenant, owner = %owner, call_id, channel = %channel, "hangup sent");

        self.monitor.end_call(owner, call_id);
        if owner != tenant {
            self.monitor.end_call(tenant, call_id);
        }

        Ok(HangupReceipt {
            call_id: call_id.to_string(),
            channel,
            owner,
        })
    }

    /// Flips the persisted pause flag on every queue membership of `agent`.
    ///
    /// The PBX picks the change up from the database and reports it back as
    /// a queue member pause event, which updates the agent's status.
    ///
    /// # Errors
    ///
    /// `NotFound` if the agent is not a member of any queue, `Database` if
    /// the update fails.
    pub async fn toggle_pause(&self, agent: &str) -> Result<usize, CommandError> {
        if agent.is_empty() {
            return Err(CommandError::Invalid("agent is required".to_string()));
        }
        let interface = format!("PJSIP/{agent}");
        let pool = self.pool.clone();
        let lookup = interface.clone();
        let changed = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| CommandError::Database(e.to_string()))?;
            toggle_member_pause(&conn, &lookup).map_err(|e| CommandError::Database(e.to_string()))
        })
        .await
        .map_err(|e| CommandError::Database(format!("pause task failed: {e}")))??;

        if changed == 0 {
            return Err(CommandError::NotFound(format!("queue member {interface}")));
        }
        tracing::info!(agent, memberships = changed, "queue pause toggled");
        Ok(changed)
    }
}

impl std::fmt::Debug for OperatorCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorCommands")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
