//! Reconciliation of stored calls against the PBX's live channel list.
//!
//! Each cycle sends a channel enumeration request tagged with a fresh
//! `ActionID`. The normalizer collects the linkage ids of the enumerated
//! channels for that id only, and when the matching completion marker
//! arrives every stored call missing from the set is ended.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pbxwatch_ami::{AmiError, ManagerClient};

use crate::normalizer::Normalizer;
use crate::stores::Monitor;

/// Live linkage ids collected for one enumeration cycle.
#[derive(Debug, Default)]
pub struct ChannelEnumeration {
    action_id: Option<String>,
    live: HashSet<String>,
}

impl ChannelEnumeration {
    /// Starts a cycle, dropping whatever an earlier one collected.
    pub fn begin(&mut self, action_id: &str) {
        self.action_id = Some(action_id.to_string());
        self.live.clear();
    }

    /// Records one enumerated channel. Items from other cycles are ignored.
    pub fn observe(&mut self, action_id: &str, linked_id: &str) {
        if self.action_id.as_deref() == Some(action_id) && !linked_id.is_empty() {
            self.live.insert(linked_id.to_string());
        }
    }

    /// Closes the cycle and returns its live set, or `None` if the marker
    /// belongs to another cycle.
    pub fn complete(&mut self, action_id: &str) -> Option<HashSet<String>> {
        if self.action_id.as_deref() != Some(action_id) {
            return None;
        }
        self.action_id = None;
        Some(std::mem::take(&mut self.live))
    }
}

/// Ends every stored call, in any tenant, whose id is not in `live`.
///
/// Returns the number of calls removed.
pub fn reconcile(monitor: &Monitor, live: &HashSet<String>) -> usize {
    let orphaned: Vec<_> = monitor
        .calls
        .ids()
        .into_iter()
        .filter(|(_, id)| !live.contains(id))
        .collect();

    let mut removed = 0;
    for (tenant, call_id) in orphaned {
        if monitor.end_call(tenant, &call_id) {
            tracing::info!(tenant = %tenant, call_id = %call_id, "removed stale call");
            removed += 1;
        }
    }
    tracing::debug!(live = live.len(), removed, "reconciliation complete");
    removed
}

/// Starts one enumeration cycle and sends its request.
///
/// # Errors
///
/// Returns the send failure; the cycle then never completes and is
/// replaced by the next one.
pub async fn request_enumeration(
    client: &ManagerClient,
    normalizer: &Normalizer,
) -> Result<String, AmiError> {
    let action_id = client.next_action_id("sweep");
    normalizer.begin_enumeration(&action_id);
    client
        .send_command("CoreShowChannels", &[("ActionID", action_id.as_str())])
        .await?;
    Ok(action_id)
}

/// Requests an enumeration every `interval`, forever.
///
/// Cycles are skipped quietly while the client is disconnected.
pub async fn run_sweep(client: ManagerClient, normalizer: Arc<Normalizer>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match request_enumeration(&client, &normalizer).await {
            Ok(action_id) => tracing::trace!(action_id = %action_id, "channel enumeration requested"),
            Err(AmiError::NotConnected) => {}
            Err(e) => tracing::warn!(error = %e, "channel enumeration request failed"),
        }
    }
}
