use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use pbxwatch_types::{Call, TenantId};

use crate::fanout::{Fanout, StoreKind, Subscription};
use crate::sync;

/// One observation of a call leg, merged into the stored [`Call`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLeg {
    pub id: String,
    pub from: String,
    pub to: String,
    pub channel: String,
}

/// What [`CallStore::remove_leg`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegRemoval {
    /// No call with that id.
    NotFound,
    /// The leg was removed and others remain.
    Remaining(Call),
    /// The leg was the call's last one. The call is still stored; the
    /// caller releases bound agents first and then removes it.
    Last(Call),
}

/// Live calls, per tenant, keyed by linkage id.
#[derive(Debug)]
pub struct CallStore {
    calls: RwLock<HashMap<TenantId, HashMap<String, Call>>>,
    fanout: Fanout,
}

impl Default for CallStore {
    fn default() -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            fanout: Fanout::new(StoreKind::Calls),
        }
    }
}

impl CallStore {
    /// Merges a leg into the call, creating it on first sight.
    ///
    /// A call is never created without a channel, so a leg with an empty
    /// channel for an unknown id is ignored and `None` is returned. The
    /// latest added channel becomes the primary one; `from`/`to` are only
    /// overwritten by non-empty values; `started_at` never changes.
    pub fn upsert(&self, tenant: TenantId, leg: CallLeg) -> Option<Call> {
        if leg.id.is_empty() {
            return None;
        }
        let stored = {
            let mut calls = sync::write(&self.calls, "calls");
            let tenant_calls = calls.entry(tenant).or_default();
            match tenant_calls.get_mut(&leg.id) {
                Some(call) => {
                    if !leg.from.is_empty() {
                        call.from = leg.from;
                    }
                    if !leg.to.is_empty() {
                        call.to = leg.to;
                    }
                    if !leg.channel.is_empty() {
                        if !call.channels.contains(&leg.channel) {
                            call.channels.push(leg.channel.clone());
                        }
                        call.primary_channel = leg.channel;
                    }
                    call.clone()
                }
                None if leg.channel.is_empty() => return None,
                None => {
                    let call = Call {
                        id: leg.id.clone(),
                        from: leg.from,
                        to: leg.to,
                        primary_channel: leg.channel.clone(),
                        channels: vec![leg.channel],
                        started_at: Utc::now(),
                    };
                    tenant_calls.insert(leg.id, call.clone());
                    call
                }
            }
        };
        tracing::debug!(
            tenant = %tenant,
            call_id = %stored.id,
            legs = stored.channels.len(),
            "call updated"
        );
        self.fanout.notify(tenant);
        Some(stored)
    }

    /// Drops one leg from a call.
    ///
    /// The primary channel becomes the first remaining leg. An unknown
    /// channel on a known call leaves the legs as they are.
    pub fn remove_leg(&self, tenant: TenantId, call_id: &str, channel: &str) -> LegRemoval {
        let outcome = {
            let mut calls = sync::write(&self.calls, "calls");
            let Some(call) = calls
                .get_mut(&tenant)
                .and_then(|tenant_calls| tenant_calls.get_mut(call_id))
            else {
                return LegRemoval::NotFound;
            };
            call.channels.retain(|leg| leg != channel);
            if call.channels.is_empty() {
                LegRemoval::Last(call.clone())
            } else {
                call.primary_channel.clone_from(&call.channels[0]);
                LegRemoval::Remaining(call.clone())
            }
        };
        self.fanout.notify(tenant);
        outcome
    }

    /// Removes a call entirely.
    pub fn remove(&self, tenant: TenantId, call_id: &str) -> Option<Call> {
        let removed = {
            let mut calls = sync::write(&self.calls, "calls");
            let tenant_calls = calls.get_mut(&tenant)?;
            let removed = tenant_calls.remove(call_id);
            if tenant_calls.is_empty() {
                calls.remove(&tenant);
            }
            removed
        };
        if removed.is_some() {
            tracing::debug!(tenant = %tenant, call_id, "call removed");
            self.fanout.notify(tenant);
        }
        removed
    }

    pub fn get_call(&self, tenant: TenantId, call_id: &str) -> Option<Call> {
        sync::read(&self.calls, "calls")
            .get(&tenant)
            .and_then(|tenant_calls| tenant_calls.get(call_id).cloned())
    }

    /// Finds a call by id in any tenant, lowest tenant id first.
    pub fn find_any(&self, call_id: &str) -> Option<(TenantId, Call)> {
        let calls = sync::read(&self.calls, "calls");
        let mut owners: Vec<_> = calls
            .iter()
            .filter_map(|(tenant, tenant_calls)| {
                tenant_calls.get(call_id).map(|call| (*tenant, call.clone()))
            })
            .collect();
        owners.sort_by_key(|(tenant, _)| *tenant);
        owners.into_iter().next()
    }

    /// Copy of every call of `tenant`.
    pub fn get(&self, tenant: TenantId) -> HashMap<String, Call> {
        sync::read(&self.calls, "calls")
            .get(&tenant)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of every stored call, with their tenant.
    pub fn ids(&self) -> Vec<(TenantId, String)> {
        sync::read(&self.calls, "calls")
            .iter()
            .flat_map(|(tenant, tenant_calls)| {
                tenant_calls.keys().map(move |id| (*tenant, id.clone()))
            })
            .collect()
    }

    pub fn subscribe(&self, tenant: TenantId) -> Subscription {
        self.fanout.subscribe(tenant)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.fanout.unsubscribe(subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: TenantId = TenantId(1);

    fn leg(id: &str, from: &str, to: &str, channel: &str) -> CallLeg {
        CallLeg {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            channel: channel.into(),
        }
    }

    #[test]
    fn no_call_is_created_without_a_channel() {
        let store = CallStore::default();
        assert_eq!(store.upsert(T, leg("L1", "555", "101", "")), None);
        assert!(store.get(T).is_empty());
    }

    #[test]
    fn merge_keeps_start_time_and_non_empty_parties() {
        let store = CallStore::default();
        let first = store
            .upsert(T, leg("L1", "555", "support", "PJSIP/trunk-01"))
            .expect("created");
        let merged = store
            .upsert(T, leg("L1", "", "101", "PJSIP/101-02"))
            .expect("merged");

        assert_eq!(merged.started_at, first.started_at);
        assert_eq!(merged.from, "555");
        assert_eq!(merged.to, "101");
        assert_eq!(merged.channels, vec!["PJSIP/trunk-01", "PJSIP/101-02"]);
        assert_eq!(merged.primary_channel, "PJSIP/101-02");
    }

    #[test]
    fn repeated_channel_is_not_duplicated() {
        let store = CallStore::default();
        store.upsert(T, leg("L1", "555", "101", "PJSIP/101-02"));
        let merged = store.upsert(T, leg("L1", "", "", "PJSIP/101-02")).expect("merged");
        assert_eq!(merged.channels.len(), 1);
    }

    #[test]
    fn removing_legs_repoints_primary_then_reports_last() {
        let store = CallStore::default();
        store.upsert(T, leg("L1", "555", "101", "PJSIP/trunk-01"));
        store.upsert(T, leg("L1", "", "", "PJSIP/101-02"));

        match store.remove_leg(T, "L1", "PJSIP/101-02") {
            LegRemoval::Remaining(call) => {
                assert_eq!(call.channels, vec!["PJSIP/trunk-01"]);
                assert_eq!(call.primary_channel, "PJSIP/trunk-01");
            }
            other => panic!("expected remaining legs, got {other:?}"),
        }

        assert!(matches!(
            store.remove_leg(T, "L1", "PJSIP/trunk-01"),
            LegRemoval::Last(_)
        ));
        assert!(store.get_call(T, "L1").is_some(), "last leg leaves removal to the caller");
        assert_eq!(store.remove_leg(T, "nope", "x"), LegRemoval::NotFound);
    }

    #[test]
    fn find_any_prefers_lowest_tenant() {
        let store = CallStore::default();
        store.upsert(TenantId(9), leg("L1", "555", "101", "PJSIP/101-02"));
        store.upsert(TenantId(4), leg("L1", "555", "101", "PJSIP/101-02"));

        let (tenant, _) = store.find_any("L1").expect("found");
        assert_eq!(tenant, TenantId(4));
        assert!(store.find_any("L2").is_none());
    }
}
