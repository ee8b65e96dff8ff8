use std::collections::HashMap;
use std::sync::RwLock;

use pbxwatch_types::{QueueStats, TenantId};

use crate::fanout::{Fanout, StoreKind, Subscription};
use crate::sync;

/// Queue counters, per tenant, keyed by queue name.
#[derive(Debug)]
pub struct QueueStore {
    queues: RwLock<HashMap<TenantId, HashMap<String, QueueStats>>>,
    fanout: Fanout,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            fanout: Fanout::new(StoreKind::Queues),
        }
    }
}

impl QueueStore {
    /// Applies `mutate` to the queue's stats, creating them if absent, and
    /// returns the result.
    pub fn update<F>(&self, tenant: TenantId, name: &str, mutate: F) -> QueueStats
    where
        F: FnOnce(&mut QueueStats),
    {
        let stored = {
            let mut queues = sync::write(&self.queues, "queues");
            let stats = queues
                .entry(tenant)
                .or_default()
                .entry(name.to_string())
                .or_insert_with(|| QueueStats::named(name));
            mutate(stats);
            stats.clone()
        };
        tracing::trace!(tenant = %tenant, queue = name, waiting = stored.waiting, "queue updated");
        self.fanout.notify(tenant);
        stored
    }

    /// Zeroes the member and in-call counts of every queue, keeping the
    /// waiting count and the reported figures.
    ///
    /// Returns the tenants whose queues were reset.
    pub fn reset_membership(&self) -> Vec<TenantId> {
        let touched: Vec<TenantId> = {
            let mut queues = sync::write(&self.queues, "queues");
            queues
                .iter_mut()
                .filter(|(_, tenant_queues)| !tenant_queues.is_empty())
                .map(|(tenant, tenant_queues)| {
                    for stats in tenant_queues.values_mut() {
                        stats.agents = 0;
                        stats.in_call = 0;
                    }
                    *tenant
                })
                .collect()
        };
        for tenant in &touched {
            self.fanout.notify(*tenant);
        }
        touched
    }

    pub fn get_queue(&self, tenant: TenantId, name: &str) -> Option<QueueStats> {
        sync::read(&self.queues, "queues")
            .get(&tenant)
            .and_then(|tenant_queues| tenant_queues.get(name).cloned())
    }

    /// Copy of every queue of `tenant`.
    pub fn get(&self, tenant: TenantId) -> HashMap<String, QueueStats> {
        sync::read(&self.queues, "queues")
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_creates_then_mutates_in_place() {
        let store = QueueStore::default();
        store.update(TenantId(1), "support", |q| q.waiting += 1);
        let stats = store.update(TenantId(1), "support", |q| q.waiting += 1);

        assert_eq!(stats.name, "support");
        assert_eq!(stats.waiting, 2);
        assert!(store.get(TenantId(2)).is_empty());
    }

    #[test]
    fn membership_reset_keeps_waiting_and_reported_figures() {
        let store = QueueStore::default();
        store.update(TenantId(1), "support", |q| {
            q.waiting = 3;
            q.agents = 4;
            q.in_call = 2;
            q.completed = 40;
        });
        let mut sub = store.subscribe(TenantId(1));

        assert_eq!(store.reset_membership(), vec![TenantId(1)]);
        let stats = store.get_queue(TenantId(1), "support").expect("queue kept");
        assert_eq!((stats.agents, stats.in_call), (0, 0));
        assert_eq!((stats.waiting, stats.completed), (3, 40));
        assert_eq!(sub.try_changed(), Some(StoreKind::Queues));
    }
}
