//! Per-tenant change notification.
//!
//! Each store owns one [`Fanout`]. Subscribers get a one-slot channel: a
//! notification only says "this store changed for your tenant", so when a
//! slot is already full the new notification carries no extra information
//! and is dropped instead of blocking the writer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use pbxwatch_types::TenantId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::sync;

/// Which store a notification comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Agents,
    Calls,
    Queues,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Agents => "agents",
            Self::Calls => "calls",
            Self::Queues => "queues",
        })
    }
}

type Subscribers = HashMap<TenantId, Vec<(u64, mpsc::Sender<StoreKind>)>>;

/// Non-blocking notifier for one store.
pub struct Fanout {
    kind: StoreKind,
    next_id: AtomicU64,
    subscribers: RwLock<Subscribers>,
}

/// Receiving end of a subscription.
///
/// Pass it back to [`Fanout::unsubscribe`] when the observer goes away.
/// Dropping it without unsubscribing is also fine: the closed channel is
/// pruned on the next notification.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    tenant: TenantId,
    rx: mpsc::Receiver<StoreKind>,
}

impl Subscription {
    /// Waits for the next change. Returns `None` once unsubscribed.
    pub async fn changed(&mut self) -> Option<StoreKind> {
        self.rx.recv().await
    }

    /// Returns a pending change without waiting.
    pub fn try_changed(&mut self) -> Option<StoreKind> {
        self.rx.try_recv().ok()
    }
}

impl Fanout {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new observer for one tenant.
    pub fn subscribe(&self, tenant: TenantId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        sync::write(&self.subscribers, "fanout")
            .entry(tenant)
            .or_default()
            .push((id, tx));
        tracing::debug!(store = %self.kind, tenant = %tenant, subscription = id, "subscribed");
        Subscription { id, tenant, rx }
    }

    /// Removes an observer. Unknown subscriptions are ignored.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.remove(subscription.tenant, &[subscription.id]);
        tracing::debug!(
            store = %self.kind,
            tenant = %subscription.tenant,
            subscription = subscription.id,
            "unsubscribed"
        );
    }

    /// Pokes every observer of `tenant`, dropping the signal for any whose
    /// slot is still full.
    pub fn notify(&self, tenant: TenantId) {
        let mut closed = Vec::new();
        {
            let subscribers = sync::read(&self.subscribers, "fanout");
            let Some(list) = subscribers.get(&tenant) else {
                return;
            };
            for (id, tx) in list {
                match tx.try_send(self.kind) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(
                            store = %self.kind,
                            tenant = %tenant,
                            subscription = id,
                            "subscriber busy, dropping change signal"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            self.remove(tenant, &closed);
        }
    }

    /// Number of live observers for `tenant`.
    pub fn subscriber_count(&self, tenant: TenantId) -> usize {
        sync::read(&self.subscribers, "fanout")
            .get(&tenant)
            .map_or(0, Vec::len)
    }

    fn remove(&self, tenant: TenantId, ids: &[u64]) {
        let mut subscribers = sync::write(&self.subscribers, "fanout");
        if let Some(list) = subscribers.get_mut(&tenant) {
            list.retain(|(id, _)| !ids.contains(id));
            if list.is_empty() {
                subscribers.remove(&tenant);
            }
        }
    }
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout").field("kind", &self.kind).finish_non_exhaustive()
    }
}
