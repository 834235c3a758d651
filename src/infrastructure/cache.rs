use crate::domain::order::{Order, OrderId, ViewerScope};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default lifetime of a cached order view.
pub const DEFAULT_ORDER_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    order: Order,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Per-order views plus the stamp of the order's last invalidation.
struct Slot {
    stamp: u64,
    views: HashMap<ViewerScope, CacheEntry>,
}

#[derive(Default)]
struct Entries {
    slots: HashMap<OrderId, Slot>,
    clock: u64,
    /// Highest stamp among removed slots. Stands in for the stamp of any order without a slot.
    floor: u64,
}

impl Entries {
    fn stamp_of(&self, order_id: OrderId) -> u64 {
        self.slots.get(&order_id).map_or(self.floor, |slot| slot.stamp)
    }

    fn remove_slot(&mut self, order_id: OrderId) -> Option<Slot> {
        let slot = self.slots.remove(&order_id)?;
        self.floor = self.floor.max(slot.stamp);
        Some(slot)
    }

    fn slot_mut(&mut self, order_id: OrderId) -> &mut Slot {
        let floor = self.floor;
        self.slots.entry(order_id).or_insert_with(|| Slot {
            stamp: floor,
            views: HashMap::new(),
        })
    }
}

/// Invalidation stamp of one order, captured before reading it from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket {
    order_id: OrderId,
    stamp: u64,
}

/// Process-local, short-TTL cache of order snapshots.
///
/// Entries are grouped per order so a mutation can drop every viewer scope at once.
/// Never authoritative: a miss always falls back to the store.
///
/// A read-through caller takes a `ticket` before its store read and writes back with
/// `set_if_current`. The write is refused if the order was invalidated in between, so a
/// slow reader cannot resurrect a snapshot older than a committed mutation.
#[derive(Clone)]
pub struct OrderCache {
    ttl: Duration,
    entries: Arc<RwLock<Entries>>,
}

impl Default for OrderCache {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER_TTL)
    }
}

impl OrderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached view, purging it if it has expired.
    pub async fn get(&self, order_id: OrderId, scope: &ViewerScope) -> Option<Order> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.slots.get(&order_id).and_then(|slot| slot.views.get(scope)) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.order.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        let emptied = match entries.slots.get_mut(&order_id) {
            Some(slot) => {
                // Re-check under the write lock; a concurrent `set` may have refreshed it.
                if slot.views.get(scope).is_some_and(|entry| entry.is_expired(now)) {
                    slot.views.remove(scope);
                }
                slot.views.is_empty()
            }
            None => false,
        };
        if emptied {
            entries.remove_slot(order_id);
        }
        None
    }

    pub async fn ticket(&self, order_id: OrderId) -> CacheTicket {
        let entries = self.entries.read().await;
        CacheTicket {
            order_id,
            stamp: entries.stamp_of(order_id),
        }
    }

    /// Stores `order` only if its order has not been invalidated since `ticket` was taken.
    pub async fn set_if_current(&self, ticket: CacheTicket, scope: ViewerScope, order: Order) -> bool {
        if order.id != ticket.order_id {
            return false;
        }
        let mut entries = self.entries.write().await;
        if entries.stamp_of(order.id) != ticket.stamp {
            tracing::debug!(order_id = %order.id, "Skipped caching order read before an invalidation");
            return false;
        }
        let entry = CacheEntry {
            expires_at: Instant::now() + self.ttl,
            order,
        };
        entries.slot_mut(entry.order.id).views.insert(scope, entry);
        true
    }

    pub async fn set(&self, scope: ViewerScope, order: Order) {
        self.set_with_ttl(scope, order, self.ttl).await;
    }

    pub async fn set_with_ttl(&self, scope: ViewerScope, order: Order, ttl: Duration) {
        let entry = CacheEntry {
            expires_at: Instant::now() + ttl,
            order,
        };
        let mut entries = self.entries.write().await;
        entries.slot_mut(entry.order.id).views.insert(scope, entry);
    }

    /// Drops every viewer scope of the order and moves its stamp forward.
    pub async fn invalidate(&self, order_id: OrderId) {
        let mut entries = self.entries.write().await;
        entries.clock += 1;
        let stamp = entries.clock;
        let slot = entries.slot_mut(order_id);
        slot.stamp = stamp;
        if !slot.views.is_empty() {
            slot.views.clear();
            tracing::debug!(order_id = %order_id, "Invalidated cached order views");
        }
    }

    /// Removes all expired entries and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut purged = 0;
        let mut emptied = Vec::new();
        for (order_id, slot) in entries.slots.iter_mut() {
            let before = slot.views.len();
            slot.views.retain(|_, entry| !entry.is_expired(now));
            purged += before - slot.views.len();
            if slot.views.is_empty() {
                emptied.push(*order_id);
            }
        }
        for order_id in emptied {
            entries.remove_slot(order_id);
        }
        purged
    }

    /// Number of cached views across all orders.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.slots.values().map(|slot| slot.views.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawns the periodic purge of expired entries. Abort the handle to stop it.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired order cache entries");
                }
            }
        })
    }
}
