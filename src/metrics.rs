use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters for the order/payment core.
///
/// Shared through `Arc<Metrics>`. Counters start at zero with the process and are never reset.
#[derive(Debug, Default)]
pub struct Metrics {
    orders_created: AtomicU64,
    webhooks_verified: AtomicU64,
    webhooks_rejected: AtomicU64,
    webhooks_applied: AtomicU64,
    webhooks_duplicate: AtomicU64,
    webhooks_ignored: AtomicU64,
    webhook_retries: AtomicU64,
    webhooks_dead_lettered: AtomicU64,
    payments_expired: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub orders_created: u64,
    pub webhooks_verified: u64,
    pub webhooks_rejected: u64,
    pub webhooks_applied: u64,
    pub webhooks_duplicate: u64,
    pub webhooks_ignored: u64,
    pub webhook_retries: u64,
    pub webhooks_dead_lettered: u64,
    pub payments_expired: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a newly inserted order. Idempotent replays must not call this.
    pub fn order_created(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_verified(&self) {
        self.webhooks_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_rejected(&self) {
        self.webhooks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_applied(&self) {
        self.webhooks_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_duplicate(&self) {
        self.webhooks_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_ignored(&self) {
        self.webhooks_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_retry(&self) {
        self.webhook_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_dead_lettered(&self) {
        self.webhooks_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payments_expired(&self, count: usize) {
        self.payments_expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_created: self.orders_created.load(Ordering::Relaxed),
            webhooks_verified: self.webhooks_verified.load(Ordering::Relaxed),
            webhooks_rejected: self.webhooks_rejected.load(Ordering::Relaxed),
            webhooks_applied: self.webhooks_applied.load(Ordering::Relaxed),
            webhooks_duplicate: self.webhooks_duplicate.load(Ordering::Relaxed),
            webhooks_ignored: self.webhooks_ignored.load(Ordering::Relaxed),
            webhook_retries: self.webhook_retries.load(Ordering::Relaxed),
            webhooks_dead_lettered: self.webhooks_dead_lettered.load(Ordering::Relaxed),
            payments_expired: self.payments_expired.load(Ordering::Relaxed),
        }
    }
}
