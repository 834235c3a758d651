#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_ledger::application::signature::sign;
use order_ledger::application::{Ledger, OrderService, PaymentService, WebhookProcessor};
use order_ledger::config::LedgerConfig;
use order_ledger::domain::money::Money;
use order_ledger::domain::order::{Order, OrderId, OrderItem, OrderPage, OrderQuery, OrderStatus};
use order_ledger::domain::payment::{Payment, PaymentId, SettleResult, Settlement, WebhookEvent};
use order_ledger::domain::ports::{OrderStore, OrderStoreRef, PaymentStore, PaymentStoreRef, RetryLogRef};
use order_ledger::error::{LedgerError, Result};
use order_ledger::infrastructure::cache::OrderCache;
use order_ledger::infrastructure::in_memory::InMemoryLedger;
use order_ledger::metrics::Metrics;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

pub const SECRET: &str = "whsec_integration";

pub fn config() -> LedgerConfig {
    LedgerConfig {
        webhook_secret: SECRET.to_string(),
        webhook_retry_base: Duration::from_millis(1),
        ..LedgerConfig::default()
    }
}

/// A running `Ledger` plus direct access to the in-memory tables behind it.
pub struct Harness {
    pub ledger: InMemoryLedger,
    pub cache: OrderCache,
    pub metrics: Arc<Metrics>,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub webhooks: WebhookProcessor,
    _app: Ledger,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = InMemoryLedger::new();
        Self::with_stores(
            ledger.clone(),
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            Arc::new(ledger),
        )
    }

    pub fn with_stores(
        ledger: InMemoryLedger,
        orders: OrderStoreRef,
        payments: PaymentStoreRef,
        retry_log: RetryLogRef,
    ) -> Self {
        let app = Ledger::new(&config(), orders, payments, retry_log).unwrap();
        Self {
            ledger,
            cache: app.cache.clone(),
            metrics: app.metrics.clone(),
            orders: app.orders.clone(),
            payments: app.payments.clone(),
            webhooks: app.webhooks.clone(),
            _app: app,
        }
    }
}

pub fn items() -> Vec<OrderItem> {
    vec![OrderItem::new("A1", 2, Money::new(500).unwrap())]
}

pub fn random_items() -> Vec<OrderItem> {
    let mut rng = rand::thread_rng();
    (0..rng.gen_range(1..=5))
        .map(|i| {
            OrderItem::new(
                format!("SKU-{i}"),
                rng.gen_range(1..=10),
                Money::new(rng.gen_range(0..=10_000)).unwrap(),
            )
        })
        .collect()
}

pub fn event_for(payment: &Payment, status: &str, transaction_id: &str) -> WebhookEvent {
    serde_json::from_value(serde_json::json!({
        "payment_id": payment.id,
        "order_id": payment.order_id,
        "status": status,
        "transaction_id": transaction_id,
    }))
    .unwrap()
}

/// Serialises `event` and signs it with `SECRET` at the current time.
pub fn signed(event: &WebhookEvent) -> (Vec<u8>, String, String) {
    signed_at(event, Utc::now().timestamp())
}

pub fn signed_at(event: &WebhookEvent, timestamp: i64) -> (Vec<u8>, String, String) {
    let body = serde_json::to_vec(event).unwrap();
    let ts = timestamp.to_string();
    let sig = sign(&body, &ts, SECRET).unwrap();
    (body, sig, ts)
}

/// Payment store whose `settle` fails with a transient error a set number of times.
pub struct FlakyPayments {
    inner: InMemoryLedger,
    failures_left: AtomicU32,
}

impl FlakyPayments {
    pub fn new(inner: InMemoryLedger, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl PaymentStore for FlakyPayments {
    async fn get(&self, id: &str) -> Result<Option<Payment>> {
        PaymentStore::get(&self.inner, id).await
    }

    async fn insert_or_reuse_pending(&self, payment: Payment, now: DateTime<Utc>) -> Result<Payment> {
        self.inner.insert_or_reuse_pending(payment, now).await
    }

    async fn find_open_for_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Option<Payment>> {
        self.inner.find_open_for_order(order_id, now).await
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettleResult> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Storage("connection reset".to_string()));
        }
        self.inner.settle(settlement).await
    }

    async fn fail_if_pending(
        &self,
        id: &str,
        fallback: Option<Payment>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        self.inner.fail_if_pending(id, fallback, reason, now).await
    }

    async fn cancel_if_pending(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Payment>> {
        self.inner.cancel_if_pending(id, now).await
    }

    async fn cancel_expired(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<PaymentId>> {
        self.inner.cancel_expired(order_id, now).await
    }
}

/// Order store whose first token lookups report nothing, so every caller reaches
/// `insert` as if they had all checked before any row existed.
pub struct RacingOrders {
    inner: InMemoryLedger,
    blind_lookups: AtomicU32,
}

impl RacingOrders {
    pub fn new(inner: InMemoryLedger, blind_lookups: u32) -> Self {
        Self {
            inner,
            blind_lookups: AtomicU32::new(blind_lookups),
        }
    }
}

#[async_trait]
impl OrderStore for RacingOrders {
    async fn insert(&self, order: Order) -> Result<Order> {
        self.inner.insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        OrderStore::get(&self.inner, id).await
    }

    async fn find_by_client_token(&self, client_token: &str) -> Result<Option<Order>> {
        let blind = self
            .blind_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if blind {
            return Ok(None);
        }
        self.inner.find_by_client_token(client_token).await
    }

    async fn list(&self, query: &OrderQuery) -> Result<OrderPage> {
        self.inner.list(query).await
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.inner.update_status(id, status, expected_version, now).await
    }
}

/// Order store whose `get` stalls after reading once armed, holding a snapshot while
/// other callers commit.
pub struct SlowOrders {
    inner: InMemoryLedger,
    delay: Duration,
    armed: AtomicBool,
}

impl SlowOrders {
    pub fn new(inner: InMemoryLedger, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            armed: AtomicBool::new(false),
        }
    }

    /// Makes the next `get` stall.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for SlowOrders {
    async fn insert(&self, order: Order) -> Result<Order> {
        self.inner.insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let order = OrderStore::get(&self.inner, id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        order
    }

    async fn find_by_client_token(&self, client_token: &str) -> Result<Option<Order>> {
        self.inner.find_by_client_token(client_token).await
    }

    async fn list(&self, query: &OrderQuery) -> Result<OrderPage> {
        self.inner.list(query).await
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.inner.update_status(id, status, expected_version, now).await
    }
}
