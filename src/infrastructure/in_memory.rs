use crate::domain::order::{Order, OrderId, OrderPage, OrderQuery, OrderStatus};
use crate::domain::payment::{Payment, PaymentId, PaymentStatus, SettleResult, Settlement, WebhookRetryRecord};
use crate::domain::ports::{OrderStore, PaymentStore, RetryLog};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    client_tokens: HashMap<String, OrderId>,
    payments: HashMap<PaymentId, Payment>,
    retry_log: Vec<WebhookRetryRecord>,
}

/// A thread-safe in-memory ledger holding orders, payments and the retry log.
///
/// All tables sit behind a single `Arc<RwLock<..>>`. Every store method takes the
/// lock once, so conditional updates and the cross-table settle are atomic.
/// `Clone` shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryLedger {
    async fn insert(&self, order: Order) -> Result<Order> {
        let mut tables = self.tables.write().await;
        if tables.client_tokens.contains_key(&order.client_token) {
            return Err(LedgerError::DuplicateKey(order.client_token));
        }
        tables.client_tokens.insert(order.client_token.clone(), order.id);
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&id).cloned())
    }

    async fn find_by_client_token(&self, client_token: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .client_tokens
            .get(client_token)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn list(&self, query: &OrderQuery) -> Result<OrderPage> {
        let tables = self.tables.read().await;
        Ok(query.run(tables.orders.values().cloned()))
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(expected) = expected_version
            && order.version != expected
        {
            return Ok(None);
        }
        order.transition(status, now);
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl PaymentStore for InMemoryLedger {
    async fn get(&self, id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(id).cloned())
    }

    async fn insert_or_reuse_pending(&self, payment: Payment, now: DateTime<Utc>) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        if let Some(open) = tables
            .payments
            .values()
            .find(|p| p.order_id == payment.order_id && p.is_open(now))
        {
            return Ok(open.clone());
        }
        if tables.payments.contains_key(&payment.id) {
            return Err(LedgerError::DuplicateKey(payment.id));
        }
        tables.payments.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    async fn find_open_for_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.order_id == order_id && p.is_open(now))
            .cloned())
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettleResult> {
        let mut tables = self.tables.write().await;
        let current = tables.payments.get(&settlement.event.payment_id).cloned();
        let order = tables.orders.get(&settlement.event.order_id).cloned();

        let result = settlement.plan(current, order)?;
        if let SettleResult::Applied { payment, order } = &result {
            tables.payments.insert(payment.id.clone(), payment.clone());
            if let Some(order) = order {
                tables.orders.insert(order.id, order.clone());
            }
        }
        Ok(result)
    }

    async fn fail_if_pending(
        &self,
        id: &str,
        fallback: Option<Payment>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let mut tables = self.tables.write().await;
        if let Some(fallback) = fallback.filter(|p| p.id == id)
            && !tables.payments.contains_key(id)
        {
            tables.payments.insert(fallback.id.clone(), fallback);
        }
        Ok(tables.payments.get_mut(id).and_then(|payment| {
            payment
                .settle(PaymentStatus::Failed, None, Some(reason.to_string()), now)
                .then(|| payment.clone())
        }))
    }

    async fn cancel_if_pending(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Payment>> {
        let mut tables = self.tables.write().await;
        Ok(tables.payments.get_mut(id).and_then(|payment| {
            payment
                .settle(PaymentStatus::Cancelled, None, None, now)
                .then(|| payment.clone())
        }))
    }

    async fn cancel_expired(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<PaymentId>> {
        let mut tables = self.tables.write().await;
        let mut cancelled = Vec::new();
        for payment in tables.payments.values_mut() {
            if payment.order_id == order_id
                && payment.is_expired(now)
                && payment.settle(
                    PaymentStatus::Cancelled,
                    None,
                    Some("payment expired".to_string()),
                    now,
                )
            {
                cancelled.push(payment.id.clone());
            }
        }
        Ok(cancelled)
    }
}

#[async_trait]
impl RetryLog for InMemoryLedger {
    async fn append(&self, record: WebhookRetryRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.retry_log.push(record);
        Ok(())
    }

    async fn records_for(&self, payment_id: &str) -> Result<Vec<WebhookRetryRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .retry_log
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect())
    }
}
