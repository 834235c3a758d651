use super::order::{Order, OrderId, OrderPage, OrderQuery, OrderStatus};
use super::payment::{Payment, PaymentId, SettleResult, Settlement, WebhookRetryRecord};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order. Fails with `DuplicateKey` if the `client_token` is taken.
    async fn insert(&self, order: Order) -> Result<Order>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn find_by_client_token(&self, client_token: &str) -> Result<Option<Order>>;
    async fn list(&self, query: &OrderQuery) -> Result<OrderPage>;
    /// Sets the status and increments the version in one step.
    ///
    /// With `expected_version` the write only happens if the stored version still matches.
    /// Returns `None` when no row was affected.
    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Payment>>;
    /// Returns the open (PENDING, unexpired) payment of the order, or inserts `payment`.
    async fn insert_or_reuse_pending(&self, payment: Payment, now: DateTime<Utc>) -> Result<Payment>;
    async fn find_open_for_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Option<Payment>>;
    /// Moves a PENDING payment to the event status and, on SUCCESS, its order to PAID.
    /// Both writes commit together or not at all.
    async fn settle(&self, settlement: &Settlement) -> Result<SettleResult>;
    /// Forces a PENDING payment to FAILED. A missing row is recorded from `fallback` (when its
    /// id matches) already FAILED. Returns `None` if nothing was written.
    async fn fail_if_pending(
        &self,
        id: &str,
        fallback: Option<Payment>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>>;
    async fn cancel_if_pending(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Payment>>;
    /// Cancels the order's PENDING payments whose expiry has passed.
    async fn cancel_expired(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<PaymentId>>;
}

#[async_trait]
pub trait RetryLog: Send + Sync {
    async fn append(&self, record: WebhookRetryRecord) -> Result<()>;
    async fn records_for(&self, payment_id: &str) -> Result<Vec<WebhookRetryRecord>>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type RetryLogRef = Arc<dyn RetryLog>;
