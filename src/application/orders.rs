use crate::domain::order::{
    NewOrder, Order, OrderFilter, OrderId, OrderItem, OrderPage, OrderQuery, OrderStatus,
    Pagination, Principal, UserId,
};
use crate::domain::ports::OrderStoreRef;
use crate::error::{LedgerError, Result};
use crate::infrastructure::cache::OrderCache;
use crate::metrics::Metrics;
use chrono::Utc;
use std::sync::Arc;

/// Order creation, ownership-scoped reads and optimistic-locking status updates.
///
/// The store's uniqueness constraint and version predicate are the only concurrency
/// mechanisms; the service itself holds no locks across calls.
#[derive(Clone)]
pub struct OrderService {
    orders: OrderStoreRef,
    cache: OrderCache,
    metrics: Arc<Metrics>,
}

impl OrderService {
    pub fn new(orders: OrderStoreRef, cache: OrderCache, metrics: Arc<Metrics>) -> Self {
        Self {
            orders,
            cache,
            metrics,
        }
    }

    /// Creates an order, or returns the existing one for the same `client_token`.
    ///
    /// A lost insert race is resolved by re-reading the winner's row, so callers
    /// cannot tell a fresh create from a replay.
    pub async fn create_order(
        &self,
        owner_id: impl Into<UserId>,
        items: Vec<OrderItem>,
        client_token: impl Into<String>,
    ) -> Result<Order> {
        let new_order = NewOrder::new(owner_id, items, client_token)?;

        if let Some(existing) = self.orders.find_by_client_token(&new_order.client_token).await? {
            return self.replay(existing, &new_order);
        }

        let order = Order::create(new_order.clone(), Utc::now())?;
        match self.orders.insert(order).await {
            Ok(order) => {
                self.metrics.order_created();
                tracing::info!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    total = %order.total_amount,
                    "Order created"
                );
                Ok(order)
            }
            Err(LedgerError::DuplicateKey(_)) => {
                tracing::debug!(
                    client_token = %new_order.client_token,
                    "Lost client_token insert race, returning winner"
                );
                let winner = self
                    .orders
                    .find_by_client_token(&new_order.client_token)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Storage("order vanished after duplicate key".to_string())
                    })?;
                self.replay(winner, &new_order)
            }
            Err(e) => Err(e),
        }
    }

    fn replay(&self, existing: Order, request: &NewOrder) -> Result<Order> {
        if existing.user_id != request.user_id {
            tracing::warn!(
                order_id = %existing.id,
                user_id = %request.user_id,
                "client_token reused by a different user"
            );
            return Err(LedgerError::Conflict(
                "client_token already used".to_string(),
            ));
        }
        tracing::debug!(order_id = %existing.id, "Idempotent order replay");
        Ok(existing)
    }

    pub async fn list_orders(
        &self,
        principal: &Principal,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> Result<OrderPage> {
        let query = OrderQuery::for_principal(principal, filter, pagination);
        self.orders.list(&query).await
    }

    /// Read-through lookup. Orders the caller may not see are reported as not found.
    pub async fn get_order(&self, id: OrderId, principal: &Principal) -> Result<Order> {
        let scope = principal.scope();
        if let Some(order) = self.cache.get(id, &scope).await {
            return Ok(order);
        }

        let ticket = self.cache.ticket(id).await;
        let order = self
            .orders
            .get(id)
            .await?
            .filter(|order| principal.can_view(order))
            .ok_or(LedgerError::NotFound("order"))?;

        self.cache.set_if_current(ticket, scope, order.clone()).await;
        Ok(order)
    }

    /// Optimistic-concurrency status update.
    ///
    /// With `expected_version` the write is conditional on the stored version; a stale
    /// or concurrently superseded version yields `Conflict`.
    pub async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: Option<u64>,
    ) -> Result<Order> {
        let current = self
            .orders
            .get(id)
            .await?
            .ok_or(LedgerError::NotFound("order"))?;

        if let Some(expected) = expected_version
            && expected != current.version
        {
            return Err(version_conflict(expected, current.version));
        }

        let updated = match self
            .orders
            .update_status(id, status, expected_version, Utc::now())
            .await?
        {
            Some(order) => order,
            None => {
                // Zero rows: the row moved on (or disappeared) between read and write.
                return match self.orders.get(id).await? {
                    Some(latest) => Err(version_conflict(
                        expected_version.unwrap_or(current.version),
                        latest.version,
                    )),
                    None => Err(LedgerError::NotFound("order")),
                };
            }
        };

        self.cache.invalidate(id).await;
        tracing::info!(
            order_id = %id,
            status = %updated.status,
            version = updated.version,
            "Order status updated"
        );
        Ok(updated)
    }
}

fn version_conflict(expected: u64, actual: u64) -> LedgerError {
    LedgerError::Conflict(format!(
        "order version mismatch: expected {expected}, found {actual}"
    ))
}
