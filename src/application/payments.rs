use crate::domain::order::{OrderId, OrderStatus, Principal};
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{OrderStoreRef, PaymentStoreRef};
use crate::error::{LedgerError, Result};
use crate::metrics::Metrics;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Payment-intent boundary: initiation with reuse, explicit cancellation and the expiry sweep.
#[derive(Clone)]
pub struct PaymentService {
    orders: OrderStoreRef,
    payments: PaymentStoreRef,
    metrics: Arc<Metrics>,
    currency: String,
    payment_ttl: Duration,
}

impl PaymentService {
    pub fn new(
        orders: OrderStoreRef,
        payments: PaymentStoreRef,
        metrics: Arc<Metrics>,
        currency: impl Into<String>,
        payment_ttl: Duration,
    ) -> Self {
        Self {
            orders,
            payments,
            metrics,
            currency: currency.into(),
            payment_ttl,
        }
    }

    /// Returns the order's open payment intent, creating one only if none exists.
    pub async fn initiate(&self, order_id: OrderId, principal: &Principal) -> Result<Payment> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .filter(|order| principal.can_view(order))
            .ok_or(LedgerError::NotFound("order"))?;
        if order.status != OrderStatus::Pending {
            return Err(LedgerError::Conflict(format!(
                "order is {} and cannot be paid",
                order.status
            )));
        }

        let now = Utc::now();
        if let Some(open) = self.payments.find_open_for_order(order_id, now).await? {
            tracing::debug!(order_id = %order_id, payment_id = %open.id, "Reusing open payment");
            return Ok(open);
        }

        let candidate = Payment::pending_for(&order, &self.currency, self.payment_ttl, now);
        let payment = self.payments.insert_or_reuse_pending(candidate, now).await?;
        tracing::info!(
            order_id = %order_id,
            payment_id = %payment.id,
            amount = %payment.amount,
            "Payment initiated"
        );
        Ok(payment)
    }

    /// Explicit user cancel. Only a PENDING payment can be cancelled.
    pub async fn cancel(&self, payment_id: &str, principal: &Principal) -> Result<Payment> {
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or(LedgerError::NotFound("payment"))?;
        let visible = self
            .orders
            .get(payment.order_id)
            .await?
            .is_some_and(|order| principal.can_view(&order));
        if !visible {
            return Err(LedgerError::NotFound("payment"));
        }

        match self.payments.cancel_if_pending(payment_id, Utc::now()).await? {
            Some(cancelled) => {
                tracing::info!(payment_id = %payment_id, "Payment cancelled by user");
                Ok(cancelled)
            }
            None => Err(LedgerError::Conflict(format!(
                "payment {payment_id} is not pending"
            ))),
        }
    }

    /// Cancels the order's PENDING payments whose expiry has passed.
    pub async fn sweep_expired(&self, order_id: OrderId) -> Result<Vec<PaymentId>> {
        let cancelled = self.payments.cancel_expired(order_id, Utc::now()).await?;
        if !cancelled.is_empty() {
            self.metrics.payments_expired(cancelled.len());
            tracing::info!(order_id = %order_id, count = cancelled.len(), "Expired payments cancelled");
        }
        Ok(cancelled)
    }
}
