use super::money::Money;
use super::order::{Order, OrderId, OrderStatus};
use crate::error::LedgerError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type PaymentId = String;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// SUCCESS, FAILED and CANCELLED have no transition out.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A fresh payment intent for the full order total.
    pub fn pending_for(order: &Order, currency: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order.id,
            amount: order.total_amount,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            failure_reason: None,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payment row reconstructed from a webhook that references an id we never issued.
    pub fn inferred(event: &WebhookEvent, order: &Order, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: event.payment_id.clone(),
            order_id: order.id,
            amount: order.total_amount,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            failure_reason: None,
            expires_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && self.expires_at > now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && self.expires_at <= now
    }

    /// Moves a PENDING payment to a terminal status. Terminal payments are left untouched.
    pub fn settle(
        &mut self,
        status: PaymentStatus,
        transaction_id: Option<String>,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        if transaction_id.is_some() {
            self.transaction_id = transaction_id;
        }
        self.failure_reason = failure_reason;
        self.updated_at = now;
        true
    }

    /// Same delivery seen again: already settled under the same provider transaction.
    pub fn is_duplicate_of(&self, event: &WebhookEvent) -> bool {
        self.status.is_terminal() && self.transaction_id == event.transaction_id
    }
}

/// Verified provider callback body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct WebhookEvent {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, LedgerError> {
        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| LedgerError::Validation(format!("malformed webhook payload: {e}")))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.payment_id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "webhook payment_id must not be empty".to_string(),
            ));
        }
        if !self.status.is_terminal() {
            return Err(LedgerError::Validation(
                "webhook status must be SUCCESS, FAILED or CANCELLED".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input of the atomic settle operation on the store.
///
/// `fallback` is inserted first when no payment row exists for `event.payment_id`.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub event: WebhookEvent,
    pub fallback: Option<Payment>,
    pub now: DateTime<Utc>,
}

impl Settlement {
    /// Computes the rows a store must write for this settlement.
    ///
    /// `current` is the stored payment, `order` the stored order it references.
    /// On `Applied` the returned rows replace the stored ones.
    pub fn plan(&self, current: Option<Payment>, order: Option<Order>) -> Result<SettleResult, LedgerError> {
        let mut payment = match current.or_else(|| self.fallback.clone()) {
            Some(payment) => payment,
            None => return Ok(SettleResult::PaymentMissing),
        };
        if payment.status.is_terminal() {
            return Ok(SettleResult::AlreadySettled(payment));
        }

        let order = if self.event.status == PaymentStatus::Success {
            let mut order = order.ok_or(LedgerError::NotFound("order"))?;
            if order.status == OrderStatus::Paid {
                None
            } else {
                order.mark_paid(self.now);
                Some(order)
            }
        } else {
            None
        };

        payment.settle(
            self.event.status,
            self.event.transaction_id.clone(),
            self.event.failure_reason.clone(),
            self.now,
        );
        Ok(SettleResult::Applied { payment, order })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleResult {
    /// The payment left PENDING. `order` is the order row if it was moved to PAID.
    Applied {
        payment: Payment,
        order: Option<Order>,
    },
    /// Someone else settled the payment first.
    AlreadySettled(Payment),
    /// No payment row and no fallback supplied.
    PaymentMissing,
}

/// Append-only diagnostic entry for a failed webhook apply attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct WebhookRetryRecord {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub attempt: u32,
    pub error: String,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub final_failure: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookRetryRecord {
    pub fn retry(
        event: &WebhookEvent,
        attempt: u32,
        error: &LedgerError,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: event.payment_id.clone(),
            order_id: event.order_id,
            attempt,
            error: error.to_string(),
            next_retry_at,
            final_failure: false,
            created_at: now,
        }
    }

    pub fn dead_letter(event: &WebhookEvent, attempt: u32, error: &LedgerError, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: event.payment_id.clone(),
            order_id: event.order_id,
            attempt,
            error: error.to_string(),
            next_retry_at: None,
            final_failure: true,
            created_at: now,
        }
    }
}
