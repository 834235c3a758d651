use super::payments::PaymentService;
use super::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, verify_signature};
use crate::config::LedgerConfig;
use crate::domain::payment::{Payment, SettleResult, Settlement, WebhookEvent, WebhookRetryRecord};
use crate::domain::ports::{OrderStoreRef, PaymentStoreRef, RetryLogRef};
use crate::error::{LedgerError, Result};
use crate::infrastructure::cache::OrderCache;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often and how patiently a failed apply is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt`: `2^attempt * base_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// When the attempt after `attempt` is due, or `None` if that lies beyond the
    /// representable calendar.
    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.delay_after(attempt))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
    }
}

/// Result of a single `apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The payment left PENDING; `order_paid` is set when the order moved to PAID.
    Applied { order_paid: bool },
    /// Same provider transaction already recorded.
    Duplicate,
    /// The payment is terminal under a different transaction; terminal states are final.
    Ignored,
}

/// Final result of a dispatched delivery, after any retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Completed { outcome: ApplyOutcome, attempts: u32 },
    DeadLettered { attempts: u32, error: String },
}

/// Verifies provider callbacks and reconciles payments and orders from them.
///
/// Each retry replays `apply` in full. The idempotency gate on the payment row is what
/// makes that safe, so no partial progress is carried between attempts.
#[derive(Clone)]
pub struct WebhookProcessor {
    orders: OrderStoreRef,
    payments: PaymentStoreRef,
    retry_log: RetryLogRef,
    intents: PaymentService,
    cache: OrderCache,
    metrics: Arc<Metrics>,
    secret: Arc<str>,
    tolerance_secs: i64,
    retry: RetryPolicy,
    currency: String,
}

impl WebhookProcessor {
    pub fn new(
        orders: OrderStoreRef,
        payments: PaymentStoreRef,
        retry_log: RetryLogRef,
        cache: OrderCache,
        metrics: Arc<Metrics>,
        config: &LedgerConfig,
    ) -> Self {
        let intents = PaymentService::new(
            orders.clone(),
            payments.clone(),
            metrics.clone(),
            config.payment_currency.clone(),
            config.payment_ttl_chrono(),
        );
        Self {
            orders,
            payments,
            retry_log,
            intents,
            cache,
            metrics,
            secret: Arc::from(config.webhook_secret.as_str()),
            tolerance_secs: config.webhook_tolerance_secs,
            retry: RetryPolicy {
                max_attempts: config.webhook_max_attempts.max(1),
                base_delay: config.webhook_retry_base,
            },
            currency: config.payment_currency.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Authenticates a raw delivery and parses its body. Rejections have no side effects
    /// beyond the rejection counter.
    pub fn verify(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<WebhookEvent> {
        self.verify_at(payload, signature, timestamp, Utc::now())
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent> {
        let verified = verify_signature(
            payload,
            signature,
            timestamp,
            &self.secret,
            self.tolerance_secs,
            now,
        )
        .and_then(|_| WebhookEvent::parse(payload));

        match verified {
            Ok(event) => {
                self.metrics.webhook_verified();
                tracing::info!(
                    payment_id = %event.payment_id,
                    order_id = %event.order_id,
                    status = %event.status,
                    "Webhook verified"
                );
                Ok(event)
            }
            Err(e) => {
                self.metrics.webhook_rejected();
                tracing::warn!(error = %e, "Webhook rejected");
                Err(e)
            }
        }
    }

    /// Verifies the delivery and dispatches processing. The caller can acknowledge the
    /// provider as soon as this returns `Ok`; the handle resolves once retries finish.
    pub fn receive(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<JoinHandle<WebhookOutcome>> {
        let event = self.verify(payload, signature, timestamp)?;
        Ok(self.dispatch(event))
    }

    /// `receive` with both headers looked up by their wire names.
    pub fn receive_with_headers<'h>(
        &self,
        payload: &[u8],
        header: impl Fn(&str) -> Option<&'h str>,
    ) -> Result<JoinHandle<WebhookOutcome>> {
        self.receive(payload, header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER))
    }

    /// Runs `process` on a background task.
    pub fn dispatch(&self, event: WebhookEvent) -> JoinHandle<WebhookOutcome> {
        let processor = self.clone();
        tokio::spawn(async move { processor.process(event).await })
    }

    /// Applies the event, retrying transient failures with exponential backoff and
    /// dead-lettering once the attempts are used up. Never returns an error.
    pub async fn process(&self, event: WebhookEvent) -> WebhookOutcome {
        let mut attempt = 1;
        loop {
            match self.apply(&event).await {
                Ok(outcome) => {
                    return WebhookOutcome::Completed {
                        outcome,
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    let now = Utc::now();
                    let next_retry_at = self.retry.next_retry_at(attempt, now);
                    self.record(WebhookRetryRecord::retry(&event, attempt, &e, next_retry_at, now))
                        .await;
                    self.metrics.webhook_retry();
                    tracing::warn!(
                        payment_id = %event.payment_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Webhook apply failed, retry scheduled"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return self.dead_letter(&event, attempt, e).await,
            }
        }
    }

    async fn dead_letter(&self, event: &WebhookEvent, attempts: u32, error: LedgerError) -> WebhookOutcome {
        self.record(WebhookRetryRecord::dead_letter(event, attempts, &error, Utc::now()))
            .await;
        self.metrics.webhook_dead_lettered();
        tracing::error!(
            payment_id = %event.payment_id,
            order_id = %event.order_id,
            attempts,
            error = %error,
            "Webhook dead-lettered"
        );

        // Retries ran out on a transient failure: close the payment so it does not dangle.
        if error.is_transient() {
            let reason = format!("webhook processing failed after {attempts} attempts");
            let fallback = self.inferred_fallback(event).await;
            match self
                .payments
                .fail_if_pending(&event.payment_id, fallback, &reason, Utc::now())
                .await
            {
                Ok(Some(_)) => {
                    self.cache.invalidate(event.order_id).await;
                    tracing::warn!(payment_id = %event.payment_id, "Payment forced to FAILED");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(payment_id = %event.payment_id, error = %e, "Failed to force payment to FAILED");
                }
            }
        }

        WebhookOutcome::DeadLettered {
            attempts,
            error: error.to_string(),
        }
    }

    /// Payment row to record if the event names a payment that was never stored.
    async fn inferred_fallback(&self, event: &WebhookEvent) -> Option<Payment> {
        match self.orders.get(event.order_id).await {
            Ok(order) => order.map(|order| Payment::inferred(event, &order, &self.currency, Utc::now())),
            Err(e) => {
                tracing::warn!(order_id = %event.order_id, error = %e, "Could not load order for dead-lettered payment");
                None
            }
        }
    }

    async fn record(&self, record: WebhookRetryRecord) {
        if let Err(e) = self.retry_log.append(record).await {
            tracing::error!(error = %e, "Failed to append webhook retry record");
        }
    }

    /// One idempotent attempt at reconciling the event into the ledger.
    pub async fn apply(&self, event: &WebhookEvent) -> Result<ApplyOutcome> {
        event.validate()?;
        let now = Utc::now();

        let fallback = match self.payments.get(&event.payment_id).await? {
            Some(payment) => {
                if payment.order_id != event.order_id {
                    return Err(LedgerError::Validation(format!(
                        "payment {} does not belong to order {}",
                        payment.id, event.order_id
                    )));
                }
                if payment.status.is_terminal() {
                    return Ok(self.already_settled(&payment, event));
                }
                None
            }
            None => {
                let order = self
                    .orders
                    .get(event.order_id)
                    .await?
                    .ok_or(LedgerError::NotFound("order"))?;
                tracing::info!(
                    payment_id = %event.payment_id,
                    order_id = %order.id,
                    "Inferring payment from webhook"
                );
                Some(Payment::inferred(event, &order, &self.currency, now))
            }
        };

        let settlement = Settlement {
            event: event.clone(),
            fallback,
            now,
        };
        let order_paid = match self.payments.settle(&settlement).await? {
            SettleResult::Applied { payment, order } => {
                self.cache.invalidate(event.order_id).await;
                self.metrics.webhook_applied();
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    status = %payment.status,
                    order_version = order.as_ref().map(|o| o.version),
                    "Payment settled"
                );
                order.is_some()
            }
            SettleResult::AlreadySettled(payment) => return Ok(self.already_settled(&payment, event)),
            SettleResult::PaymentMissing => return Err(LedgerError::NotFound("payment")),
        };

        if let Err(e) = self.intents.sweep_expired(event.order_id).await {
            tracing::warn!(order_id = %event.order_id, error = %e, "Expired payment sweep failed");
        }

        Ok(ApplyOutcome::Applied { order_paid })
    }

    fn already_settled(&self, payment: &Payment, event: &WebhookEvent) -> ApplyOutcome {
        if payment.is_duplicate_of(event) {
            self.metrics.webhook_duplicate();
            tracing::debug!(payment_id = %payment.id, "Duplicate webhook delivery ignored");
            ApplyOutcome::Duplicate
        } else {
            self.metrics.webhook_ignored();
            tracing::warn!(
                payment_id = %payment.id,
                current = %payment.status,
                incoming = %event.status,
                "Webhook for terminal payment ignored"
            );
            ApplyOutcome::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::signature::sign;
    use crate::domain::money::Money;
    use crate::domain::order::{NewOrder, Order, OrderItem, OrderStatus};
    use crate::domain::payment::PaymentStatus;
    use crate::domain::ports::{OrderStore, PaymentStore, RetryLog};
    use crate::infrastructure::in_memory::InMemoryLedger;

    fn config() -> LedgerConfig {
        LedgerConfig {
            webhook_secret: "whsec_unit".to_string(),
            webhook_retry_base: Duration::from_millis(1),
            ..LedgerConfig::default()
        }
    }

    async fn setup() -> (WebhookProcessor, InMemoryLedger, Order, Arc<Metrics>) {
        let ledger = InMemoryLedger::new();
        let order = Order::create(
            NewOrder::new(
                "alice",
                vec![OrderItem::new("A1", 2, Money::new(500).unwrap())],
                "tok-1",
            )
            .unwrap(),
            Utc::now(),
        )
        .unwrap();
        ledger.insert(order.clone()).await.unwrap();
        let metrics = Arc::new(Metrics::new());
        let processor = WebhookProcessor::new(
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            OrderCache::default(),
            metrics.clone(),
            &config(),
        );
        (processor, ledger, order, metrics)
    }

    fn event(order: &Order, status: PaymentStatus, tx: &str) -> WebhookEvent {
        WebhookEvent {
            payment_id: "pay_1".to_string(),
            order_id: order.id,
            status,
            transaction_id: Some(tx.to_string()),
            failure_reason: None,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_next_retry_at_is_none_past_calendar() {
        let now = Utc::now();
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_retry_at(1, now), Some(now + chrono::Duration::seconds(2)));

        let unbounded = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::MAX,
        };
        assert_eq!(unbounded.delay_after(1), Duration::MAX);
        assert_eq!(unbounded.next_retry_at(1, now), None);

        // Representable as a duration but past the last valid date.
        let far = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(10_000_000_000_000),
        };
        assert!(chrono::Duration::from_std(far.delay_after(0)).is_ok());
        assert_eq!(far.next_retry_at(0, now), None);
    }

    #[tokio::test]
    async fn test_verify_parses_signed_payload() {
        let (processor, _, order, metrics) = setup().await;
        let body = serde_json::to_vec(&event(&order, PaymentStatus::Success, "tx-1")).unwrap();
        let ts = Utc::now().timestamp().to_string();
        let sig = sign(&body, &ts, "whsec_unit").unwrap();

        let parsed = processor.verify(&body, Some(&sig), Some(&ts)).unwrap();
        assert_eq!(parsed.order_id, order.id);
        assert!(processor.verify(&body, Some("sha256=00"), Some(&ts)).is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.webhooks_verified, 1);
        assert_eq!(snapshot.webhooks_rejected, 1);
    }

    #[tokio::test]
    async fn test_apply_infers_payment_and_marks_order_paid() {
        let (processor, ledger, order, _) = setup().await;
        let outcome = processor
            .apply(&event(&order, PaymentStatus::Success, "tx-1"))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { order_paid: true });

        let payment = PaymentStore::get(&ledger, "pay_1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.amount, order.total_amount);
        let stored = OrderStore::get(&ledger, order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_terminal() {
        let (processor, _, order, metrics) = setup().await;
        let success = event(&order, PaymentStatus::Success, "tx-1");
        processor.apply(&success).await.unwrap();

        assert_eq!(processor.apply(&success).await.unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(
            processor
                .apply(&event(&order, PaymentStatus::Failed, "tx-2"))
                .await
                .unwrap(),
            ApplyOutcome::Ignored
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.webhooks_applied, 1);
        assert_eq!(snapshot.webhooks_duplicate, 1);
        assert_eq!(snapshot.webhooks_ignored, 1);
    }

    #[tokio::test]
    async fn test_failed_event_keeps_order_payable() {
        let (processor, ledger, order, _) = setup().await;
        let outcome = processor
            .apply(&event(&order, PaymentStatus::Failed, "tx-1"))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { order_paid: false });

        let stored = OrderStore::get(&ledger, order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_unknown_order_is_dead_lettered_without_retry() {
        let (processor, ledger, _, metrics) = setup().await;
        let stray = WebhookEvent {
            payment_id: "pay_x".to_string(),
            order_id: uuid::Uuid::new_v4(),
            status: PaymentStatus::Success,
            transaction_id: None,
            failure_reason: None,
        };

        let outcome = processor.dispatch(stray).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::DeadLettered { attempts: 1, .. }));

        let records = ledger.records_for("pay_x").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].final_failure);
        assert_eq!(metrics.snapshot().webhook_retries, 0);
    }

    #[tokio::test]
    async fn test_apply_rejects_mismatched_order() {
        let (processor, ledger, order, _) = setup().await;
        let now = Utc::now();
        let payment = ledger
            .insert_or_reuse_pending(
                Payment::pending_for(&order, "USD", chrono::Duration::minutes(15), now),
                now,
            )
            .await
            .unwrap();

        let forged = WebhookEvent {
            payment_id: payment.id,
            order_id: uuid::Uuid::new_v4(),
            status: PaymentStatus::Success,
            transaction_id: None,
            failure_reason: None,
        };
        assert!(matches!(
            processor.apply(&forged).await,
            Err(LedgerError::Validation(_))
        ));
    }
}
