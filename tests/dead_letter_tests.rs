mod common;

use common::{FlakyPayments, Harness, event_for, items};
use order_ledger::application::{ApplyOutcome, WebhookOutcome};
use order_ledger::domain::order::{OrderStatus, Principal};
use order_ledger::domain::payment::{Payment, PaymentStatus, WebhookEvent};
use order_ledger::domain::ports::{OrderStore, PaymentStore, RetryLog};
use order_ledger::infrastructure::in_memory::InMemoryLedger;
use std::sync::Arc;

async fn flaky_harness(failures: u32) -> (Harness, Payment) {
    let ledger = InMemoryLedger::new();
    let h = Harness::with_stores(
        ledger.clone(),
        Arc::new(ledger.clone()),
        Arc::new(FlakyPayments::new(ledger.clone(), failures)),
        Arc::new(ledger),
    );
    let order = h.orders.create_order("alice", items(), "tok-1").await.unwrap();
    let payment = h
        .payments
        .initiate(order.id, &Principal::user("alice"))
        .await
        .unwrap();
    (h, payment)
}

#[tokio::test]
async fn test_exhausted_retries_force_payment_failed() {
    let (h, payment) = flaky_harness(u32::MAX).await;

    let max_attempts = h.webhooks.retry_policy().max_attempts;
    assert_eq!(max_attempts, 3);

    let outcome = h
        .webhooks
        .dispatch(event_for(&payment, "SUCCESS", "tx-1"))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::DeadLettered { attempts, .. } if attempts == max_attempts));

    let records = h.ledger.records_for(&payment.id).await.unwrap();
    assert_eq!(records.len(), max_attempts as usize);
    assert_eq!(
        records.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(records[..2].iter().all(|r| !r.final_failure && r.next_retry_at.is_some()));
    assert!(records[2].final_failure);
    assert!(records[2].next_retry_at.is_none());

    let stored = PaymentStore::get(&h.ledger, &payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("webhook processing failed after 3 attempts")
    );

    let order = OrderStore::get(&h.ledger, payment.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.version, 1);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.webhook_retries, 2);
    assert_eq!(snapshot.webhooks_dead_lettered, 1);
    assert_eq!(snapshot.webhooks_applied, 0);
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let (h, payment) = flaky_harness(2).await;

    let outcome = h
        .webhooks
        .dispatch(event_for(&payment, "SUCCESS", "tx-1"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Completed {
            outcome: ApplyOutcome::Applied { order_paid: true },
            attempts: 3
        }
    );

    let records = h.ledger.records_for(&payment.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.final_failure));

    let order = OrderStore::get(&h.ledger, payment.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.version, 2);
}

#[tokio::test]
async fn test_terminal_payment_short_circuits_before_settle() {
    let (h, payment) = flaky_harness(u32::MAX).await;

    // Already terminal: the failing settle path is never reached.
    h.ledger
        .fail_if_pending(&payment.id, None, "settled elsewhere", chrono::Utc::now())
        .await
        .unwrap();

    let outcome = h
        .webhooks
        .dispatch(event_for(&payment, "SUCCESS", "tx-1"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Completed {
            outcome: ApplyOutcome::Ignored,
            ..
        }
    ));

    let stored = PaymentStore::get(&h.ledger, &payment.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_reason.as_deref(), Some("settled elsewhere"));
    assert!(h.ledger.records_for(&payment.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dead_lettered_unknown_payment_is_recorded_failed() {
    let (h, payment) = flaky_harness(u32::MAX).await;
    let order = OrderStore::get(&h.ledger, payment.order_id).await.unwrap().unwrap();
    let event: WebhookEvent = serde_json::from_value(serde_json::json!({
        "payment_id": "pay_unknown",
        "order_id": order.id,
        "status": "SUCCESS",
        "transaction_id": "tx-9",
    }))
    .unwrap();

    let outcome = h.webhooks.dispatch(event).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::DeadLettered { attempts: 3, .. }));

    let stored = PaymentStore::get(&h.ledger, "pay_unknown").await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.order_id, order.id);
    assert_eq!(stored.amount, order.total_amount);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("webhook processing failed after 3 attempts")
    );
    assert_eq!(h.ledger.records_for("pay_unknown").await.unwrap().len(), 3);

    let order = OrderStore::get(&h.ledger, order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.version, 1);
}
