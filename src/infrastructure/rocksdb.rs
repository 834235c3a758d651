use crate::domain::order::{Order, OrderId, OrderPage, OrderQuery, OrderStatus};
use crate::domain::payment::{Payment, PaymentId, PaymentStatus, SettleResult, Settlement, WebhookRetryRecord};
use crate::domain::ports::{OrderStore, PaymentStore, RetryLog};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for order rows, keyed by order id bytes.
pub const CF_ORDERS: &str = "orders";
/// Column Family for the unique `client_token` index.
pub const CF_CLIENT_TOKENS: &str = "client_tokens";
/// Column Family for payment rows, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for the webhook retry log, keyed by `retry_log_prefix(payment_id) ++ record_id`.
pub const CF_RETRY_LOG: &str = "retry_log";

/// A persistent ledger implementation using RocksDB.
///
/// Each table lives in its own Column Family. Read-modify-write sequences run under
/// `write_lock`, and every multi-key change is committed through one `WriteBatch`,
/// which gives the conditional updates the same atomicity as the in-memory ledger.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that all ledger column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ORDERS, CF_CLIENT_TOKENS, CF_PAYMENTS, CF_RETRY_LOG]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        tracing::info!("Opened RocksDB ledger");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &'static str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn put<T: Serialize>(&self, batch: &mut WriteBatch, cf: &'static str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn payments_of(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.order_id == order_id)
            .collect())
    }

    fn transition_payment(
        &self,
        id: &str,
        fallback: Option<Payment>,
        status: PaymentStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let current = self
            .read::<Payment>(CF_PAYMENTS, id.as_bytes())?
            .or_else(|| fallback.filter(|p| p.id == id));
        let Some(mut payment) = current else {
            return Ok(None);
        };
        if !payment.settle(status, None, reason, now) {
            return Ok(None);
        }
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_PAYMENTS, id.as_bytes(), &payment)?;
        self.db.write(batch)?;
        Ok(Some(payment))
    }
}

/// Length-prefixed payment id. No payment's prefix is a prefix of another payment's keys.
fn retry_log_prefix(payment_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(8 + payment_id.len());
    prefix.extend_from_slice(&(payment_id.len() as u64).to_be_bytes());
    prefix.extend_from_slice(payment_id.as_bytes());
    prefix
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert(&self, order: Order) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        let token_key = order.client_token.as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_CLIENT_TOKENS)?, token_key)?.is_some() {
            return Err(LedgerError::DuplicateKey(order.client_token));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_CLIENT_TOKENS)?, token_key, order.id.as_bytes());
        self.put(&mut batch, CF_ORDERS, order.id.as_bytes(), &order)?;
        self.db.write(batch)?;
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.read(CF_ORDERS, id.as_bytes())
    }

    async fn find_by_client_token(&self, client_token: &str) -> Result<Option<Order>> {
        match self.db.get_cf(self.cf(CF_CLIENT_TOKENS)?, client_token.as_bytes())? {
            Some(id) => self.read(CF_ORDERS, &id),
            None => Ok(None),
        }
    }

    async fn list(&self, query: &OrderQuery) -> Result<OrderPage> {
        Ok(query.run(self.scan::<Order>(CF_ORDERS)?))
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut order) = self.read::<Order>(CF_ORDERS, id.as_bytes())? else {
            return Ok(None);
        };
        if expected_version.is_some_and(|expected| expected != order.version) {
            return Ok(None);
        }
        order.transition(status, now);

        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_ORDERS, id.as_bytes(), &order)?;
        self.db.write(batch)?;
        Ok(Some(order))
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn get(&self, id: &str) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.as_bytes())
    }

    async fn insert_or_reuse_pending(&self, payment: Payment, now: DateTime<Utc>) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        if let Some(open) = self
            .payments_of(payment.order_id)?
            .into_iter()
            .find(|p| p.is_open(now))
        {
            return Ok(open);
        }
        if self.db.get_pinned_cf(self.cf(CF_PAYMENTS)?, payment.id.as_bytes())?.is_some() {
            return Err(LedgerError::DuplicateKey(payment.id));
        }

        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_PAYMENTS, payment.id.as_bytes(), &payment)?;
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn find_open_for_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Option<Payment>> {
        Ok(self.payments_of(order_id)?.into_iter().find(|p| p.is_open(now)))
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettleResult> {
        let _guard = self.write_lock.lock().await;
        let event = &settlement.event;
        let current = self.read::<Payment>(CF_PAYMENTS, event.payment_id.as_bytes())?;
        let order = self.read::<Order>(CF_ORDERS, event.order_id.as_bytes())?;

        let result = settlement.plan(current, order)?;
        if let SettleResult::Applied { payment, order } = &result {
            let mut batch = WriteBatch::default();
            self.put(&mut batch, CF_PAYMENTS, payment.id.as_bytes(), payment)?;
            if let Some(order) = order {
                self.put(&mut batch, CF_ORDERS, order.id.as_bytes(), order)?;
            }
            self.db.write(batch)?;
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
        let _guard = self.write_lock.lock().await;
        self.transition_payment(id, fallback, PaymentStatus::Failed, Some(reason.to_string()), now)
    }

    async fn cancel_if_pending(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Payment>> {
        let _guard = self.write_lock.lock().await;
        self.transition_payment(id, None, PaymentStatus::Cancelled, None, now)
    }

    async fn cancel_expired(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<PaymentId>> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let mut cancelled = Vec::new();
        for mut payment in self.payments_of(order_id)? {
            if payment.is_expired(now)
                && payment.settle(
                    PaymentStatus::Cancelled,
                    None,
                    Some("payment expired".to_string()),
                    now,
                )
            {
                self.put(&mut batch, CF_PAYMENTS, payment.id.as_bytes(), &payment)?;
                cancelled.push(payment.id);
            }
        }
        self.db.write(batch)?;
        Ok(cancelled)
    }
}

#[async_trait]
impl RetryLog for RocksDBStore {
    async fn append(&self, record: WebhookRetryRecord) -> Result<()> {
        let mut key = retry_log_prefix(&record.payment_id);
        key.extend_from_slice(record.id.as_bytes());
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_RETRY_LOG, &key, &record)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn records_for(&self, payment_id: &str) -> Result<Vec<WebhookRetryRecord>> {
        let prefix = retry_log_prefix(payment_id);
        let mut records = Vec::new();
        for item in self.db.prefix_iterator_cf(self.cf(CF_RETRY_LOG)?, &prefix) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(serde_json::from_slice::<WebhookRetryRecord>(&value)?);
        }
        records.sort_by(|a, b| a.attempt.cmp(&b.attempt).then_with(|| a.created_at.cmp(&b.created_at)));
        Ok(records)
    }
}
