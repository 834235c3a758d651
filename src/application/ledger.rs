use super::{OrderService, PaymentService, WebhookProcessor};
use crate::config::LedgerConfig;
use crate::domain::ports::{OrderStoreRef, PaymentStoreRef, RetryLogRef};
use crate::error::Result;
use crate::infrastructure::cache::OrderCache;
use crate::infrastructure::in_memory::InMemoryLedger;
use crate::metrics::Metrics;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The order/payment core wired over one set of stores.
///
/// All services share one `OrderCache` and one `Metrics`. The cache sweeper runs for as
/// long as the `Ledger` lives and is aborted on drop.
pub struct Ledger {
    pub orders: OrderService,
    pub payments: PaymentService,
    pub webhooks: WebhookProcessor,
    pub cache: OrderCache,
    pub metrics: Arc<Metrics>,
    sweeper: JoinHandle<()>,
}

impl Ledger {
    /// Wires the services and spawns the cache sweeper. Must run inside a Tokio runtime.
    pub fn new(
        config: &LedgerConfig,
        orders: OrderStoreRef,
        payments: PaymentStoreRef,
        retry_log: RetryLogRef,
    ) -> Result<Self> {
        config.validate()?;
        let cache = OrderCache::new(config.order_cache_ttl);
        let metrics = Arc::new(Metrics::new());
        let sweeper = cache.spawn_sweeper(config.cache_sweep_interval);

        tracing::info!(
            environment = %config.environment,
            cache_ttl_secs = config.order_cache_ttl.as_secs(),
            max_attempts = config.webhook_max_attempts,
            "Order ledger started"
        );

        Ok(Self {
            orders: OrderService::new(orders.clone(), cache.clone(), metrics.clone()),
            payments: PaymentService::new(
                orders.clone(),
                payments.clone(),
                metrics.clone(),
                config.payment_currency.clone(),
                config.payment_ttl_chrono(),
            ),
            webhooks: WebhookProcessor::new(
                orders,
                payments,
                retry_log,
                cache.clone(),
                metrics.clone(),
                config,
            ),
            cache,
            metrics,
            sweeper,
        })
    }

    pub fn in_memory(config: &LedgerConfig) -> Result<Self> {
        let store = InMemoryLedger::new();
        Self::new(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    }

    #[cfg(feature = "storage-rocksdb")]
    pub fn open_rocksdb(config: &LedgerConfig, path: impl AsRef<std::path::Path>) -> Result<Self> {
        let store = crate::infrastructure::rocksdb::RocksDBStore::open(path)?;
        Self::new(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    }

    /// In-memory ledger configured from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::in_memory(&LedgerConfig::from_env()?)
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
