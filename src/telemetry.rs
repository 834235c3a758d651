use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "order_ledger=info";

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `order_ledger=info`. With `json`
/// set, events are emitted as JSON lines. Returns `false` if a subscriber was already
/// installed, which the embedding process may have done itself.
pub fn init(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}
