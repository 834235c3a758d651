//! Application services orchestrating the domain over the storage ports.
//!
//! `OrderService` owns order creation and optimistic-locking updates, `PaymentService`
//! owns payment intents, and `WebhookProcessor` reconciles both from provider callbacks.
//! `Ledger` wires all three over one set of stores. None of them hold locks across calls; correctness rests on the stores' conditional
//! writes.

pub mod ledger;
pub mod orders;
pub mod payments;
pub mod signature;
pub mod webhook;

pub use ledger::Ledger;
pub use orders::OrderService;
pub use payments::PaymentService;
pub use webhook::{ApplyOutcome, RetryPolicy, WebhookOutcome, WebhookProcessor};
