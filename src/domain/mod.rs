//! Domain types and the storage ports the application layer depends on.

pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
