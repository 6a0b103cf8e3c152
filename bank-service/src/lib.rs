//! Issuer side of the PIX-style payment platform.
//!
//! Simulates the bank that settles charges and notifies the charges API:
//! signed webhook delivery with exponential backoff and jitter, a durable
//! dead-letter queue for exhausted deliveries, and an operator surface to
//! replay dead-lettered events.

pub mod api;
pub mod bank;
pub mod config;
pub mod dispatcher;
pub mod dlq;
