//! sluice-core
//!
//! Building blocks for a JetStream work-queue harness: declare a stream and a
//! pull consumer idempotently, publish a batch, then pull and acknowledge
//! until told to stop.
//!
//! # Modules
//! - **domain**: validated descriptors (connection, stream, consumer, message)
//! - **ports**: broker seams (StreamAdmin, MessageBus, PullSubscription, Delivery)
//! - **impls**: NatsBroker (async-nats) and InMemoryBroker
//! - **app**: reconciliation, publish, pull loop, cleanup guard, Harness
//! - **error**: HarnessError

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use error::HarnessError;
