//! Impls - port implementations.
//!
//! - **NatsBroker**: JetStream over async-nats
//! - **InMemoryBroker**: in-process stand-in used by the tests

pub mod inmem_broker;
pub mod nats;

pub use self::inmem_broker::InMemoryBroker;
pub use self::nats::NatsBroker;
