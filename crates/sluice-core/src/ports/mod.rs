//! Ports - the seams between the harness and a broker.
//!
//! The harness only ever talks to a broker through these traits, so the
//! same startup sequence runs against a real JetStream server
//! ([`crate::impls::NatsBroker`]) or an in-process stand-in
//! ([`crate::impls::InMemoryBroker`]).
//!
//! - **StreamAdmin**: the management handle (stream/consumer CRUD)
//! - **MessageBus**: the data-plane handle (publish, open pull subscriptions)
//! - **PullSubscription / Delivery**: one consumer's pull-and-ack surface

pub mod delivery;
pub mod message_bus;
pub mod stream_admin;

pub use self::delivery::{Delivery, PullSubscription};
pub use self::message_bus::MessageBus;
pub use self::stream_admin::StreamAdmin;
