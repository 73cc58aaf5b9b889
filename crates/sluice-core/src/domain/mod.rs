//! Domain model: connection options, stream/consumer descriptors, messages.
//!
//! Every descriptor here is a local, validated mirror of something the
//! broker owns. Nothing in this module talks to the network.

pub mod connection;
pub mod consumer;
pub mod message;
pub mod stream;
pub mod subject;

pub use connection::ConnectSpec;
pub use consumer::{
    AckPolicy, ConsumerInfo, ConsumerSpec, ConsumerSpecBuilder, DeliverPolicy, Durability,
    ReplayPolicy,
};
pub use message::{PublishAck, ReceivedMessage};
pub use stream::{
    DiscardPolicy, RetentionPolicy, StorageType, StreamInfo, StreamSpec, StreamSpecBuilder,
    StreamState,
};
