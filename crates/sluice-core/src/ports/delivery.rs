//! Delivery port - pulled messages and their acknowledgment handles.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ConsumerInfo, ReceivedMessage};
use crate::error::HarnessError;

/// A delivered message. The holder must `ack` it or let it go;
/// a dropped delivery is redelivered by the broker after ack-wait.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &ReceivedMessage;

    async fn ack(self: Box<Self>) -> Result<(), HarnessError>;
}

/// A pull subscription bound to one consumer.
#[async_trait]
pub trait PullSubscription: Send {
    /// Request up to `batch` messages, waiting at most `expires` for them.
    ///
    /// An empty result means the request expired with nothing to deliver.
    async fn fetch(
        &mut self,
        batch: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, HarnessError>;

    /// Fresh consumer info from the broker.
    async fn info(&mut self) -> Result<ConsumerInfo, HarnessError>;
}
