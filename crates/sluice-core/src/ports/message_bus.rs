//! MessageBus port - the data plane.

use async_trait::async_trait;

use super::PullSubscription;
use crate::domain::PublishAck;
use crate::error::HarnessError;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message and wait for the broker to store it.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, HarnessError>;

    /// Bind to an existing pull consumer.
    async fn pull_subscribe(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Box<dyn PullSubscription>, HarnessError>;
}
