//! StreamAdmin port - stream and consumer management.

use async_trait::async_trait;

use crate::domain::{ConsumerInfo, ConsumerSpec, StreamInfo, StreamSpec};
use crate::error::HarnessError;

/// Raw management calls.
///
/// Idempotent reconciliation is built on top of these in
/// [`crate::app::reconcile`]; implementations only report what exists and
/// create what they are asked to.
#[async_trait]
pub trait StreamAdmin: Send + Sync {
    /// Look up a stream by name. `Ok(None)` when it does not exist.
    async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, HarnessError>;

    async fn create_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, HarnessError>;

    /// Look up a consumer. `Ok(None)` when the stream exists but the consumer does not.
    async fn consumer_info(
        &self,
        stream: &str,
        name: &str,
    ) -> Result<Option<ConsumerInfo>, HarnessError>;

    async fn create_consumer(
        &self,
        stream: &str,
        spec: &ConsumerSpec,
    ) -> Result<ConsumerInfo, HarnessError>;

    async fn list_consumers(&self, stream: &str) -> Result<Vec<ConsumerInfo>, HarnessError>;

    /// Returns whether the broker reported the consumer as removed.
    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, HarnessError>;
}
