//! Publishing the startup batch.

use tracing::info;

use crate::domain::PublishAck;
use crate::error::HarnessError;
use crate::ports::MessageBus;

/// Publish `payloads` to `subject` in order, stopping at the first failure.
///
/// No retry here; the client's own send path is all there is.
pub async fn publish_batch(
    bus: &dyn MessageBus,
    subject: &str,
    payloads: &[Vec<u8>],
) -> Result<Vec<PublishAck>, HarnessError> {
    let mut acks = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let ack = bus.publish(subject, payload.clone()).await?;
        info!(
            subject,
            stream = %ack.stream,
            seq = ack.sequence,
            "published message: {}",
            String::from_utf8_lossy(payload)
        );
        acks.push(ack);
    }
    Ok(acks)
}
