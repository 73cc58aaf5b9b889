//! MessageHandler - what the pull loop does with each message.

use async_trait::async_trait;
use tracing::info;

use crate::domain::ReceivedMessage;
use crate::error::HarnessError;

/// A handler for pulled messages.
///
/// Returning `Err` leaves the message un-acknowledged, so the broker
/// redelivers it once ack-wait expires.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HarnessError>;
}

/// Logs `received message: <payload>` and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HarnessError> {
        info!(
            subject = %message.subject,
            seq = message.stream_sequence,
            delivered = message.delivered,
            "received message: {}",
            message.text()
        );
        Ok(())
    }
}
