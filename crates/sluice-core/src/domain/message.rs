use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// A message handed out by a pull subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub stream_sequence: u64,
    /// 1 on first delivery, 2 on the first redelivery, ...
    pub delivered: u64,
}

impl ReceivedMessage {
    /// Payload decoded as UTF-8 (lossy).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivered > 1
    }
}

/// Broker confirmation that a published message was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    pub duplicate: bool,
}
