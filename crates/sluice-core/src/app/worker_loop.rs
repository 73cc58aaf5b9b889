//! PullLoop - single-flight pull/handle/ack loop
//!
//! # Flow
//! 1. AwaitingBatch: request up to `batch_size` messages (raced against shutdown)
//! 2. Processing: hand each message to the handler, ack on success
//! 3. Back to AwaitingBatch once the whole batch is settled
//!
//! At most one batch is outstanding at any time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::handler::MessageHandler;
use crate::error::HarnessError;
use crate::ports::PullSubscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingBatch,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOptions {
    pub batch_size: usize,
    /// How long one pull request waits for messages.
    pub expires: Duration,
    /// Stop after this many messages were acknowledged. `None` runs until shutdown.
    pub max_messages: Option<u64>,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            expires: Duration::from_secs(5),
            max_messages: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub pulls: u64,
    pub received: u64,
    pub acked: u64,
    pub handler_failures: u64,
}

pub struct PullLoop {
    options: PullOptions,
    handler: Arc<dyn MessageHandler>,
    shutdown_rx: watch::Receiver<bool>,
    state: LoopState,
}

impl PullLoop {
    pub fn new(
        options: PullOptions,
        handler: Arc<dyn MessageHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            options,
            handler,
            shutdown_rx,
            state: LoopState::AwaitingBatch,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until shutdown is signalled (or its sender is dropped), the message
    /// limit is reached, or a pull/ack fails.
    pub async fn run(
        &mut self,
        subscription: &mut dyn PullSubscription,
    ) -> Result<LoopSummary, HarnessError> {
        let mut summary = LoopSummary::default();
        loop {
            if *self.shutdown_rx.borrow() {
                info!("shutdown requested, leaving pull loop");
                break;
            }
            let remaining = self.options.max_messages.map(|max| max.saturating_sub(summary.acked));
            if remaining == Some(0) {
                info!(acked = summary.acked, "message limit reached");
                break;
            }
            let want = remaining.map_or(self.options.batch_size, |r| {
                self.options.batch_size.min(usize::try_from(r).unwrap_or(usize::MAX))
            });

            self.state = LoopState::AwaitingBatch;
            let batch = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        info!("shutdown handle dropped, leaving pull loop");
                        break;
                    }
                    continue;
                }
                batch = subscription.fetch(want, self.options.expires) => batch?,
            };
            summary.pulls += 1;

            if batch.is_empty() {
                debug!("pull request expired without messages");
                continue;
            }

            self.state = LoopState::Processing;
            for delivery in batch {
                summary.received += 1;
                let message = delivery.message().clone();
                match self.handler.handle(&message).await {
                    Ok(()) => {
                        delivery.ack().await?;
                        summary.acked += 1;
                        debug!(seq = message.stream_sequence, "acknowledged");
                    }
                    Err(err) => {
                        summary.handler_failures += 1;
                        warn!(
                            seq = message.stream_sequence,
                            error = %err,
                            "handler failed, leaving message for redelivery"
                        );
                    }
                }
            }
        }
        self.state = LoopState::AwaitingBatch;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConsumerSpec, ReceivedMessage, RetentionPolicy, StreamSpec};
    use crate::impls::InMemoryBroker;
    use crate::ports::{MessageBus, StreamAdmin};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &ReceivedMessage) -> Result<(), HarnessError> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(HarnessError::Handler("intentional failure".into()));
            }
            self.seen.lock().unwrap().push(message.text().into_owned());
            Ok(())
        }
    }

    async fn broker_with_consumer(ack_wait: Duration) -> (InMemoryBroker, Box<dyn PullSubscription>) {
        let broker = InMemoryBroker::new();
        let stream = StreamSpec::builder("STREAM_NAME")
            .subject("some.subject")
            .retention(RetentionPolicy::WorkQueue)
            .build()
            .unwrap();
        broker.create_stream(&stream).await.unwrap();
        for payload in ["1", "2", "3"] {
            broker
                .publish("some.subject", payload.as_bytes().to_vec())
                .await
                .unwrap();
        }
        let consumer = ConsumerSpec::durable("queue-consumer")
            .filter_subject("some.subject")
            .ack_wait(ack_wait)
            .build()
            .unwrap();
        broker.create_consumer("STREAM_NAME", &consumer).await.unwrap();
        let sub = broker
            .pull_subscribe("STREAM_NAME", "queue-consumer")
            .await
            .unwrap();
        (broker, sub)
    }

    fn options(max: u64) -> PullOptions {
        PullOptions {
            batch_size: 1,
            expires: Duration::from_secs(1),
            max_messages: Some(max),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn receives_published_messages_in_order_exactly_once() {
        let (broker, mut sub) = broker_with_consumer(Duration::from_secs(2)).await;
        let recorder = Arc::new(Recorder::default());
        let (_tx, rx) = watch::channel(false);

        let mut pull_loop = PullLoop::new(options(3), recorder.clone(), rx);
        let summary = pull_loop.run(sub.as_mut()).await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["1", "2", "3"]);
        assert_eq!(summary.acked, 3);
        assert_eq!(summary.pulls, 3);
        assert_eq!(pull_loop.state(), LoopState::AwaitingBatch);
        assert!(broker.stored_payloads("STREAM_NAME").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_message_is_redelivered_after_ack_wait() {
        let (_broker, mut sub) = broker_with_consumer(Duration::from_secs(2)).await;
        let recorder = Arc::new(Recorder {
            fail_first: Mutex::new(true),
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);

        let mut pull_loop = PullLoop::new(options(3), recorder.clone(), rx);
        let summary = pull_loop.run(sub.as_mut()).await.unwrap();

        assert_eq!(summary.handler_failures, 1);
        assert_eq!(summary.acked, 3);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["2", "3", "1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_an_idle_loop() {
        let (_broker, mut sub) = broker_with_consumer(Duration::from_secs(2)).await;
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut pull_loop = PullLoop::new(
                PullOptions {
                    max_messages: None,
                    ..options(0)
                },
                recorder,
                rx,
            );
            pull_loop.run(sub.as_mut()).await
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.acked, 3);
    }
}
