//! Harness - the linear startup sequence and the consume loop.
//!
//! ensure stream → ensure consumer → acquire cleanup guard → list consumers
//! → pull subscribe → publish batch → pull/ack until shutdown → release guard.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::cleanup::ConsumerGuard;
use super::handler::MessageHandler;
use super::publisher::publish_batch;
use super::reconcile::{ensure_consumer, ensure_stream};
use super::status::{log_consumers, log_json};
use super::worker_loop::{LoopSummary, PullLoop, PullOptions};
use crate::domain::{ConsumerInfo, ConsumerSpec, PublishAck, StreamInfo, StreamSpec};
use crate::error::HarnessError;
use crate::ports::{MessageBus, StreamAdmin};

/// Everything one run declares and does.
#[derive(Debug, Clone)]
pub struct HarnessPlan {
    pub stream: StreamSpec,
    pub consumer: ConsumerSpec,
    pub publish_subject: String,
    pub payloads: Vec<Vec<u8>>,
    pub pull: PullOptions,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub stream: StreamInfo,
    pub consumer: ConsumerInfo,
    pub published: Vec<PublishAck>,
    pub summary: LoopSummary,
}

pub struct Harness {
    admin: Arc<dyn StreamAdmin>,
    bus: Arc<dyn MessageBus>,
}

impl Harness {
    pub fn new(admin: Arc<dyn StreamAdmin>, bus: Arc<dyn MessageBus>) -> Self {
        Self { admin, bus }
    }

    /// Run the whole sequence. Any setup failure aborts the run; once the
    /// consumer exists it is removed on every exit path.
    pub async fn run(
        &self,
        plan: &HarnessPlan,
        handler: Arc<dyn MessageHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<RunReport, HarnessError> {
        let stream = ensure_stream(self.admin.as_ref(), &plan.stream).await?;
        log_json("retrieved stream (info)", &stream);

        let consumer = ensure_consumer(self.admin.as_ref(), plan.stream.name(), &plan.consumer).await?;
        let guard = ConsumerGuard::new(Arc::clone(&self.admin), plan.stream.name(), &consumer.name);

        let outcome = self.consume(plan, handler, shutdown_rx).await;
        guard.release().await;

        let (published, summary) = outcome?;
        info!(
            published = published.len(),
            received = summary.received,
            acked = summary.acked,
            "run finished"
        );
        Ok(RunReport {
            stream,
            consumer,
            published,
            summary,
        })
    }

    async fn consume(
        &self,
        plan: &HarnessPlan,
        handler: Arc<dyn MessageHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Vec<PublishAck>, LoopSummary), HarnessError> {
        log_consumers(&self.admin.list_consumers(plan.stream.name()).await?);

        let mut subscription = self
            .bus
            .pull_subscribe(plan.stream.name(), plan.consumer.name())
            .await?;
        log_json(
            "created pull subscription for consumer",
            &subscription.info().await?,
        );

        let published = publish_batch(self.bus.as_ref(), &plan.publish_subject, &plan.payloads).await?;

        let mut pull_loop = PullLoop::new(plan.pull.clone(), handler, shutdown_rx);
        let summary = pull_loop.run(subscription.as_mut()).await?;
        Ok((published, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::LogHandler;
    use crate::domain::{ReceivedMessage, RetentionPolicy};
    use crate::error::EntityKind;
    use crate::impls::InMemoryBroker;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, message: &ReceivedMessage) -> Result<(), HarnessError> {
            self.0.lock().unwrap().push(message.text().into_owned());
            Ok(())
        }
    }

    fn plan(max_bytes: i64) -> HarnessPlan {
        HarnessPlan {
            stream: StreamSpec::builder("STREAM_NAME")
                .subject("some.subject")
                .retention(RetentionPolicy::WorkQueue)
                .max_bytes(max_bytes)
                .build()
                .unwrap(),
            consumer: ConsumerSpec::durable("queue-consumer")
                .filter_subject("some.subject")
                .inactive_threshold(Duration::from_secs(5))
                .ack_wait(Duration::from_secs(2))
                .description("queue consumer")
                .build()
                .unwrap(),
            publish_subject: "some.subject".into(),
            payloads: ["1", "2", "3"].iter().map(|p| p.as_bytes().to_vec()).collect(),
            pull: PullOptions {
                batch_size: 1,
                expires: Duration::from_secs(1),
                max_messages: Some(3),
            },
        }
    }

    fn harness(broker: &Arc<InMemoryBroker>) -> Harness {
        Harness::new(broker.clone(), broker.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_handles_messages_in_publish_order_and_cleans_up() {
        let broker = Arc::new(InMemoryBroker::new());
        let collect = Arc::new(Collect::default());
        let (_tx, rx) = watch::channel(false);

        let report = harness(&broker)
            .run(&plan(10_000_000_000), collect.clone(), rx)
            .await
            .unwrap();

        assert_eq!(*collect.0.lock().unwrap(), vec!["1", "2", "3"]);
        assert_eq!(report.published.len(), 3);
        assert_eq!(report.summary.acked, 3);
        assert_eq!(report.stream.config.name(), "STREAM_NAME");
        assert_eq!(
            broker.delete_calls().await,
            vec![("STREAM_NAME".to_string(), "queue-consumer".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_runs_reuse_the_stream() {
        let broker = Arc::new(InMemoryBroker::new());
        let (_tx, rx) = watch::channel(false);
        harness(&broker)
            .run(&plan(10_000_000_000), Arc::new(LogHandler), rx.clone())
            .await
            .unwrap();
        let second = harness(&broker)
            .run(&plan(10_000_000_000), Arc::new(LogHandler), rx)
            .await
            .unwrap();
        assert_eq!(second.summary.acked, 3);
    }

    #[tokio::test]
    async fn conflicting_stream_aborts_before_any_consumer_exists() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_stream(&plan(10_000_000_000).stream).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let err = harness(&broker)
            .run(&plan(5_000_000_000), Arc::new(LogHandler), rx)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Conflict { kind: EntityKind::Stream, .. }));
        assert!(broker.list_consumers("STREAM_NAME").await.unwrap().is_empty());
        assert!(broker.delete_calls().await.is_empty());
    }

    #[tokio::test]
    async fn publish_failure_still_removes_the_consumer() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut bad = plan(-1);
        bad.publish_subject = "nowhere.subject".into();
        let (_tx, rx) = watch::channel(false);

        let err = harness(&broker)
            .run(&bad, Arc::new(LogHandler), rx)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Publish(_)));
        assert_eq!(broker.delete_calls().await.len(), 1);
    }

    /// Delegates to the in-memory broker but cannot list consumers.
    struct ListingFails(Arc<InMemoryBroker>);

    #[async_trait]
    impl StreamAdmin for ListingFails {
        async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, HarnessError> {
            self.0.stream_info(name).await
        }

        async fn create_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, HarnessError> {
            self.0.create_stream(spec).await
        }

        async fn consumer_info(
            &self,
            stream: &str,
            name: &str,
        ) -> Result<Option<ConsumerInfo>, HarnessError> {
            self.0.consumer_info(stream, name).await
        }

        async fn create_consumer(
            &self,
            stream: &str,
            spec: &ConsumerSpec,
        ) -> Result<ConsumerInfo, HarnessError> {
            self.0.create_consumer(stream, spec).await
        }

        async fn list_consumers(&self, _stream: &str) -> Result<Vec<ConsumerInfo>, HarnessError> {
            Err(HarnessError::Broker("timeout".into()))
        }

        async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, HarnessError> {
            self.0.delete_consumer(stream, name).await
        }
    }

    #[tokio::test]
    async fn listing_failure_still_removes_the_consumer() {
        let broker = Arc::new(InMemoryBroker::new());
        let admin = Arc::new(ListingFails(broker.clone()));
        let (_tx, rx) = watch::channel(false);

        let err = Harness::new(admin, broker.clone())
            .run(&plan(-1), Arc::new(LogHandler), rx)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Broker(_)));
        assert_eq!(
            broker.delete_calls().await,
            vec![("STREAM_NAME".to_string(), "queue-consumer".to_string())]
        );
        assert!(broker.consumer_info("STREAM_NAME", "queue-consumer").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_ends_an_unbounded_run() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut unbounded = plan(-1);
        unbounded.pull.max_messages = None;
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn({
            let broker = broker.clone();
            async move {
                harness(&broker)
                    .run(&unbounded, Arc::new(LogHandler), rx)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_secs(30)).await;
        tx.send(true).unwrap();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.summary.acked, 3);
        assert_eq!(broker.delete_calls().await.len(), 1);
    }
}
