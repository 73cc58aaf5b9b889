//! ConsumerGuard - best-effort consumer removal on every exit path.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ports::StreamAdmin;

/// Owns the registration of one consumer for the lifetime of a run.
///
/// - `release()` issues the delete and waits for the single attempt.
/// - Dropping an unreleased guard spawns the delete on the current runtime.
///
/// Either way there is exactly one attempt and failures are only logged.
pub struct ConsumerGuard {
    admin: Arc<dyn StreamAdmin>,
    stream: String,
    consumer: String,
    released: bool,
}

impl ConsumerGuard {
    pub fn new(admin: Arc<dyn StreamAdmin>, stream: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            admin,
            stream: stream.into(),
            consumer: consumer.into(),
            released: false,
        }
    }

    pub async fn release(mut self) {
        self.released = true;
        remove_consumer(self.admin.as_ref(), &self.stream, &self.consumer).await;
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let admin = Arc::clone(&self.admin);
        let stream = std::mem::take(&mut self.stream);
        let consumer = std::mem::take(&mut self.consumer);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_consumer(admin.as_ref(), &stream, &consumer).await;
                });
            }
            Err(_) => warn!(%stream, %consumer, "no runtime left, consumer stays registered"),
        }
    }
}

async fn remove_consumer(admin: &dyn StreamAdmin, stream: &str, consumer: &str) {
    info!(stream, consumer, "removing consumer");
    match admin.delete_consumer(stream, consumer).await {
        Ok(true) => info!(stream, consumer, "consumer removed"),
        Ok(false) => warn!(stream, consumer, "broker did not confirm consumer removal"),
        Err(err) => warn!(stream, consumer, error = %err, "consumer removal failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConsumerSpec, StreamSpec};
    use crate::impls::InMemoryBroker;

    async fn broker_with_consumer() -> Arc<InMemoryBroker> {
        let broker = Arc::new(InMemoryBroker::new());
        let stream = StreamSpec::builder("S").subject("s.a").build().unwrap();
        broker.create_stream(&stream).await.unwrap();
        let consumer = ConsumerSpec::durable("c").build().unwrap();
        broker.create_consumer("S", &consumer).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn release_deletes_the_consumer() {
        let broker = broker_with_consumer().await;
        let guard = ConsumerGuard::new(broker.clone(), "S", "c");
        guard.release().await;

        assert_eq!(broker.delete_calls().await, vec![("S".to_string(), "c".to_string())]);
        assert!(broker.consumer_info("S", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drop_attempts_deletion() {
        let broker = broker_with_consumer().await;
        {
            let _guard = ConsumerGuard::new(broker.clone(), "S", "c");
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.delete_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_deletion_is_not_retried() {
        let broker = broker_with_consumer().await;
        broker.delete_consumer("S", "c").await.unwrap();

        ConsumerGuard::new(broker.clone(), "S", "c").release().await;
        assert_eq!(broker.delete_calls().await.len(), 2);
    }
}
