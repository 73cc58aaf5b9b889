//! Idempotent stream/consumer declaration.
//!
//! Declaring something that does not exist creates it. Declaring something
//! that exists succeeds only when every declared attribute matches; anything
//! else is a [`HarnessError::Conflict`] and the existing entity is left alone.

use tracing::info;

use crate::domain::{ConsumerInfo, ConsumerSpec, StreamInfo, StreamSpec};
use crate::error::{EntityKind, HarnessError};
use crate::ports::StreamAdmin;

pub async fn ensure_stream(
    admin: &dyn StreamAdmin,
    spec: &StreamSpec,
) -> Result<StreamInfo, HarnessError> {
    info!(stream = spec.name(), "retrieving stream");
    match admin.stream_info(spec.name()).await? {
        Some(existing) => {
            let fields = spec.mismatches(&existing.config);
            if !fields.is_empty() {
                return Err(HarnessError::Conflict {
                    kind: EntityKind::Stream,
                    name: spec.name().to_string(),
                    fields,
                });
            }
            info!(stream = spec.name(), "stream already exists with matching configuration");
            Ok(existing)
        }
        None => {
            let created = admin.create_stream(spec).await?;
            info!(stream = spec.name(), "stream created");
            Ok(created)
        }
    }
}

pub async fn ensure_consumer(
    admin: &dyn StreamAdmin,
    stream: &str,
    spec: &ConsumerSpec,
) -> Result<ConsumerInfo, HarnessError> {
    match admin.consumer_info(stream, spec.name()).await? {
        Some(existing) => {
            let fields = spec.mismatches(&existing.config);
            if !fields.is_empty() {
                return Err(HarnessError::Conflict {
                    kind: EntityKind::Consumer,
                    name: spec.name().to_string(),
                    fields,
                });
            }
            info!(stream, consumer = spec.name(), "consumer already exists with matching configuration");
            Ok(existing)
        }
        None => {
            let created = admin.create_consumer(stream, spec).await?;
            info!(
                stream,
                consumer = %created.name,
                durability = %spec.durability(),
                "added stream consumer {} with subject filter: {}",
                created.name,
                created.config.filter_subject()
            );
            Ok(created)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RetentionPolicy;
    use crate::impls::InMemoryBroker;
    use std::time::Duration;

    fn stream(max_bytes: i64) -> StreamSpec {
        StreamSpec::builder("STREAM_NAME")
            .subject("some.subject")
            .retention(RetentionPolicy::WorkQueue)
            .max_bytes(max_bytes)
            .build()
            .unwrap()
    }

    fn consumer(ack_wait: Duration) -> ConsumerSpec {
        ConsumerSpec::durable("queue-consumer")
            .filter_subject("some.subject")
            .ack_wait(ack_wait)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn ensure_stream_twice_returns_same_descriptor() {
        let broker = InMemoryBroker::new();
        let first = ensure_stream(&broker, &stream(10_000_000_000)).await.unwrap();
        let second = ensure_stream(&broker, &stream(10_000_000_000)).await.unwrap();
        assert_eq!(first.config, second.config);
        assert_eq!(second.config.name(), "STREAM_NAME");
    }

    #[tokio::test]
    async fn ensure_stream_with_smaller_max_bytes_conflicts_and_keeps_original() {
        let broker = InMemoryBroker::new();
        ensure_stream(&broker, &stream(10_000_000_000)).await.unwrap();

        let err = ensure_stream(&broker, &stream(5_000_000_000)).await.unwrap_err();
        match err {
            HarnessError::Conflict { kind, fields, .. } => {
                assert_eq!(kind, EntityKind::Stream);
                assert_eq!(fields, vec!["max_bytes"]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let info = broker.stream_info("STREAM_NAME").await.unwrap().unwrap();
        assert_eq!(info.config.max_bytes(), 10_000_000_000);
    }

    #[tokio::test]
    async fn ensure_consumer_is_idempotent() {
        let broker = InMemoryBroker::new();
        ensure_stream(&broker, &stream(-1)).await.unwrap();
        let spec = consumer(Duration::from_secs(2));
        let a = ensure_consumer(&broker, "STREAM_NAME", &spec).await.unwrap();
        let b = ensure_consumer(&broker, "STREAM_NAME", &spec).await.unwrap();
        assert_eq!(a.config, b.config);
        assert_eq!(broker.list_consumers("STREAM_NAME").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_consumer_with_different_ack_wait_conflicts() {
        let broker = InMemoryBroker::new();
        ensure_stream(&broker, &stream(-1)).await.unwrap();
        ensure_consumer(&broker, "STREAM_NAME", &consumer(Duration::from_secs(2)))
            .await
            .unwrap();
        let err = ensure_consumer(&broker, "STREAM_NAME", &consumer(Duration::from_secs(9)))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn ensure_consumer_on_missing_stream_fails() {
        let broker = InMemoryBroker::new();
        let err = ensure_consumer(&broker, "NOPE", &consumer(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotFound { kind: EntityKind::Stream, .. }));
    }
}
