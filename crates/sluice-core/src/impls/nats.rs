//! NatsBroker - the ports over a real JetStream server (async-nats)

use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::consumer::{self, pull};
use async_nats::jetstream::context::GetStreamErrorKind;
use async_nats::jetstream::stream;
use async_nats::jetstream::{self, ErrorCode};
use async_nats::{ConnectOptions, Event, ServerAddr};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::domain::{
    AckPolicy, ConnectSpec, ConsumerInfo, ConsumerSpec, DeliverPolicy, DiscardPolicy, Durability,
    PublishAck, ReceivedMessage, ReplayPolicy, RetentionPolicy, StorageType, StreamInfo,
    StreamSpec, StreamState,
};
use crate::error::HarnessError;
use crate::ports::{Delivery, MessageBus, PullSubscription, StreamAdmin};

/// A JetStream context over one client connection.
///
/// Implements [`StreamAdmin`] (the management handle) and [`MessageBus`]
/// (the data-plane handle) over the same connection.
pub struct NatsBroker {
    context: jetstream::Context,
}

impl NatsBroker {
    /// Connect according to `spec`, logging the server actually reached.
    pub async fn connect(spec: &ConnectSpec) -> Result<Self, HarnessError> {
        let servers = spec
            .servers()
            .iter()
            .map(|s| {
                s.parse::<ServerAddr>().map_err(|e| {
                    HarnessError::InvalidConfig(format!("bad server address `{s}`: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let delay = spec.reconnect_time_wait();
        // The client has no switch to turn reconnection off; a single attempt is the closest.
        let max_reconnects = if spec.reconnect() {
            spec.max_reconnect_attempts()
        } else {
            1
        };

        let mut options = ConnectOptions::new()
            .connection_timeout(spec.timeout())
            .max_reconnects(max_reconnects)
            .reconnect_delay_callback(move |_attempts| delay)
            .event_callback(|event| async move {
                match event {
                    Event::Connected => info!("broker connection established"),
                    Event::Disconnected => warn!("broker connection lost"),
                    other => debug!(event = %other, "broker connection event"),
                }
            });
        if spec.wait_on_first_connect() {
            options = options.retry_on_initial_connect();
        }

        let client = options
            .connect(servers.as_slice())
            .await
            .map_err(|e| HarnessError::Connection(e.to_string()))?;

        if spec.wait_on_first_connect() {
            wait_until_connected(&client, spec.timeout()).await?;
        }

        let server = client.server_info();
        info!(host = %server.host, port = server.port, name = %server.server_name, "connected to {}:{}", server.host, server.port);

        Ok(Self {
            context: jetstream::new(client),
        })
    }

    async fn stream(&self, name: &str) -> Result<jetstream::stream::Stream, HarnessError> {
        match self.context.get_stream(name).await {
            Ok(stream) => Ok(stream),
            Err(err) => match err.kind() {
                GetStreamErrorKind::JetStream(js) if js.error_code() == ErrorCode::STREAM_NOT_FOUND => {
                    Err(HarnessError::stream_not_found(name))
                }
                _ => Err(HarnessError::Broker(err.to_string())),
            },
        }
    }

    async fn pull_consumer(
        &self,
        stream: &str,
        name: &str,
    ) -> Result<Option<consumer::Consumer<pull::Config>>, HarnessError> {
        let stream = self.stream(stream).await?;
        match stream.get_consumer::<pull::Config>(name).await {
            Ok(consumer) => Ok(Some(consumer)),
            Err(err) if is_consumer_not_found(err.as_ref()) => Ok(None),
            Err(err) => Err(HarnessError::Broker(err.to_string())),
        }
    }
}

/// `get_consumer` hands back a boxed error; the API error is either the
/// boxed value itself or only survives in its rendered text.
fn is_consumer_not_found(err: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    match err.downcast_ref::<jetstream::Error>() {
        Some(js) => js.error_code() == ErrorCode::CONSUMER_NOT_FOUND,
        None => err.to_string().contains("error code 10014"),
    }
}

/// Poll until the background connector reports a live connection.
async fn wait_until_connected(
    client: &async_nats::Client,
    timeout: Duration,
) -> Result<(), HarnessError> {
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    tokio::time::timeout(timeout, async {
        loop {
            ticker.tick().await;
            if client.connection_state() == State::Connected {
                return;
            }
        }
    })
    .await
    .map_err(|_| {
        HarnessError::Connection(format!("no server reachable within {}ms", timeout.as_millis()))
    })
}

#[async_trait]
impl StreamAdmin for NatsBroker {
    async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, HarnessError> {
        match self.stream(name).await {
            Ok(stream) => Ok(Some(stream_info_from(stream.cached_info()))),
            Err(HarnessError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, HarnessError> {
        let stream = self
            .context
            .create_stream(stream_config_from(spec))
            .await
            .map_err(|e| HarnessError::Broker(e.to_string()))?;
        Ok(stream_info_from(stream.cached_info()))
    }

    async fn consumer_info(
        &self,
        stream: &str,
        name: &str,
    ) -> Result<Option<ConsumerInfo>, HarnessError> {
        Ok(self
            .pull_consumer(stream, name)
            .await?
            .map(|c| consumer_info_from(c.cached_info())))
    }

    async fn create_consumer(
        &self,
        stream: &str,
        spec: &ConsumerSpec,
    ) -> Result<ConsumerInfo, HarnessError> {
        let stream = self.stream(stream).await?;
        let consumer = stream
            .create_consumer(pull_config_from(spec)?)
            .await
            .map_err(|e| HarnessError::Broker(e.to_string()))?;
        Ok(consumer_info_from(consumer.cached_info()))
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<ConsumerInfo>, HarnessError> {
        let stream = self.stream(stream).await?;
        let infos: Vec<consumer::Info> = stream
            .consumers()
            .try_collect()
            .await
            .map_err(|e| HarnessError::Broker(e.to_string()))?;
        Ok(infos.iter().map(consumer_info_from).collect())
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, HarnessError> {
        let stream = self.stream(stream).await?;
        let status = stream
            .delete_consumer(name)
            .await
            .map_err(|e| HarnessError::Broker(e.to_string()))?;
        Ok(status.success)
    }
}

#[async_trait]
impl MessageBus for NatsBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, HarnessError> {
        let ack = self
            .context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| HarnessError::Publish(e.to_string()))?
            .await
            .map_err(|e| HarnessError::Publish(e.to_string()))?;
        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    async fn pull_subscribe(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Box<dyn PullSubscription>, HarnessError> {
        let consumer = self
            .pull_consumer(stream, consumer)
            .await?
            .ok_or_else(|| HarnessError::consumer_not_found(consumer))?;
        Ok(Box::new(NatsPullSubscription { consumer }))
    }
}

struct NatsPullSubscription {
    consumer: consumer::Consumer<pull::Config>,
}

#[async_trait]
impl PullSubscription for NatsPullSubscription {
    async fn fetch(
        &mut self,
        batch: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, HarnessError> {
        let mut messages = self
            .consumer
            .batch()
            .max_messages(batch.max(1))
            .expires(expires)
            .messages()
            .await
            .map_err(|e| HarnessError::Pull(e.to_string()))?;

        let mut out: Vec<Box<dyn Delivery>> = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| HarnessError::Pull(e.to_string()))?;
            out.push(Box::new(NatsDelivery::new(message)?));
        }
        Ok(out)
    }

    async fn info(&mut self) -> Result<ConsumerInfo, HarnessError> {
        let info = self
            .consumer
            .info()
            .await
            .map_err(|e| HarnessError::Broker(e.to_string()))?;
        Ok(consumer_info_from(info))
    }
}

struct NatsDelivery {
    message: ReceivedMessage,
    inner: jetstream::Message,
}

impl NatsDelivery {
    fn new(inner: jetstream::Message) -> Result<Self, HarnessError> {
        let (stream_sequence, delivered) = {
            let info = inner
                .info()
                .map_err(|e| HarnessError::Pull(format!("bad delivery metadata: {e}")))?;
            (info.stream_sequence, info.delivered.max(0) as u64)
        };
        let message = ReceivedMessage {
            subject: inner.subject.to_string(),
            payload: inner.payload.to_vec(),
            stream_sequence,
            delivered,
        };
        Ok(Self { message, inner })
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), HarnessError> {
        self.inner
            .ack()
            .await
            .map_err(|e| HarnessError::Ack(e.to_string()))
    }
}

// ========================================
// Descriptor conversions
// ========================================

fn stream_config_from(spec: &StreamSpec) -> stream::Config {
    stream::Config {
        name: spec.name().to_string(),
        subjects: spec.subjects().to_vec(),
        retention: match spec.retention() {
            RetentionPolicy::Limits => stream::RetentionPolicy::Limits,
            RetentionPolicy::Interest => stream::RetentionPolicy::Interest,
            RetentionPolicy::WorkQueue => stream::RetentionPolicy::WorkQueue,
        },
        discard: match spec.discard() {
            DiscardPolicy::Old => stream::DiscardPolicy::Old,
            DiscardPolicy::New => stream::DiscardPolicy::New,
        },
        storage: match spec.storage() {
            StorageType::File => stream::StorageType::File,
            StorageType::Memory => stream::StorageType::Memory,
        },
        num_replicas: spec.replicas(),
        max_bytes: spec.max_bytes(),
        max_age: spec.max_age(),
        ..Default::default()
    }
}

fn stream_spec_from(config: &stream::Config) -> StreamSpec {
    StreamSpec {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        retention: match config.retention {
            stream::RetentionPolicy::Limits => RetentionPolicy::Limits,
            stream::RetentionPolicy::Interest => RetentionPolicy::Interest,
            stream::RetentionPolicy::WorkQueue => RetentionPolicy::WorkQueue,
        },
        discard: match config.discard {
            stream::DiscardPolicy::Old => DiscardPolicy::Old,
            stream::DiscardPolicy::New => DiscardPolicy::New,
        },
        storage: match config.storage {
            stream::StorageType::File => StorageType::File,
            stream::StorageType::Memory => StorageType::Memory,
        },
        replicas: config.num_replicas,
        max_bytes: config.max_bytes,
        max_age: config.max_age,
    }
}

fn stream_info_from(info: &stream::Info) -> StreamInfo {
    StreamInfo {
        config: stream_spec_from(&info.config),
        created: DateTime::<Utc>::from_timestamp(info.created.unix_timestamp(), info.created.nanosecond())
            .unwrap_or_default(),
        state: StreamState {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_seq: info.state.first_sequence,
            last_seq: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        },
    }
}

fn pull_config_from(spec: &ConsumerSpec) -> Result<pull::Config, HarnessError> {
    let durable_name = match spec.durability() {
        Durability::Durable => Some(spec.name().to_string()),
        Durability::Ephemeral => None,
    };
    let deliver_policy = match spec.deliver_policy() {
        DeliverPolicy::All => consumer::DeliverPolicy::All,
        DeliverPolicy::Last => consumer::DeliverPolicy::Last,
        DeliverPolicy::New => consumer::DeliverPolicy::New,
        DeliverPolicy::LastPerSubject => consumer::DeliverPolicy::LastPerSubject,
        DeliverPolicy::ByStartSequence { start_sequence } => {
            consumer::DeliverPolicy::ByStartSequence { start_sequence }
        }
        DeliverPolicy::ByStartTime => {
            return Err(HarnessError::InvalidConfig(format!(
                "consumer `{}`: deliver_policy by_start_time cannot be declared",
                spec.name()
            )));
        }
    };
    Ok(pull::Config {
        durable_name,
        name: Some(spec.name().to_string()),
        description: spec.description().map(str::to_string),
        filter_subject: spec.filter_subject().to_string(),
        inactive_threshold: spec.inactive_threshold(),
        ack_wait: spec.ack_wait(),
        max_deliver: spec.max_deliver(),
        ack_policy: match spec.ack_policy() {
            AckPolicy::Explicit => consumer::AckPolicy::Explicit,
            AckPolicy::None => consumer::AckPolicy::None,
            AckPolicy::All => consumer::AckPolicy::All,
        },
        deliver_policy,
        replay_policy: match spec.replay_policy() {
            ReplayPolicy::Instant => consumer::ReplayPolicy::Instant,
            ReplayPolicy::Original => consumer::ReplayPolicy::Original,
        },
        ..Default::default()
    })
}

fn consumer_spec_from(name: &str, config: &consumer::Config) -> ConsumerSpec {
    ConsumerSpec {
        name: name.to_string(),
        durability: if config.durable_name.is_some() {
            Durability::Durable
        } else {
            Durability::Ephemeral
        },
        filter_subject: config.filter_subject.clone(),
        inactive_threshold: config.inactive_threshold,
        ack_wait: config.ack_wait,
        ack_policy: match config.ack_policy {
            consumer::AckPolicy::Explicit => AckPolicy::Explicit,
            consumer::AckPolicy::None => AckPolicy::None,
            consumer::AckPolicy::All => AckPolicy::All,
        },
        deliver_policy: match config.deliver_policy {
            consumer::DeliverPolicy::All => DeliverPolicy::All,
            consumer::DeliverPolicy::Last => DeliverPolicy::Last,
            consumer::DeliverPolicy::New => DeliverPolicy::New,
            consumer::DeliverPolicy::LastPerSubject => DeliverPolicy::LastPerSubject,
            consumer::DeliverPolicy::ByStartSequence { start_sequence } => {
                DeliverPolicy::ByStartSequence { start_sequence }
            }
            consumer::DeliverPolicy::ByStartTime { .. } => DeliverPolicy::ByStartTime,
        },
        replay_policy: match config.replay_policy {
            consumer::ReplayPolicy::Instant => ReplayPolicy::Instant,
            consumer::ReplayPolicy::Original => ReplayPolicy::Original,
        },
        max_deliver: config.max_deliver,
        description: config.description.clone(),
    }
}

fn consumer_info_from(info: &consumer::Info) -> ConsumerInfo {
    ConsumerInfo {
        stream_name: info.stream_name.clone(),
        name: info.name.clone(),
        config: consumer_spec_from(&info.name, &info.config),
        created: DateTime::<Utc>::from_timestamp(info.created.unix_timestamp(), info.created.nanosecond())
            .unwrap_or_default(),
        num_pending: info.num_pending,
        num_ack_pending: info.num_ack_pending,
        delivered_stream_seq: info.delivered.stream_sequence,
    }
}
