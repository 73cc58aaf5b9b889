//! InMemoryBroker - in-process stand-in for a JetStream server
//!
//! Covers exactly what the harness relies on:
//! - streams capturing subjects (with `*` / `>` wildcards)
//! - limits / interest / work-queue retention, max_bytes with discard old/new, max_age
//! - pull consumers with explicit/all/none ack and ack-wait redelivery
//! - ephemeral consumers reclaimed after their inactivity threshold
//! - a record of every delete-consumer call
//!
//! Time comes from `tokio::time::Instant`, so tests can pause and advance it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{
    AckPolicy, ConsumerInfo, ConsumerSpec, DeliverPolicy, DiscardPolicy, Durability, PublishAck,
    ReceivedMessage, RetentionPolicy, StreamInfo, StreamSpec, StreamState,
};
use crate::error::{EntityKind, HarnessError};
use crate::ports::{Delivery, MessageBus, PullSubscription, StreamAdmin};

struct StoredMessage {
    subject: String,
    payload: Vec<u8>,
    stored_at: Instant,
}

/// Delivered, not yet acknowledged.
struct PendingAck {
    deliveries: u32,
    deadline: Instant,
}

struct ConsumerEntry {
    spec: ConsumerSpec,
    created: DateTime<Utc>,
    /// Next stream sequence to consider for first delivery.
    next_seq: u64,
    pending: BTreeMap<u64, PendingAck>,
    /// Acknowledged sequences still present in the stream (interest retention).
    acked: BTreeSet<u64>,
    last_active: Instant,
    /// Expiry of the latest pull request; a waiting pull counts as activity.
    pull_expires: Option<Instant>,
}

impl ConsumerEntry {
    fn is_reclaimable(&self, now: Instant) -> bool {
        let idle_since = self
            .pull_expires
            .map_or(self.last_active, |at| at.max(self.last_active));
        self.spec.durability == Durability::Ephemeral
            && !self.spec.inactive_threshold.is_zero()
            && now.saturating_duration_since(idle_since) >= self.spec.inactive_threshold
    }
}

/// One message handed out by `take_batch`.
struct Handout {
    seq: u64,
    deliveries: u32,
    subject: String,
    payload: Vec<u8>,
}

struct StreamEntry {
    spec: StreamSpec,
    created: DateTime<Utc>,
    messages: BTreeMap<u64, StoredMessage>,
    last_seq: u64,
    bytes: u64,
    consumers: BTreeMap<String, ConsumerEntry>,
}

impl StreamEntry {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            created: Utc::now(),
            messages: BTreeMap::new(),
            last_seq: 0,
            bytes: 0,
            consumers: BTreeMap::new(),
        }
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.spec.clone(),
            created: self.created,
            state: StreamState {
                messages: self.messages.len() as u64,
                bytes: self.bytes,
                first_seq: self
                    .messages
                    .keys()
                    .next()
                    .copied()
                    .unwrap_or(self.last_seq + 1),
                last_seq: self.last_seq,
                consumer_count: self.consumers.len(),
            },
        }
    }

    fn consumer_info(&self, name: &str) -> Option<ConsumerInfo> {
        let entry = self.consumers.get(name)?;
        let num_pending = self
            .messages
            .range(entry.next_seq..)
            .filter(|(_, m)| entry.spec.selects(&m.subject))
            .count() as u64;
        Some(ConsumerInfo {
            stream_name: self.spec.name.clone(),
            name: name.to_string(),
            config: entry.spec.clone(),
            created: entry.created,
            num_pending,
            num_ack_pending: entry.pending.len(),
            delivered_stream_seq: entry.next_seq.saturating_sub(1),
        })
    }

    fn remove_message(&mut self, seq: u64) {
        if let Some(msg) = self.messages.remove(&seq) {
            self.bytes -= msg.payload.len() as u64;
        }
        for consumer in self.consumers.values_mut() {
            consumer.pending.remove(&seq);
            consumer.acked.remove(&seq);
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        if self.spec.max_age.is_zero() {
            return;
        }
        let max_age = self.spec.max_age;
        let expired: Vec<u64> = self
            .messages
            .iter()
            .take_while(|(_, m)| now.duration_since(m.stored_at) >= max_age)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired {
            self.remove_message(seq);
        }
    }

    fn append(&mut self, subject: &str, payload: Vec<u8>, now: Instant) -> Result<u64, HarnessError> {
        // Interest retention keeps nothing nobody is listening for.
        if self.spec.retention == RetentionPolicy::Interest
            && !self.consumers.values().any(|c| c.spec.selects(subject))
        {
            self.last_seq += 1;
            return Ok(self.last_seq);
        }

        let len = payload.len() as u64;
        if self.spec.max_bytes > 0 {
            let max = self.spec.max_bytes as u64;
            if len > max {
                return Err(HarnessError::Publish(format!(
                    "message of {len} bytes exceeds max_bytes of stream `{}`",
                    self.spec.name
                )));
            }
            while self.bytes + len > max {
                match self.spec.discard {
                    DiscardPolicy::New => {
                        return Err(HarnessError::Publish(format!(
                            "maximum bytes exceeded on stream `{}`",
                            self.spec.name
                        )));
                    }
                    DiscardPolicy::Old => {
                        let Some(oldest) = self.messages.keys().next().copied() else {
                            break;
                        };
                        self.remove_message(oldest);
                    }
                }
            }
        }

        self.last_seq += 1;
        let seq = self.last_seq;
        self.bytes += len;
        self.messages.insert(
            seq,
            StoredMessage {
                subject: subject.to_string(),
                payload,
                stored_at: now,
            },
        );
        Ok(seq)
    }

    /// The stream sequence a new consumer starts from.
    fn start_seq(&self, policy: DeliverPolicy) -> u64 {
        let last_stored = self.messages.keys().next_back().copied();
        match policy {
            DeliverPolicy::All | DeliverPolicy::ByStartTime => 1,
            DeliverPolicy::New => self.last_seq + 1,
            DeliverPolicy::Last | DeliverPolicy::LastPerSubject => {
                last_stored.unwrap_or(self.last_seq + 1)
            }
            DeliverPolicy::ByStartSequence { start_sequence } => start_sequence,
        }
    }

    fn hold_pull(&mut self, consumer: &str, expires: Instant) -> Result<(), HarnessError> {
        let entry = self
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| HarnessError::consumer_not_found(consumer))?;
        entry.pull_expires = Some(expires);
        Ok(())
    }

    /// Expired pending messages first (redelivery), then new ones in stream order.
    fn take_batch(
        &mut self,
        consumer: &str,
        max: usize,
        now: Instant,
    ) -> Result<Vec<Handout>, HarnessError> {
        let messages = &self.messages;
        let entry = self
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| HarnessError::consumer_not_found(consumer))?;
        entry.last_active = now;

        let ack_wait = entry.spec.ack_wait;
        let max_deliver = entry.spec.max_deliver;
        let mut out = Vec::new();

        let due: Vec<u64> = entry
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in due {
            if out.len() >= max {
                break;
            }
            let Some(msg) = messages.get(&seq) else {
                entry.pending.remove(&seq);
                continue;
            };
            let Some(pending) = entry.pending.get_mut(&seq) else {
                continue;
            };
            if max_deliver > 0 && i64::from(pending.deliveries) >= max_deliver {
                entry.pending.remove(&seq);
                continue;
            }
            pending.deliveries += 1;
            pending.deadline = now + ack_wait;
            out.push(Handout {
                seq,
                deliveries: pending.deliveries,
                subject: msg.subject.clone(),
                payload: msg.payload.clone(),
            });
        }

        let mut scanned_to = entry.next_seq;
        for (seq, msg) in messages.range(entry.next_seq..) {
            if out.len() >= max {
                break;
            }
            scanned_to = seq + 1;
            if !entry.spec.selects(&msg.subject) {
                continue;
            }
            if entry.spec.ack_policy != AckPolicy::None {
                entry.pending.insert(
                    *seq,
                    PendingAck {
                        deliveries: 1,
                        deadline: now + ack_wait,
                    },
                );
            }
            out.push(Handout {
                seq: *seq,
                deliveries: 1,
                subject: msg.subject.clone(),
                payload: msg.payload.clone(),
            });
        }
        entry.next_seq = entry.next_seq.max(scanned_to);

        if entry.spec.ack_policy == AckPolicy::None {
            let delivered: Vec<u64> = out.iter().map(|h| h.seq).collect();
            for seq in delivered {
                self.settle(consumer, seq);
            }
        }
        Ok(out)
    }

    /// Earliest ack-wait deadline among this consumer's pending messages.
    fn next_redelivery(&self, consumer: &str) -> Option<Instant> {
        self.consumers
            .get(consumer)?
            .pending
            .values()
            .map(|p| p.deadline)
            .min()
    }

    /// Acks address the stream sequence, so a late ack still settles a redelivered message.
    fn ack(&mut self, consumer: &str, seq: u64) -> Result<(), HarnessError> {
        let entry = self.consumers.get_mut(consumer).ok_or_else(|| {
            HarnessError::Ack(format!("consumer `{consumer}` no longer exists"))
        })?;

        let acked: Vec<u64> = match entry.spec.ack_policy {
            AckPolicy::None => return Ok(()),
            AckPolicy::All => entry.pending.range(..=seq).map(|(s, _)| *s).collect(),
            AckPolicy::Explicit if entry.pending.contains_key(&seq) => vec![seq],
            AckPolicy::Explicit => {
                debug!(consumer, seq, "ack for a message that is no longer pending");
                return Ok(());
            }
        };
        for seq in &acked {
            entry.pending.remove(seq);
        }
        for seq in acked {
            self.settle(consumer, seq);
        }
        Ok(())
    }

    /// Apply retention after `consumer` is done with `seq`.
    fn settle(&mut self, consumer: &str, seq: u64) {
        match self.spec.retention {
            RetentionPolicy::Limits => {}
            RetentionPolicy::WorkQueue => self.remove_message(seq),
            RetentionPolicy::Interest => {
                if let Some(entry) = self.consumers.get_mut(consumer) {
                    entry.acked.insert(seq);
                }
                let Some(subject) = self.messages.get(&seq).map(|m| m.subject.clone()) else {
                    return;
                };
                let everyone_acked = self
                    .consumers
                    .values()
                    .filter(|c| c.spec.selects(&subject))
                    .all(|c| c.acked.contains(&seq));
                if everyone_acked {
                    self.remove_message(seq);
                }
            }
        }
    }
}

#[derive(Default)]
struct BrokerState {
    streams: BTreeMap<String, StreamEntry>,
    delete_calls: Vec<(String, String)>,
}

impl BrokerState {
    /// Housekeeping run before every call: age limits and idle ephemeral consumers.
    fn tick(&mut self, now: Instant) {
        for stream in self.streams.values_mut() {
            stream.purge_expired(now);
            stream.consumers.retain(|name, consumer| {
                let reclaim = consumer.is_reclaimable(now);
                if reclaim {
                    debug!(consumer = %name, "reclaiming inactive ephemeral consumer");
                }
                !reclaim
            });
        }
    }

    fn stream_mut(&mut self, name: &str) -> Result<&mut StreamEntry, HarnessError> {
        self.streams
            .get_mut(name)
            .ok_or_else(|| HarnessError::stream_not_found(name))
    }
}

/// In-process broker implementing both the management and the data-plane ports.
///
/// # Example
/// ```ignore
/// let broker = Arc::new(InMemoryBroker::new());
/// let harness = Harness::new(broker.clone(), broker.clone());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(stream, consumer)` pair a delete was requested for, in call order.
    pub async fn delete_calls(&self) -> Vec<(String, String)> {
        self.state.lock().await.delete_calls.clone()
    }

    /// Stored payloads of a stream in sequence order.
    pub async fn stored_payloads(&self, stream: &str) -> Result<Vec<Vec<u8>>, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        let stream = state.stream_mut(stream)?;
        Ok(stream.messages.values().map(|m| m.payload.clone()).collect())
    }
}

#[async_trait]
impl StreamAdmin for InMemoryBroker {
    async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        Ok(state.streams.get(name).map(StreamEntry::info))
    }

    async fn create_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());

        if let Some(existing) = state.streams.get(spec.name()) {
            let fields = spec.mismatches(&existing.spec);
            if fields.is_empty() {
                return Ok(existing.info());
            }
            return Err(HarnessError::Conflict {
                kind: EntityKind::Stream,
                name: spec.name().to_string(),
                fields,
            });
        }

        for other in state.streams.values() {
            let overlap = spec
                .subjects()
                .iter()
                .find(|s| other.spec.subjects().contains(s));
            if let Some(subject) = overlap {
                return Err(HarnessError::Broker(format!(
                    "subject `{subject}` overlaps with stream `{}`",
                    other.spec.name()
                )));
            }
        }

        let entry = StreamEntry::new(spec.clone());
        let info = entry.info();
        state.streams.insert(spec.name().to_string(), entry);
        Ok(info)
    }

    async fn consumer_info(
        &self,
        stream: &str,
        name: &str,
    ) -> Result<Option<ConsumerInfo>, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        let stream = state.stream_mut(stream)?;
        Ok(stream.consumer_info(name))
    }

    async fn create_consumer(
        &self,
        stream: &str,
        spec: &ConsumerSpec,
    ) -> Result<ConsumerInfo, HarnessError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.tick(now);
        let entry = state.stream_mut(stream)?;

        if let Some(existing) = entry.consumers.get(spec.name()) {
            let fields = spec.mismatches(&existing.spec);
            if !fields.is_empty() {
                return Err(HarnessError::Conflict {
                    kind: EntityKind::Consumer,
                    name: spec.name().to_string(),
                    fields,
                });
            }
        } else {
            if entry.spec.retention == RetentionPolicy::WorkQueue {
                let clash = entry.consumers.values().any(|c| {
                    c.spec.filter_subject().is_empty()
                        || spec.filter_subject().is_empty()
                        || c.spec.filter_subject() == spec.filter_subject()
                });
                if clash {
                    return Err(HarnessError::Broker(format!(
                        "filtered consumer not unique on work-queue stream `{stream}`"
                    )));
                }
            }
            let start = entry.start_seq(spec.deliver_policy());
            entry.consumers.insert(
                spec.name().to_string(),
                ConsumerEntry {
                    spec: spec.clone(),
                    created: Utc::now(),
                    next_seq: start,
                    pending: BTreeMap::new(),
                    acked: BTreeSet::new(),
                    last_active: now,
                    pull_expires: None,
                },
            );
        }

        entry
            .consumer_info(spec.name())
            .ok_or_else(|| HarnessError::consumer_not_found(spec.name()))
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<ConsumerInfo>, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        let stream = state.stream_mut(stream)?;
        Ok(stream
            .consumers
            .keys()
            .filter_map(|name| stream.consumer_info(name))
            .collect())
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        state
            .delete_calls
            .push((stream.to_string(), name.to_string()));
        let stream_entry = state.stream_mut(stream)?;
        if stream_entry.consumers.remove(name).is_none() {
            return Err(HarnessError::consumer_not_found(name));
        }
        Ok(true)
    }
}

#[async_trait]
impl MessageBus for InMemoryBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, HarnessError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.tick(now);

        let stream = state
            .streams
            .values_mut()
            .find(|s| s.spec.captures(subject))
            .ok_or_else(|| {
                HarnessError::Publish(format!("no stream captures subject `{subject}`"))
            })?;
        let sequence = stream.append(subject, payload, now)?;
        let ack = PublishAck {
            stream: stream.spec.name().to_string(),
            sequence,
            duplicate: false,
        };

        drop(state);
        self.notify.notify_one();
        Ok(ack)
    }

    async fn pull_subscribe(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Box<dyn PullSubscription>, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        let entry = state.stream_mut(stream)?;
        if !entry.consumers.contains_key(consumer) {
            return Err(HarnessError::consumer_not_found(consumer));
        }
        Ok(Box::new(InMemoryPullSubscription {
            stream: stream.to_string(),
            consumer: consumer.to_string(),
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
        }))
    }
}

struct InMemoryPullSubscription {
    stream: String,
    consumer: String,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl PullSubscription for InMemoryPullSubscription {
    async fn fetch(
        &mut self,
        batch: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, HarnessError> {
        let deadline = Instant::now() + expires;
        let mut registered = false;
        loop {
            let next_redelivery = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                state.tick(now);
                let stream = state.stream_mut(&self.stream)?;
                if !registered {
                    stream.hold_pull(&self.consumer, deadline)?;
                    registered = true;
                }
                let handouts = stream.take_batch(&self.consumer, batch.max(1), now)?;
                if !handouts.is_empty() {
                    return Ok(handouts
                        .into_iter()
                        .map(|h| {
                            Box::new(InMemoryDelivery {
                                stream: self.stream.clone(),
                                consumer: self.consumer.clone(),
                                seq: h.seq,
                                message: ReceivedMessage {
                                    subject: h.subject,
                                    payload: h.payload,
                                    stream_sequence: h.seq,
                                    delivered: u64::from(h.deliveries),
                                },
                                state: Arc::clone(&self.state),
                            }) as Box<dyn Delivery>
                        })
                        .collect());
                }
                stream.next_redelivery(&self.consumer)
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake = next_redelivery.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(wake) => {},
            }
        }
    }

    async fn info(&mut self) -> Result<ConsumerInfo, HarnessError> {
        let mut state = self.state.lock().await;
        state.tick(Instant::now());
        let stream = state.stream_mut(&self.stream)?;
        stream
            .consumer_info(&self.consumer)
            .ok_or_else(|| HarnessError::consumer_not_found(&self.consumer))
    }
}

struct InMemoryDelivery {
    stream: String,
    consumer: String,
    seq: u64,
    message: ReceivedMessage,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), HarnessError> {
        let mut state = self.state.lock().await;
        let stream = state
            .streams
            .get_mut(&self.stream)
            .ok_or_else(|| HarnessError::Ack(format!("stream `{}` no longer exists", self.stream)))?;
        stream.ack(&self.consumer, self.seq)
    }
}
