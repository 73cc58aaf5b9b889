//! Consumer descriptors.
//!
//! Durability is never inferred: callers pick [`Durability::Durable`] or
//! [`Durability::Ephemeral`] when they create the builder.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::subject;
use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Registered under a durable name; survives client disconnects.
    Durable,
    /// Reclaimed by the broker after the inactivity threshold.
    Ephemeral,
}

impl FromStr for Durability {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "durable" => Ok(Durability::Durable),
            "ephemeral" => Ok(Durability::Ephemeral),
            other => Err(HarnessError::InvalidConfig(format!(
                "durability must be `durable` or `ephemeral`, got `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Durability::Durable => f.write_str("durable"),
            Durability::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Every message must be acknowledged individually.
    Explicit,
    /// Delivery counts as acknowledgment.
    None,
    /// Acknowledging a message acknowledges everything before it.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    All,
    Last,
    New,
    LastPerSubject,
    ByStartSequence { start_sequence: u64 },
    /// Only ever observed on existing consumers; not accepted by the builder.
    ByStartTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// As fast as possible.
    Instant,
    /// At the rate the messages were originally published.
    Original,
}

/// A validated pull-consumer descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    pub(crate) name: String,
    pub(crate) durability: Durability,
    /// Empty means the whole stream.
    pub(crate) filter_subject: String,
    /// Zero means never reclaimed.
    pub(crate) inactive_threshold: Duration,
    pub(crate) ack_wait: Duration,
    pub(crate) ack_policy: AckPolicy,
    pub(crate) deliver_policy: DeliverPolicy,
    pub(crate) replay_policy: ReplayPolicy,
    /// `-1` means unlimited redeliveries.
    pub(crate) max_deliver: i64,
    pub(crate) description: Option<String>,
}

impl ConsumerSpec {
    pub fn durable(name: impl Into<String>) -> ConsumerSpecBuilder {
        ConsumerSpecBuilder::new(name.into(), Durability::Durable)
    }

    /// An ephemeral consumer; a unique name is generated when `name` is `None`.
    pub fn ephemeral(name: Option<String>) -> ConsumerSpecBuilder {
        let name = name.unwrap_or_else(|| format!("sluice-{}", Ulid::new().to_string().to_lowercase()));
        ConsumerSpecBuilder::new(name, Durability::Ephemeral)
    }

    pub fn builder(name: impl Into<String>, durability: Durability) -> ConsumerSpecBuilder {
        ConsumerSpecBuilder::new(name.into(), durability)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn filter_subject(&self) -> &str {
        &self.filter_subject
    }

    pub fn inactive_threshold(&self) -> Duration {
        self.inactive_threshold
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    pub fn deliver_policy(&self) -> DeliverPolicy {
        self.deliver_policy
    }

    pub fn replay_policy(&self) -> ReplayPolicy {
        self.replay_policy
    }

    pub fn max_deliver(&self) -> i64 {
        self.max_deliver
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Does this consumer's filter select messages on `subject`?
    pub fn selects(&self, subject: &str) -> bool {
        self.filter_subject.is_empty() || subject::matches(&self.filter_subject, subject)
    }

    /// Attributes of `existing` that differ from this (requested) descriptor.
    pub fn mismatches(&self, existing: &ConsumerSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name != existing.name {
            fields.push("name");
        }
        if self.durability != existing.durability {
            fields.push("durable_name");
        }
        if self.filter_subject != existing.filter_subject {
            fields.push("filter_subject");
        }
        if self.inactive_threshold != existing.inactive_threshold {
            fields.push("inactive_threshold");
        }
        if self.ack_wait != existing.ack_wait {
            fields.push("ack_wait");
        }
        if self.ack_policy != existing.ack_policy {
            fields.push("ack_policy");
        }
        if self.deliver_policy != existing.deliver_policy {
            fields.push("deliver_policy");
        }
        if self.replay_policy != existing.replay_policy {
            fields.push("replay_policy");
        }
        if self.max_deliver != existing.max_deliver {
            fields.push("max_deliver");
        }
        if self.description != existing.description {
            fields.push("description");
        }
        fields
    }
}

pub struct ConsumerSpecBuilder {
    spec: ConsumerSpec,
}

impl ConsumerSpecBuilder {
    fn new(name: String, durability: Durability) -> Self {
        Self {
            spec: ConsumerSpec {
                name,
                durability,
                filter_subject: String::new(),
                inactive_threshold: Duration::ZERO,
                ack_wait: Duration::from_secs(30),
                ack_policy: AckPolicy::Explicit,
                deliver_policy: DeliverPolicy::All,
                replay_policy: ReplayPolicy::Instant,
                max_deliver: -1,
                description: None,
            },
        }
    }

    pub fn filter_subject(mut self, subject: impl Into<String>) -> Self {
        self.spec.filter_subject = subject.into();
        self
    }

    pub fn inactive_threshold(mut self, threshold: Duration) -> Self {
        self.spec.inactive_threshold = threshold;
        self
    }

    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.spec.ack_wait = ack_wait;
        self
    }

    pub fn ack_policy(mut self, policy: AckPolicy) -> Self {
        self.spec.ack_policy = policy;
        self
    }

    pub fn deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.spec.deliver_policy = policy;
        self
    }

    pub fn replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.spec.replay_policy = policy;
        self
    }

    pub fn max_deliver(mut self, max_deliver: i64) -> Self {
        self.spec.max_deliver = max_deliver;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.spec.description = Some(description.into());
        self
    }

    pub fn build(self) -> Result<ConsumerSpec, HarnessError> {
        let spec = self.spec;
        if !subject::is_valid_name(&spec.name) {
            return Err(HarnessError::InvalidConfig(format!(
                "invalid consumer name `{}`",
                spec.name
            )));
        }
        if !spec.filter_subject.is_empty() && !subject::is_valid_pattern(&spec.filter_subject) {
            return Err(HarnessError::InvalidConfig(format!(
                "consumer `{}` has invalid filter subject `{}`",
                spec.name, spec.filter_subject
            )));
        }
        if spec.ack_wait.is_zero() {
            return Err(HarnessError::InvalidConfig("ack_wait must be positive".into()));
        }
        if spec.max_deliver == 0 || spec.max_deliver < -1 {
            return Err(HarnessError::InvalidConfig(format!(
                "max_deliver must be -1 (unlimited) or positive, got {}",
                spec.max_deliver
            )));
        }
        if spec.deliver_policy == DeliverPolicy::ByStartTime {
            return Err(HarnessError::InvalidConfig(
                "deliver_policy by_start_time is not supported".into(),
            ));
        }
        Ok(spec)
    }
}

/// The broker's view of a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub stream_name: String,
    pub name: String,
    pub config: ConsumerSpec,
    pub created: DateTime<Utc>,
    /// Messages matching the filter not yet delivered.
    pub num_pending: u64,
    /// Delivered but not yet acknowledged.
    pub num_ack_pending: usize,
    /// Highest stream sequence handed out.
    pub delivered_stream_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn queue_consumer() -> ConsumerSpecBuilder {
        ConsumerSpec::durable("queue-consumer")
            .filter_subject("some.subject")
            .inactive_threshold(Duration::from_secs(5))
            .ack_wait(Duration::from_secs(2))
            .description("queue consumer")
    }

    #[rstest]
    #[case("durable", Durability::Durable)]
    #[case("Ephemeral", Durability::Ephemeral)]
    fn durability_parses(#[case] input: &str, #[case] expected: Durability) {
        assert_eq!(input.parse::<Durability>().unwrap(), expected);
    }

    #[test]
    fn durability_rejects_unknown() {
        assert!("sometimes".parse::<Durability>().is_err());
    }

    #[test]
    fn ephemeral_without_name_gets_unique_name() {
        let a = ConsumerSpec::ephemeral(None).build().unwrap();
        let b = ConsumerSpec::ephemeral(None).build().unwrap();
        assert_ne!(a.name(), b.name());
        assert_eq!(a.durability(), Durability::Ephemeral);
    }

    #[rstest]
    #[case::zero_ack_wait(queue_consumer().ack_wait(Duration::ZERO))]
    #[case::bad_filter(queue_consumer().filter_subject("some..subject"))]
    #[case::zero_max_deliver(queue_consumer().max_deliver(0))]
    #[case::start_time(queue_consumer().deliver_policy(DeliverPolicy::ByStartTime))]
    fn builder_rejects_invalid(#[case] builder: ConsumerSpecBuilder) {
        assert!(matches!(builder.build(), Err(HarnessError::InvalidConfig(_))));
    }

    #[test]
    fn mismatches_report_changed_policies() {
        let requested = queue_consumer().build().unwrap();
        let existing = queue_consumer()
            .ack_wait(Duration::from_secs(30))
            .ack_policy(AckPolicy::All)
            .build()
            .unwrap();
        assert_eq!(requested.mismatches(&existing), vec!["ack_wait", "ack_policy"]);
        assert!(requested.mismatches(&requested.clone()).is_empty());
    }

    #[test]
    fn empty_filter_selects_everything() {
        let spec = ConsumerSpec::durable("c").build().unwrap();
        assert!(spec.selects("anything.at.all"));
        let filtered = queue_consumer().build().unwrap();
        assert!(filtered.selects("some.subject"));
        assert!(!filtered.selects("other.subject"));
    }
}
