//! Stream descriptors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subject;
use crate::error::HarnessError;

/// When the broker drops messages from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep until size/age limits are hit.
    Limits,
    /// Keep while at least one consumer has not acknowledged.
    Interest,
    /// Remove as soon as the consumer acknowledges.
    WorkQueue,
}

/// What the broker does when a stream is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    /// Drop the oldest messages to make room.
    Old,
    /// Reject the new message.
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    File,
    Memory,
}

/// A validated stream descriptor.
///
/// Built with [`StreamSpec::builder`]; defaults are the broker's own
/// (limits retention, discard old, file storage, one replica, unbounded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub(crate) name: String,
    pub(crate) subjects: Vec<String>,
    pub(crate) retention: RetentionPolicy,
    pub(crate) discard: DiscardPolicy,
    pub(crate) storage: StorageType,
    pub(crate) replicas: usize,
    /// `-1` means unbounded.
    pub(crate) max_bytes: i64,
    /// Zero means unbounded.
    pub(crate) max_age: Duration,
}

impl StreamSpec {
    pub fn builder(name: impl Into<String>) -> StreamSpecBuilder {
        StreamSpecBuilder {
            spec: StreamSpec {
                name: name.into(),
                subjects: Vec::new(),
                retention: RetentionPolicy::Limits,
                discard: DiscardPolicy::Old,
                storage: StorageType::File,
                replicas: 1,
                max_bytes: -1,
                max_age: Duration::ZERO,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn discard(&self) -> DiscardPolicy {
        self.discard
    }

    pub fn storage(&self) -> StorageType {
        self.storage
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn max_bytes(&self) -> i64 {
        self.max_bytes
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Does this stream capture messages published to `subject`?
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects.iter().any(|p| subject::matches(p, subject))
    }

    /// Attributes of `existing` that differ from this (requested) descriptor.
    ///
    /// An empty result means re-declaring this stream is a no-op.
    pub fn mismatches(&self, existing: &StreamSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name != existing.name {
            fields.push("name");
        }
        if self.subjects != existing.subjects {
            fields.push("subjects");
        }
        if self.retention != existing.retention {
            fields.push("retention");
        }
        if self.discard != existing.discard {
            fields.push("discard");
        }
        if self.storage != existing.storage {
            fields.push("storage");
        }
        if self.replicas != existing.replicas {
            fields.push("num_replicas");
        }
        if self.max_bytes != existing.max_bytes {
            fields.push("max_bytes");
        }
        if self.max_age != existing.max_age {
            fields.push("max_age");
        }
        fields
    }
}

pub struct StreamSpecBuilder {
    spec: StreamSpec,
}

impl StreamSpecBuilder {
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.spec.subjects.push(subject.into());
        self
    }

    pub fn subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.spec.retention = retention;
        self
    }

    pub fn discard(mut self, discard: DiscardPolicy) -> Self {
        self.spec.discard = discard;
        self
    }

    pub fn storage(mut self, storage: StorageType) -> Self {
        self.spec.storage = storage;
        self
    }

    pub fn replicas(mut self, replicas: usize) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn max_bytes(mut self, max_bytes: i64) -> Self {
        self.spec.max_bytes = max_bytes;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.spec.max_age = max_age;
        self
    }

    pub fn build(self) -> Result<StreamSpec, HarnessError> {
        let spec = self.spec;
        if !subject::is_valid_name(&spec.name) {
            return Err(HarnessError::InvalidConfig(format!(
                "invalid stream name `{}`",
                spec.name
            )));
        }
        if spec.subjects.is_empty() {
            return Err(HarnessError::InvalidConfig(format!(
                "stream `{}` needs at least one subject",
                spec.name
            )));
        }
        if let Some(bad) = spec.subjects.iter().find(|s| !subject::is_valid_pattern(s)) {
            return Err(HarnessError::InvalidConfig(format!(
                "stream `{}` has invalid subject `{bad}`",
                spec.name
            )));
        }
        if spec.replicas == 0 {
            return Err(HarnessError::InvalidConfig(
                "num_replicas must be at least 1".into(),
            ));
        }
        if spec.max_bytes == 0 || spec.max_bytes < -1 {
            return Err(HarnessError::InvalidConfig(format!(
                "max_bytes must be -1 (unbounded) or positive, got {}",
                spec.max_bytes
            )));
        }
        Ok(spec)
    }
}

/// Counters the broker reports for a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

/// The broker's view of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub config: StreamSpec,
    pub created: DateTime<Utc>,
    pub state: StreamState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn work_queue(max_bytes: i64) -> StreamSpec {
        StreamSpec::builder("STREAM_NAME")
            .subject("some.subject")
            .retention(RetentionPolicy::WorkQueue)
            .max_bytes(max_bytes)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_applies_broker_defaults() {
        let spec = StreamSpec::builder("S").subject("a.b").build().unwrap();
        assert_eq!(spec.retention(), RetentionPolicy::Limits);
        assert_eq!(spec.discard(), DiscardPolicy::Old);
        assert_eq!(spec.storage(), StorageType::File);
        assert_eq!(spec.replicas(), 1);
        assert_eq!(spec.max_bytes(), -1);
        assert_eq!(spec.max_age(), Duration::ZERO);
    }

    #[rstest]
    #[case::bad_name(StreamSpec::builder("bad.name").subject("a"))]
    #[case::no_subjects(StreamSpec::builder("S"))]
    #[case::bad_subject(StreamSpec::builder("S").subject("a..b"))]
    #[case::zero_replicas(StreamSpec::builder("S").subject("a").replicas(0))]
    #[case::zero_bytes(StreamSpec::builder("S").subject("a").max_bytes(0))]
    fn builder_rejects_invalid(#[case] builder: StreamSpecBuilder) {
        assert!(matches!(
            builder.build(),
            Err(HarnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn identical_specs_have_no_mismatches() {
        assert!(work_queue(10_000_000_000).mismatches(&work_queue(10_000_000_000)).is_empty());
    }

    #[test]
    fn differing_max_bytes_is_reported() {
        let requested = work_queue(5_000_000_000);
        let existing = work_queue(10_000_000_000);
        assert_eq!(requested.mismatches(&existing), vec!["max_bytes"]);
    }

    #[test]
    fn captures_uses_wildcards() {
        let spec = StreamSpec::builder("S").subject("orders.>").build().unwrap();
        assert!(spec.captures("orders.new"));
        assert!(!spec.captures("payments.new"));
    }
}
