use std::fmt;

use thiserror::Error;

/// Which broker entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Stream,
    Consumer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Stream => f.write_str("stream"),
            EntityKind::Consumer => f.write_str("consumer"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{kind} `{name}` already exists with a different configuration (mismatched: {})", .fields.join(", "))]
    Conflict {
        kind: EntityKind,
        name: String,
        fields: Vec<&'static str>,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("pull failed: {0}")]
    Pull(String),

    #[error("ack failed: {0}")]
    Ack(String),

    #[error("broker request failed: {0}")]
    Broker(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("handler failed: {0}")]
    Handler(String),
}

impl HarnessError {
    pub fn stream_not_found(name: impl Into<String>) -> Self {
        HarnessError::NotFound {
            kind: EntityKind::Stream,
            name: name.into(),
        }
    }

    pub fn consumer_not_found(name: impl Into<String>) -> Self {
        HarnessError::NotFound {
            kind: EntityKind::Consumer,
            name: name.into(),
        }
    }

    /// Is this a configuration-conflict error?
    pub fn is_conflict(&self) -> bool {
        matches!(self, HarnessError::Conflict { .. })
    }
}
