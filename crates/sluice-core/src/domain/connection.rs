//! Broker connection options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// How to reach the broker.
///
/// Defaults: reconnect enabled, 5s between attempts, 100 attempts,
/// 30s connect timeout, block until the first connection succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSpec {
    servers: Vec<String>,
    reconnect: bool,
    reconnect_time_wait: Duration,
    max_reconnect_attempts: usize,
    timeout: Duration,
    wait_on_first_connect: bool,
}

impl ConnectSpec {
    pub fn new<I, S>(servers: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let servers: Vec<String> = servers.into_iter().map(Into::into).collect();
        if servers.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "at least one server address is required".into(),
            ));
        }
        if let Some(blank) = servers.iter().find(|s| s.trim().is_empty()) {
            return Err(HarnessError::InvalidConfig(format!(
                "blank server address `{blank}`"
            )));
        }
        Ok(Self {
            servers,
            reconnect: true,
            reconnect_time_wait: Duration::from_secs(5),
            max_reconnect_attempts: 100,
            timeout: Duration::from_secs(30),
            wait_on_first_connect: true,
        })
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_reconnect_time_wait(mut self, wait: Duration) -> Self {
        self.reconnect_time_wait = wait;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: usize) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HarnessError> {
        if timeout.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "connect timeout must be positive".into(),
            ));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_wait_on_first_connect(mut self, wait: bool) -> Self {
        self.wait_on_first_connect = wait;
        self
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    pub fn reconnect_time_wait(&self) -> Duration {
        self.reconnect_time_wait
    }

    pub fn max_reconnect_attempts(&self) -> usize {
        self.max_reconnect_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn wait_on_first_connect(&self) -> bool {
        self.wait_on_first_connect
    }
}
