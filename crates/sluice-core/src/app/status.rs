//! Diagnostic dumps of broker state.

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::ConsumerInfo;

fn pretty<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string_pretty(value) {
        Ok(json) => Some(json),
        Err(err) => {
            warn!(error = %err, "could not render diagnostic JSON");
            None
        }
    }
}

/// Log `value` as pretty JSON under `label`.
pub fn log_json<T: Serialize>(label: &str, value: &T) {
    if let Some(json) = pretty(value) {
        info!("{label}: {json}");
    }
}

/// One log line per consumer, numbered in listing order.
pub fn log_consumers(consumers: &[ConsumerInfo]) {
    for (i, consumer) in consumers.iter().enumerate() {
        if let Some(json) = pretty(consumer) {
            info!("consumer {i} info: {json}");
        }
    }
}
