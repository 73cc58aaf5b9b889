//! App - the harness built from the ports.
//!
//! # Components
//! - **reconcile**: idempotent-or-conflict stream/consumer declaration
//! - **publisher**: the startup publish batch
//! - **worker_loop**: PullLoop (pull → handle → ack, single-flight)
//! - **cleanup**: ConsumerGuard (best-effort consumer removal on exit)
//! - **status**: JSON diagnostics
//! - **harness**: Harness, wiring all of the above in order

pub mod cleanup;
pub mod handler;
pub mod harness;
pub mod publisher;
pub mod reconcile;
pub mod status;
pub mod worker_loop;

pub use self::cleanup::ConsumerGuard;
pub use self::handler::{LogHandler, MessageHandler};
pub use self::harness::{Harness, HarnessPlan, RunReport};
pub use self::publisher::publish_batch;
pub use self::reconcile::{ensure_consumer, ensure_stream};
pub use self::worker_loop::{LoopState, LoopSummary, PullLoop, PullOptions};
