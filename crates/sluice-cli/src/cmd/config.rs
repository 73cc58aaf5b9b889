use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use sluice_core::app::{HarnessPlan, PullOptions};
use sluice_core::domain::{
    AckPolicy, ConnectSpec, ConsumerSpec, DeliverPolicy, DiscardPolicy, Durability, ReplayPolicy,
    RetentionPolicy, StorageType, StreamSpec, subject,
};

use super::error::CliError;

const DEFAULT_SUBJECT: &str = "some.subject";

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub servers: Option<Vec<String>>,
    pub reconnect: Option<bool>,
    pub reconnect_time_wait_ms: Option<u64>,
    pub max_reconnect_attempts: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub wait_on_first_connect: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub name: Option<String>,
    pub subjects: Option<Vec<String>>,
    pub retention: Option<RetentionPolicy>,
    pub discard: Option<DiscardPolicy>,
    pub storage: Option<StorageType>,
    pub replicas: Option<usize>,
    pub max_bytes: Option<i64>,
    pub max_age_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    pub name: Option<String>,
    pub durability: Option<Durability>,
    pub filter_subject: Option<String>,
    pub inactive_threshold_ms: Option<u64>,
    pub ack_wait_ms: Option<u64>,
    pub ack_policy: Option<AckPolicy>,
    pub deliver_policy: Option<DeliverPolicy>,
    pub replay_policy: Option<ReplayPolicy>,
    pub max_deliver: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub subject: Option<String>,
    pub publish: Option<Vec<String>>,
    pub skip_publish: Option<bool>,
    pub batch_size: Option<usize>,
    pub pull_expiry_ms: Option<u64>,
    pub max_messages: Option<u64>,
}

pub fn load_config(path: &str) -> Result<Config, CliError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| CliError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "sluice.toml", env = "SLUICE_CONFIG")]
    pub config: String,

    /// Broker address (repeatable, tried in order)
    #[arg(long = "server")]
    pub servers: Vec<String>,

    /// Stream name
    #[arg(long)]
    pub stream: Option<String>,

    /// Subject captured by the stream, filtered by the consumer and published to
    #[arg(long)]
    pub subject: Option<String>,

    /// Consumer name
    #[arg(long)]
    pub consumer: Option<String>,

    /// Consumer durability: `durable` or `ephemeral` (required here or in the config)
    #[arg(long)]
    pub durability: Option<String>,

    /// Messages requested per pull
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Stop after acknowledging this many messages
    #[arg(long)]
    pub max_messages: Option<u64>,

    /// Skip the startup publish batch
    #[arg(long)]
    pub no_publish: bool,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final configuration: defaults < config.toml < CLI/env.
#[derive(Debug)]
pub struct Effective {
    pub connect: ConnectSpec,
    pub plan: HarnessPlan,
}

impl Effective {
    pub fn new(args: &RunArgs) -> Result<Self, CliError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(args, cfg)
    }

    pub fn merge(args: &RunArgs, cfg: Config) -> Result<Self, CliError> {
        let Config {
            connection,
            stream,
            consumer,
            run,
        } = cfg;

        let servers = if args.servers.is_empty() {
            connection
                .servers
                .unwrap_or_else(|| vec!["nats.dev:4222".into(), "localhost:4222".into()])
        } else {
            args.servers.clone()
        };
        let mut connect = ConnectSpec::new(servers)?
            .with_reconnect(connection.reconnect.unwrap_or(true))
            .with_reconnect_time_wait(Duration::from_millis(
                connection.reconnect_time_wait_ms.unwrap_or(5_000),
            ))
            .with_max_reconnect_attempts(connection.max_reconnect_attempts.unwrap_or(100))
            .with_wait_on_first_connect(connection.wait_on_first_connect.unwrap_or(true));
        connect = connect.with_timeout(Duration::from_millis(connection.timeout_ms.unwrap_or(30_000)))?;

        let subject_override = args.subject.clone();
        let subjects = match &subject_override {
            Some(subject) => vec![subject.clone()],
            None => stream
                .subjects
                .unwrap_or_else(|| vec![DEFAULT_SUBJECT.to_string()]),
        };
        let stream_spec = StreamSpec::builder(
            args.stream
                .clone()
                .or(stream.name)
                .unwrap_or_else(|| "STREAM_NAME".into()),
        )
        .subjects(subjects)
        .retention(stream.retention.unwrap_or(RetentionPolicy::WorkQueue))
        .discard(stream.discard.unwrap_or(DiscardPolicy::Old))
        .storage(stream.storage.unwrap_or(StorageType::File))
        .replicas(stream.replicas.unwrap_or(1))
        .max_bytes(stream.max_bytes.unwrap_or(10_000_000_000))
        .max_age(Duration::from_millis(stream.max_age_ms.unwrap_or(0)))
        .build()?;

        let durability = match &args.durability {
            Some(raw) => raw.parse::<Durability>()?,
            None => consumer.durability.ok_or_else(|| {
                CliError::Config(
                    "consumer durability must be chosen explicitly: set `durability` under [consumer] or pass --durability durable|ephemeral".into(),
                )
            })?,
        };
        let filter_subject = subject_override
            .clone()
            .or(consumer.filter_subject)
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let mut consumer_builder = ConsumerSpec::builder(
            args.consumer
                .clone()
                .or(consumer.name)
                .unwrap_or_else(|| "queue-consumer".into()),
            durability,
        )
        .filter_subject(filter_subject.clone())
        .inactive_threshold(Duration::from_millis(
            consumer.inactive_threshold_ms.unwrap_or(5_000),
        ))
        .ack_wait(Duration::from_millis(consumer.ack_wait_ms.unwrap_or(2_000)))
        .ack_policy(consumer.ack_policy.unwrap_or(AckPolicy::Explicit))
        .deliver_policy(consumer.deliver_policy.unwrap_or(DeliverPolicy::All))
        .replay_policy(consumer.replay_policy.unwrap_or(ReplayPolicy::Instant))
        .max_deliver(consumer.max_deliver.unwrap_or(-1));
        consumer_builder =
            consumer_builder.description(consumer.description.unwrap_or_else(|| "queue consumer".into()));
        let consumer_spec = consumer_builder.build()?;

        let publish_subject = subject_override.or(run.subject).unwrap_or(filter_subject);
        let skip_publish = args.no_publish || run.skip_publish.unwrap_or(false);
        let payloads = if skip_publish {
            Vec::new()
        } else {
            run.publish
                .unwrap_or_else(|| vec!["1".into(), "2".into(), "3".into()])
                .into_iter()
                .map(String::into_bytes)
                .collect()
        };

        if !payloads.is_empty() && !subject::is_valid_literal(&publish_subject) {
            return Err(CliError::Config(format!(
                "cannot publish to `{publish_subject}`: set [run] subject to a subject without wildcards"
            )));
        }

        let batch_size = args.batch_size.or(run.batch_size).unwrap_or(1);
        if batch_size == 0 {
            return Err(CliError::Config("batch_size must be at least 1".into()));
        }
        let pull = PullOptions {
            batch_size,
            expires: Duration::from_millis(run.pull_expiry_ms.unwrap_or(5_000)),
            max_messages: args.max_messages.or(run.max_messages),
        };

        Ok(Self {
            connect,
            plan: HarnessPlan {
                stream: stream_spec,
                consumer: consumer_spec,
                publish_subject,
                payloads,
                pull,
            },
        })
    }
}
