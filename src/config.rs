use crate::kafka::TopicSpec;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "KAFKA_PLATFORM";

/// Flat variables kept for compatibility with existing deployments.
const KAFKA_DSN_VAR: &str = "KAFKA_DSN";
const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Comma-separated broker endpoint list.
    #[serde(default = "default_brokers")]
    pub brokers: String,
    /// Topics ensured by the bootstrapper, in order.
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    /// Topic used by the publisher when a call does not name one.
    #[serde(default = "default_topic")]
    pub default_topic: Option<String>,
    /// Topic the subscriber reads.
    #[serde(default = "default_topic_name")]
    pub consume_topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_fetch_min_bytes")]
    pub fetch_min_bytes: usize,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: usize,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Consecutive failed fetches before the subscriber gives up; 0 never gives up.
    #[serde(default)]
    pub max_consecutive_fetch_failures: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Layers an optional TOML file, `KAFKA_PLATFORM_*` variables and the
    /// flat `KAFKA_DSN` / `LOG_LEVEL` variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.topics")
                    .try_parsing(true),
            )
            .set_override_option("kafka.brokers", std::env::var(KAFKA_DSN_VAR).ok())?
            .set_override_option("logger.level", std::env::var(LOG_LEVEL_VAR).ok())?
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.kafka.validate()
    }
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker_list().is_empty() {
            return Err(Error::Config("kafka.brokers must name at least one endpoint".to_string()));
        }

        if let Some(name) = self.topics.iter().find(|t| t.trim().is_empty()) {
            return Err(Error::Config(format!("kafka.topics contains an empty name: {:?}", name)));
        }

        if matches!(&self.default_topic, Some(t) if t.trim().is_empty()) {
            return Err(Error::Config("kafka.default_topic must not be empty".to_string()));
        }

        if self.partitions < 1 {
            return Err(Error::Config(format!(
                "kafka.partitions must be positive, got {}",
                self.partitions
            )));
        }

        if self.replication_factor < 1 {
            return Err(Error::Config(format!(
                "kafka.replication_factor must be positive, got {}",
                self.replication_factor
            )));
        }

        if self.batch_size == 0 {
            return Err(Error::Config("kafka.batch_size must be positive".to_string()));
        }

        if self.fetch_min_bytes > self.fetch_max_bytes {
            return Err(Error::Config(format!(
                "kafka.fetch_min_bytes ({}) exceeds kafka.fetch_max_bytes ({})",
                self.fetch_min_bytes, self.fetch_max_bytes
            )));
        }

        Ok(())
    }

    pub fn broker_list(&self) -> Vec<&str> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect()
    }

    /// The bootstrap list with this config's partition and replication settings.
    pub fn topic_specs(&self) -> Vec<TopicSpec> {
        self.topics
            .iter()
            .map(|name| TopicSpec::new(name, self.partitions, self.replication_factor))
            .collect()
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topics: default_topics(),
            default_topic: default_topic(),
            consume_topic: default_topic_name(),
            group_id: default_group_id(),
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            fetch_min_bytes: default_fetch_min_bytes(),
            fetch_max_bytes: default_fetch_max_bytes(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_consecutive_fetch_failures: 0,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_brokers() -> String {
    "localhost:9093".to_string()
}

fn default_topic_name() -> String {
    "test".to_string()
}

fn default_topics() -> Vec<String> {
    vec![default_topic_name()]
}

fn default_topic() -> Option<String> {
    Some(default_topic_name())
}

fn default_group_id() -> String {
    "test".to_string()
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    10
}

fn default_fetch_min_bytes() -> usize {
    10_000 // 10KB
}

fn default_fetch_max_bytes() -> usize {
    10_000_000 // 10MB
}

fn default_metadata_timeout_ms() -> u64 {
    5_000
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}
