use crate::config::KafkaConfig;
use crate::kafka::connection::BrokerConnection;
use crate::kafka::TopicSpec;
use crate::{Error, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Topic metadata and creation requests against a broker.
pub trait TopicAdmin: Send {
    /// Number of partitions the broker reports for `topic`; zero when it does not exist.
    fn partition_count(&mut self, topic: &str) -> impl Future<Output = Result<usize>> + Send;

    fn create_topic(&mut self, spec: &TopicSpec) -> impl Future<Output = Result<()>> + Send;
}

/// What `ensure_topics` does after one topic fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Stop at the first failing topic.
    #[default]
    FailFast,
    /// Try every topic, then report the first failure.
    BestEffort,
}

pub struct TopicManager<A> {
    admin: A,
    policy: BootstrapPolicy,
}

impl<A: TopicAdmin> TopicManager<A> {
    pub fn new(admin: A) -> Self {
        Self {
            admin,
            policy: BootstrapPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BootstrapPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ensures every topic in `topics` exists, in order.
    ///
    /// Safe to repeat: topics found with a non-empty partition set are left
    /// alone, and a name listed twice is only checked once. Two processes
    /// bootstrapping the same topic at once are not coordinated here; the
    /// broker's own create semantics decide the outcome.
    #[instrument(skip_all, fields(topics = topics.len()))]
    pub async fn ensure_topics(&mut self, topics: &[TopicSpec]) -> Result<()> {
        info!("Initializing Kafka infrastructure");

        let mut seen = HashSet::new();
        let mut first_error = None;

        for spec in topics {
            if !seen.insert(spec.name.as_str()) {
                debug!(topic = %spec.name, "Skipping duplicate topic entry");
                continue;
            }

            if let Err(e) = self.ensure_topic_exists(spec).await {
                let err = Error::Bootstrap {
                    topic: spec.name.clone(),
                    source: Box::new(e),
                };

                match self.policy {
                    BootstrapPolicy::FailFast => {
                        error!(topic = %spec.name, error = %err, "Topic bootstrap failed");
                        return Err(err);
                    }
                    BootstrapPolicy::BestEffort => {
                        error!(
                            topic = %spec.name,
                            error = %err,
                            "Topic bootstrap failed, continuing"
                        );
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!("Kafka infrastructure initialized successfully");
        Ok(())
    }

    #[instrument(skip(self, spec), fields(topic = %spec.name))]
    pub async fn ensure_topic_exists(&mut self, spec: &TopicSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(Error::InvalidTopic(spec.name.clone()));
        }

        match self.admin.partition_count(&spec.name).await {
            Ok(partitions) if partitions > 0 => {
                info!(partitions, "Topic already exists");
                return Ok(());
            }
            Ok(_) => {
                info!("Topic does not exist, creating topic");
            }
            Err(e) => {
                warn!(error = %e, "Topic metadata unavailable, creating topic");
            }
        }

        self.admin.create_topic(spec).await?;
        info!(
            partitions = spec.partitions,
            replication_factor = spec.replication_factor,
            "Topic created successfully"
        );
        Ok(())
    }

    pub fn into_inner(self) -> A {
        self.admin
    }
}

/// [`TopicAdmin`] backed by an rdkafka admin client.
pub struct KafkaAdmin {
    connection: BrokerConnection<AdminClient<DefaultClientContext>>,
    metadata_timeout: Duration,
    operation_timeout: Duration,
}

impl KafkaAdmin {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            connection: BrokerConnection::new(&config.brokers, Self::client_config()),
            metadata_timeout: config.metadata_timeout(),
            operation_timeout: config.operation_timeout(),
        }
    }

    /// A metadata query must never create the topic with broker defaults.
    pub(crate) fn client_config() -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("allow.auto.create.topics", "false");
        client_config
    }

    pub fn close(&mut self) {
        self.connection.close();
    }
}

impl TopicAdmin for KafkaAdmin {
    async fn partition_count(&mut self, topic: &str) -> Result<usize> {
        let admin = self.connection.connect()?;
        let topic_name = topic.to_string();
        let timeout = self.metadata_timeout;

        // fetch_metadata blocks the calling thread until the broker answers.
        let result = tokio::task::spawn_blocking(move || {
            admin
                .inner()
                .fetch_metadata(Some(topic_name.as_str()), timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .filter(|t| t.name() == topic_name && t.error().is_none())
                        .map(|t| t.partitions().len())
                        .sum::<usize>()
                })
        })
        .await
        .map_err(|e| Error::Connection {
            endpoint: self.connection.endpoint().to_string(),
            message: format!("metadata task failed: {}", e),
        })?;

        result.map_err(|e| {
            let err = self.connection.classify(e);
            self.connection.reset();
            err
        })
    }

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<()> {
        let admin = self.connection.connect()?;

        let new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );

        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = match admin.create_topics(&[new_topic], &opts).await {
            Ok(results) => results,
            Err(e) => {
                let err = self.connection.classify(e);
                self.connection.reset();
                return Err(err);
            }
        };

        for result in results {
            match result {
                Ok(topic) => {
                    debug!("Broker confirmed topic creation: {}", topic);
                }
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    info!("Topic '{}' was created concurrently by another client", topic);
                }
                Err((_topic, code)) => {
                    return Err(Error::Kafka(KafkaError::AdminOp(code)));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::test_utils::MemoryBroker;

    fn spec(name: &str) -> TopicSpec {
        TopicSpec::new(name, 1, 1)
    }

    #[tokio::test]
    async fn test_missing_topic_is_created_with_settings() {
        let broker = MemoryBroker::new();
        let mut manager = TopicManager::new(broker.admin());

        manager
            .ensure_topics(&[TopicSpec::new("orders", 3, 2)])
            .await
            .unwrap();

        assert_eq!(broker.create_requests(), vec!["orders".to_string()]);
        assert_eq!(broker.partitions("orders"), Some(3));
    }

    #[tokio::test]
    async fn test_duplicate_entries_create_once() {
        let broker = MemoryBroker::new();
        let mut manager = TopicManager::new(broker.admin());

        manager
            .ensure_topics(&[spec("test"), spec("events"), spec("test"), spec("events")])
            .await
            .unwrap();

        assert_eq!(
            broker.create_requests(),
            vec!["test".to_string(), "events".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_run_creates_nothing() {
        let broker = MemoryBroker::new();
        let mut manager = TopicManager::new(broker.admin());
        let topics = vec![spec("test"), spec("events")];

        manager.ensure_topics(&topics).await.unwrap();
        assert_eq!(broker.create_requests().len(), 2);

        manager.ensure_topics(&topics).await.unwrap();
        assert_eq!(broker.create_requests().len(), 2);
        assert_eq!(broker.metadata_queries(), 4);
    }

    #[tokio::test]
    async fn test_existing_topic_is_left_alone() {
        let broker = MemoryBroker::new();
        broker.add_topic("test", 4);
        let mut manager = TopicManager::new(broker.admin());

        manager.ensure_topics(&[spec("test")]).await.unwrap();

        assert!(broker.create_requests().is_empty());
        assert_eq!(broker.partitions("test"), Some(4));
    }

    #[tokio::test]
    async fn test_metadata_failure_falls_through_to_create() {
        let broker = MemoryBroker::new();
        broker.fail_metadata(true);
        let mut manager = TopicManager::new(broker.admin());

        manager.ensure_topics(&[spec("test")]).await.unwrap();

        assert_eq!(broker.create_requests(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_failing_topic() {
        let broker = MemoryBroker::new();
        broker.fail_create("bad");
        let mut manager = TopicManager::new(broker.admin());

        let err = manager
            .ensure_topics(&[spec("first"), spec("bad"), spec("last")])
            .await
            .unwrap_err();

        match err {
            Error::Bootstrap { topic, .. } => assert_eq!(topic, "bad"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            broker.create_requests(),
            vec!["first".to_string(), "bad".to_string()]
        );
        assert_eq!(broker.partitions("last"), None);
    }

    #[tokio::test]
    async fn test_best_effort_attempts_every_topic() {
        let broker = MemoryBroker::new();
        broker.fail_create("bad");
        let mut manager =
            TopicManager::new(broker.admin()).with_policy(BootstrapPolicy::BestEffort);

        let err = manager
            .ensure_topics(&[spec("first"), spec("bad"), spec("last")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Bootstrap { ref topic, .. } if topic == "bad"));
        assert_eq!(broker.partitions("first"), Some(1));
        assert_eq!(broker.partitions("last"), Some(1));
    }

    #[tokio::test]
    async fn test_empty_topic_name_is_rejected() {
        let broker = MemoryBroker::new();
        let mut manager = TopicManager::new(broker.admin());

        let err = manager.ensure_topics(&[spec("  ")]).await.unwrap_err();

        assert!(matches!(err, Error::Bootstrap { .. }));
        assert!(broker.create_requests().is_empty());
    }

    #[test]
    fn test_admin_client_never_auto_creates() {
        let client_config = KafkaAdmin::client_config();
        assert_eq!(client_config.get("allow.auto.create.topics"), Some("false"));
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_connection_error() {
        let config = KafkaConfig {
            brokers: "127.0.0.1:1".to_string(),
            metadata_timeout_ms: 500,
            ..KafkaConfig::default()
        };
        let mut admin = KafkaAdmin::new(&config);

        let err = admin.partition_count("test").await.unwrap_err();
        admin.close();

        assert!(
            matches!(err, Error::Connection { ref endpoint, .. } if endpoint == "127.0.0.1:1"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    #[ignore] // Requires running Kafka
    async fn test_topic_creation_against_broker() {
        let config = KafkaConfig {
            brokers: std::env::var("TEST_KAFKA_BROKERS")
                .unwrap_or_else(|_| "localhost:9093".to_string()),
            ..KafkaConfig::default()
        };
        let topic = format!("bootstrap_test_{}", std::process::id());

        let mut manager = TopicManager::new(KafkaAdmin::new(&config));
        manager.ensure_topics(&[spec(&topic)]).await.unwrap();
        manager.ensure_topics(&[spec(&topic)]).await.unwrap();

        let mut admin = manager.into_inner();
        assert!(admin.partition_count(&topic).await.unwrap() > 0);
        admin.close();
    }
}
