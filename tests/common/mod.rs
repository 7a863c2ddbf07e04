use kafka_platform::config::{Config, KafkaConfig, LoggerConfig};
use std::env;

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    // Use TEST_ prefix for test environment variables
    let run = format!("{}_{}", std::process::id(), chrono::Utc::now().timestamp_millis());
    let topic = format!("test_{}", run);

    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9093".to_string()),
        topics: vec![topic.clone()],
        default_topic: Some(topic.clone()),
        consume_topic: topic,
        group_id: format!("test_group_{}", run),
        fetch_min_bytes: 1, // Hand out single records immediately in tests
        ..KafkaConfig::default()
    };

    Config {
        kafka,
        logger: LoggerConfig::default(),
    }
}
