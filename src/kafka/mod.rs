pub mod connection;
pub mod consumer;
pub mod producer;
pub mod record;
pub mod serializer;
pub mod topic_manager;

#[cfg(test)]
pub(crate) mod test_utils;


pub use connection::BrokerConnection;
pub use consumer::{KafkaSource, RecordSource, Subscriber, SubscriberState};
pub use producer::{KafkaSink, Publisher, RecordSink};
pub use record::{Delivery, OutgoingRecord, Record, TopicSpec};
pub use serializer::{JsonSerializer, PayloadView};
pub use topic_manager::{BootstrapPolicy, KafkaAdmin, TopicAdmin, TopicManager};
