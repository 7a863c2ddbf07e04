use crate::config::KafkaConfig;
use crate::kafka::connection::BrokerConnection;
use crate::kafka::serializer::JsonSerializer;
use crate::kafka::{Delivery, OutgoingRecord};
use crate::{Error, Result};
use bytes::Bytes;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer, PurgeConfig};
use rdkafka::ClientConfig;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Batching transport the publisher hands encoded records to.
pub trait RecordSink: Send {
    /// Enqueues `record` and resolves once the batch holding it was flushed
    /// and acknowledged by the broker.
    fn send(&mut self, record: OutgoingRecord) -> impl Future<Output = Result<Delivery>> + Send;

    /// Sends everything still buffered, waiting at most `timeout`.
    fn flush(&mut self, timeout: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Drops buffered and in-flight records without waiting for the broker.
    fn purge(&mut self);

    fn close(&mut self);
}

/// [`RecordSink`] backed by an rdkafka `FutureProducer`.
///
/// librdkafka owns the batch: a partition batch is sent once it holds
/// `batch_size` records or `batch_timeout_ms` passed since its first record.
pub struct KafkaSink {
    connection: BrokerConnection<FutureProducer>,
    queue_timeout: Duration,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            connection: BrokerConnection::new(&config.brokers, Self::client_config(config)),
            queue_timeout: config.operation_timeout(),
        }
    }

    /// Producer settings; `bootstrap.servers` is added by the connection.
    pub(crate) fn client_config(config: &KafkaConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("batch.num.messages", config.batch_size.to_string())
            .set("linger.ms", config.batch_timeout_ms.to_string())
            .set("message.timeout.ms", config.operation_timeout_ms.to_string())
            .set("acks", "all");
        client_config
    }
}

impl RecordSink for KafkaSink {
    async fn send(&mut self, record: OutgoingRecord) -> Result<Delivery> {
        let producer = self.connection.connect()?;

        let mut future_record =
            FutureRecord::<[u8], [u8]>::to(&record.topic).payload(&record.payload[..]);
        if let Some(key) = &record.key {
            future_record = future_record.key(&key[..]);
        }

        let (partition, offset) = producer
            .send(future_record, self.queue_timeout)
            .await
            .map_err(|(e, _)| Error::Publish {
                topic: record.topic.clone(),
                message: e.to_string(),
            })?;

        Ok(Delivery { partition, offset })
    }

    async fn flush(&mut self, timeout: Duration) -> Result<()> {
        if !self.connection.is_connected() {
            return Ok(());
        }

        let producer = self.connection.connect()?;

        // rd_kafka_flush blocks the calling thread for up to `timeout`.
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Connection {
                endpoint: self.connection.endpoint().to_string(),
                message: format!("flush task failed: {}", e),
            })?
            .map_err(Error::Kafka)
    }

    fn purge(&mut self) {
        if !self.connection.is_connected() {
            return;
        }

        if let Ok(producer) = self.connection.connect() {
            producer.purge(PurgeConfig::default().queue().inflight());
        }
    }

    fn close(&mut self) {
        self.connection.close();
    }
}

/// Serializes payloads to JSON and publishes them through a [`RecordSink`].
pub struct Publisher<S> {
    sink: S,
    default_topic: Option<String>,
    shutdown: CancellationToken,
    flush_timeout: Duration,
}

impl Publisher<KafkaSink> {
    pub fn from_config(config: &KafkaConfig, shutdown: CancellationToken) -> Self {
        Publisher::new(KafkaSink::new(config), config.default_topic.clone(), shutdown)
            .with_flush_timeout(config.operation_timeout())
    }
}

impl<S: RecordSink> Publisher<S> {
    pub fn new(sink: S, default_topic: Option<String>, shutdown: CancellationToken) -> Self {
        Self {
            sink,
            default_topic,
            shutdown,
            flush_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Publishes `payload` to `topic`, returning once the broker acknowledged it.
    pub async fn publish<T>(&mut self, topic: &str, payload: &T) -> Result<Delivery>
    where
        T: Serialize + Debug + ?Sized,
    {
        self.dispatch(Some(topic), None, payload).await
    }

    /// Publishes `payload` to the configured default topic.
    pub async fn publish_default<T>(&mut self, payload: &T) -> Result<Delivery>
    where
        T: Serialize + Debug + ?Sized,
    {
        self.dispatch(None, None, payload).await
    }

    pub async fn publish_keyed<T>(
        &mut self,
        topic: &str,
        key: impl Into<Bytes>,
        payload: &T,
    ) -> Result<Delivery>
    where
        T: Serialize + Debug + ?Sized,
    {
        self.dispatch(Some(topic), Some(key.into()), payload).await
    }

    async fn dispatch<T>(
        &mut self,
        topic: Option<&str>,
        key: Option<Bytes>,
        payload: &T,
    ) -> Result<Delivery>
    where
        T: Serialize + Debug + ?Sized,
    {
        let topic = self.resolve_topic(topic)?.to_string();
        info!(topic = %topic, message = ?payload, "publishing message");

        let bytes = JsonSerializer::encode(payload).map_err(|e| {
            error!(topic = %topic, error = %e, "failed to marshal message");
            e
        })?;

        let mut record = OutgoingRecord::new(topic.clone(), bytes);
        if let Some(key) = key {
            record = record.with_key(key);
        }

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                warn!(topic = %topic, "publish interrupted by shutdown");
                return Err(Error::Shutdown);
            }
            result = self.sink.send(record) => result,
        };

        match result {
            Ok(delivery) => {
                info!(
                    topic = %topic,
                    message = ?payload,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "message published"
                );
                Ok(delivery)
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "failed to publish message");
                Err(e)
            }
        }
    }

    fn resolve_topic<'a>(&'a self, topic: Option<&'a str>) -> Result<&'a str> {
        match topic {
            Some(name) if !name.trim().is_empty() => Ok(name),
            Some(name) => Err(Error::InvalidTopic(name.to_string())),
            None => self
                .default_topic
                .as_deref()
                .ok_or_else(|| Error::InvalidTopic(String::new())),
        }
    }

    /// Flushes outstanding batches and releases the producer. Safe to call twice.
    ///
    /// Once the shutdown token is cancelled the flush is abandoned: unsent
    /// records are purged and `Error::Shutdown` is returned.
    pub async fn close(&mut self) -> Result<()> {
        debug!("Closing publisher");

        let flushed = if self.shutdown.is_cancelled() {
            Err(Error::Shutdown)
        } else {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(Error::Shutdown),
                result = self.sink.flush(self.flush_timeout) => result,
            }
        };

        if matches!(flushed, Err(Error::Shutdown)) {
            warn!("flush interrupted by shutdown, discarding unsent messages");
            self.sink.purge();
        }

        self.sink.close();
        flushed
    }
}
