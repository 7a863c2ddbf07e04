use crate::config::KafkaConfig;
use crate::kafka::connection::BrokerConnection;
use crate::kafka::serializer::PayloadView;
use crate::kafka::Record;
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, Message};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Blocking record fetch from a broker.
pub trait RecordSource: Send {
    /// Waits until the next record is available.
    fn fetch(&mut self) -> impl Future<Output = Result<Record>> + Send;

    fn close(&mut self);
}

/// [`RecordSource`] backed by an rdkafka `StreamConsumer` in a consumer group.
///
/// Offsets are committed automatically in the background, so a crash between
/// fetch and processing can redeliver records.
pub struct KafkaSource {
    connection: BrokerConnection<StreamConsumer>,
    topic: String,
    subscribed: bool,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            connection: BrokerConnection::new(&config.brokers, Self::client_config(config)),
            topic: config.consume_topic.clone(),
            subscribed: false,
        }
    }

    /// Consumer group settings; `bootstrap.servers` is added by the connection.
    pub(crate) fn client_config(config: &KafkaConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", config.fetch_min_bytes.to_string())
            .set("fetch.max.bytes", config.fetch_max_bytes.to_string());
        client_config
    }
}

impl RecordSource for KafkaSource {
    async fn fetch(&mut self) -> Result<Record> {
        let consumer = self.connection.connect()?;

        if !self.subscribed {
            consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
                self.connection.reset();
                Error::Kafka(e)
            })?;
            self.subscribed = true;
            info!(topic = %self.topic, "Subscribed to topic");
        }

        let message = consumer
            .recv()
            .await
            .map_err(|e| self.connection.classify(e))?;
        Ok(detach(&message))
    }

    fn close(&mut self) {
        if self.subscribed {
            if let Ok(consumer) = self.connection.connect() {
                consumer.unsubscribe();
            }
            self.subscribed = false;
        }
        self.connection.close();
    }
}

fn detach(message: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

/// Lifecycle of a [`Subscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Running,
    Cancelled,
    Failed,
    Closed,
}

impl SubscriberState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubscriberState::Cancelled | SubscriberState::Failed | SubscriberState::Closed
        )
    }
}

type RecordHandler = Box<dyn FnMut(&Record) -> Result<()> + Send>;

/// Runs the fetch loop for one topic until cancelled.
pub struct Subscriber<S> {
    source: S,
    topic: String,
    group_id: String,
    state: SubscriberState,
    handler: Option<RecordHandler>,
    max_consecutive_failures: u32,
    retry_backoff: Duration,
    processed: u64,
}

impl Subscriber<KafkaSource> {
    pub fn from_config(config: &KafkaConfig) -> Self {
        info!(
            topic = %config.consume_topic,
            consumer_group = %config.group_id,
            "creating Kafka consumer"
        );

        Subscriber::new(KafkaSource::new(config), &config.consume_topic, &config.group_id)
            .with_max_consecutive_failures(config.max_consecutive_fetch_failures)
    }
}

impl<S: RecordSource> Subscriber<S> {
    pub fn new(source: S, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            source,
            topic: topic.into(),
            group_id: group_id.into(),
            state: SubscriberState::Idle,
            handler: None,
            max_consecutive_failures: 0,
            retry_backoff: Duration::from_millis(100),
            processed: 0,
        }
    }

    /// Called for every record after it was logged. Errors are logged and ignored.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Record) -> Result<()> + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Fails the subscriber after `max` fetch errors in a row; 0 never fails.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Runs until `shutdown` is cancelled or the subscriber fails.
    ///
    /// Returns `Ok(SubscriberState::Cancelled)` on shutdown. Fetch errors are
    /// logged and retried; only invalid settings or reaching the configured
    /// failure limit return [`Error::Consume`]. Once stopped, further calls
    /// return the terminal state without fetching.
    #[instrument(skip_all, fields(topic = %self.topic, consumer_group = %self.group_id))]
    pub async fn start(&mut self, shutdown: CancellationToken) -> Result<SubscriberState> {
        match self.state {
            SubscriberState::Idle => {}
            state if state.is_terminal() => {
                debug!(?state, "Subscriber already stopped");
                return Ok(state);
            }
            _ => {
                return Err(Error::Consume("subscriber is already running".to_string()));
            }
        }

        if self.topic.trim().is_empty() {
            self.state = SubscriberState::Failed;
            return Err(Error::Consume("consumer topic must not be empty".to_string()));
        }

        if self.group_id.trim().is_empty() {
            self.state = SubscriberState::Failed;
            return Err(Error::Consume("consumer group must not be empty".to_string()));
        }

        self.state = SubscriberState::Running;
        info!("Starting consumer");

        let mut consecutive_failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Ok(self.cancelled());
            }

            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                result = self.source.fetch() => Some(result),
            };

            let result = match fetched {
                Some(result) => result,
                None => return Ok(self.cancelled()),
            };

            match result {
                Ok(record) => {
                    consecutive_failures = 0;
                    self.process(&record);
                }
                Err(e) if e.is_cancellation() || shutdown.is_cancelled() => {
                    return Ok(self.cancelled());
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    error!(error = %e, consecutive_failures, "failed to read message");

                    if self.max_consecutive_failures > 0
                        && consecutive_failures >= self.max_consecutive_failures
                    {
                        self.state = SubscriberState::Failed;
                        return Err(Error::Consume(format!(
                            "giving up after {} consecutive fetch failures, last error: {}",
                            consecutive_failures, e
                        )));
                    }

                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Ok(self.cancelled()),
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }

    fn cancelled(&mut self) -> SubscriberState {
        info!(processed = self.processed, "consumer context cancelled, stopping");
        self.state = SubscriberState::Cancelled;
        self.state
    }

    fn process(&mut self, record: &Record) {
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            key = %record.key_lossy(),
            timestamp = ?record.timestamp,
            size = record.size(),
            "message received"
        );

        match PayloadView::inspect(&record.payload) {
            PayloadView::Json(value) => {
                info!(message = %value, "message received");
            }
            PayloadView::Text(text) => {
                warn!(offset = record.offset, "Message received is not valid JSON");
                info!(message = %text, "message received");
            }
            PayloadView::Binary(encoded) => {
                warn!(offset = record.offset, "Message received is not valid JSON");
                info!(message_base64 = %encoded, "message received");
            }
        }

        self.processed += 1;

        if let Some(handler) = self.handler.as_mut() {
            if let Err(e) = handler(record) {
                warn!(offset = record.offset, error = %e, "record handler failed");
            }
        }
    }

    /// Releases the fetch handle. Safe to call in any state, including twice.
    pub fn close(&mut self) {
        if self.state == SubscriberState::Closed {
            return;
        }
        self.source.close();
        self.state = SubscriberState::Closed;
        debug!(topic = %self.topic, "Subscriber closed");
    }
}
