use crate::kafka::consumer::RecordSource;
use crate::kafka::producer::RecordSink;
use crate::kafka::topic_manager::TopicAdmin;
use crate::kafka::{Delivery, OutgoingRecord, Record, TopicSpec};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::Utc;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FETCH_POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Default)]
struct TopicLog {
    partitions: i32,
    records: Vec<Record>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    create_requests: Vec<String>,
    metadata_queries: usize,
    fail_metadata: bool,
    fail_create: HashSet<String>,
    send_requests: usize,
    stall_sends: bool,
    flushes: usize,
    stall_flushes: bool,
    purges: usize,
    pending_fetch_failures: usize,
    cancel_on_fetch_failure: Option<CancellationToken>,
    fetch_failures: usize,
    closed_sources: usize,
}

/// Single-partition in-memory broker shared by the mock admin, sink and source.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn admin(&self) -> MemoryAdmin {
        MemoryAdmin { broker: self.clone() }
    }

    pub fn sink(&self) -> MemorySink {
        MemorySink { broker: self.clone() }
    }

    pub fn source(&self, topic: &str) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            topic: topic.to_string(),
            position: 0,
        }
    }

    pub fn add_topic(&self, name: &str, partitions: i32) {
        self.lock().topics.insert(
            name.to_string(),
            TopicLog {
                partitions,
                records: Vec::new(),
            },
        );
    }

    pub fn partitions(&self, name: &str) -> Option<i32> {
        self.lock().topics.get(name).map(|t| t.partitions)
    }

    pub fn records(&self, name: &str) -> Vec<Record> {
        self.lock()
            .topics
            .get(name)
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    /// Appends a record as if another producer had written it.
    pub fn push(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> Delivery {
        let mut record = OutgoingRecord::new(topic, Bytes::copy_from_slice(payload));
        if let Some(key) = key {
            record = record.with_key(Bytes::copy_from_slice(key));
        }
        append(&mut self.lock(), record).unwrap()
    }

    pub fn create_requests(&self) -> Vec<String> {
        self.lock().create_requests.clone()
    }

    pub fn metadata_queries(&self) -> usize {
        self.lock().metadata_queries
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.lock().fail_metadata = fail;
    }

    pub fn fail_create(&self, topic: &str) {
        self.lock().fail_create.insert(topic.to_string());
    }

    pub fn send_requests(&self) -> usize {
        self.lock().send_requests
    }

    /// Makes every send wait forever, like a flush that never gets acknowledged.
    pub fn stall_sends(&self, stall: bool) {
        self.lock().stall_sends = stall;
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    /// Makes every flush wait forever, like a broker that stopped answering.
    pub fn stall_flushes(&self, stall: bool) {
        self.lock().stall_flushes = stall;
    }

    pub fn purges(&self) -> usize {
        self.lock().purges
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().pending_fetch_failures = count;
    }

    /// Cancels `token` right before each injected fetch failure is returned.
    pub fn cancel_on_fetch_failure(&self, token: CancellationToken) {
        self.lock().cancel_on_fetch_failure = Some(token);
    }

    pub fn fetch_failures(&self) -> usize {
        self.lock().fetch_failures
    }

    pub fn closed_sources(&self) -> usize {
        self.lock().closed_sources
    }
}

fn append(state: &mut BrokerState, record: OutgoingRecord) -> Result<Delivery> {
    let log = state.topics.get_mut(&record.topic).ok_or_else(|| Error::Publish {
        topic: record.topic.clone(),
        message: "unknown topic or partition".to_string(),
    })?;

    let offset = log.records.len() as i64;
    log.records.push(Record {
        topic: record.topic,
        partition: 0,
        offset,
        key: record.key,
        payload: record.payload,
        timestamp: Some(Utc::now()),
    });

    Ok(Delivery {
        partition: 0,
        offset,
    })
}

pub struct MemoryAdmin {
    broker: MemoryBroker,
}

impl TopicAdmin for MemoryAdmin {
    async fn partition_count(&mut self, topic: &str) -> Result<usize> {
        let mut state = self.broker.lock();
        state.metadata_queries += 1;

        if state.fail_metadata {
            return Err(Error::Connection {
                endpoint: "memory".to_string(),
                message: "metadata request failed".to_string(),
            });
        }

        Ok(state
            .topics
            .get(topic)
            .map(|t| t.partitions as usize)
            .unwrap_or(0))
    }

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<()> {
        let mut state = self.broker.lock();
        state.create_requests.push(spec.name.clone());

        if state.fail_create.contains(&spec.name) {
            return Err(Error::Kafka(KafkaError::AdminOp(
                RDKafkaErrorCode::TopicAuthorizationFailed,
            )));
        }

        state
            .topics
            .entry(spec.name.clone())
            .or_insert_with(|| TopicLog {
                partitions: spec.partitions,
                records: Vec::new(),
            });
        Ok(())
    }
}

pub struct MemorySink {
    broker: MemoryBroker,
}

impl RecordSink for MemorySink {
    async fn send(&mut self, record: OutgoingRecord) -> Result<Delivery> {
        let stalled = {
            let mut state = self.broker.lock();
            state.send_requests += 1;
            state.stall_sends
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        append(&mut self.broker.lock(), record)
    }

    async fn flush(&mut self, _timeout: Duration) -> Result<()> {
        let stalled = {
            let mut state = self.broker.lock();
            state.flushes += 1;
            state.stall_flushes
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        Ok(())
    }

    fn purge(&mut self) {
        self.broker.lock().purges += 1;
    }

    fn close(&mut self) {}
}

pub struct MemorySource {
    broker: MemoryBroker,
    topic: String,
    position: usize,
}

impl RecordSource for MemorySource {
    async fn fetch(&mut self) -> Result<Record> {
        loop {
            {
                let mut state = self.broker.lock();

                if state.pending_fetch_failures > 0 {
                    state.pending_fetch_failures -= 1;
                    state.fetch_failures += 1;
                    if let Some(token) = &state.cancel_on_fetch_failure {
                        token.cancel();
                    }
                    return Err(Error::Connection {
                        endpoint: "memory".to_string(),
                        message: "fetch request failed".to_string(),
                    });
                }

                let next = state
                    .topics
                    .get(&self.topic)
                    .and_then(|t| t.records.get(self.position))
                    .cloned();

                if let Some(record) = next {
                    self.position += 1;
                    return Ok(record);
                }
            }

            tokio::time::sleep(FETCH_POLL_INTERVAL).await;
        }
    }

    fn close(&mut self) {
        self.broker.lock().closed_sources += 1;
    }
}
