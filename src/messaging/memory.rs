//! In-memory broker for tests and local development.
//!
//! Topics are partitioned logs. Keyed messages always land on the same
//! partition; unkeyed messages are spread round-robin. Consumer groups keep
//! committed offsets, and a group without a committed offset starts at the
//! log end unless configured to start from the beginning. Connection counters
//! and fault injection make connection-lifecycle behavior observable.

use crate::messaging::config::{ClientSettings, ConsumerSettings, ProducerSettings};
use crate::messaging::envelope::{InboundMessage, OutboundMessage};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    BrokerClient, BrokerConnector, ConsumerConnection, ProducerConnection,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Default number of partitions per topic
pub const DEFAULT_PARTITIONS: usize = 3;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    payload: Option<Vec<u8>>,
    timestamp: i64,
}

type PartitionId = (String, i32);

struct BrokerState {
    partitions_per_topic: usize,
    topics: Mutex<HashMap<String, Vec<Vec<StoredRecord>>>>,
    committed: Mutex<HashMap<String, HashMap<PartitionId, i64>>>,
    appended: Notify,
    round_robin: AtomicUsize,
    connect_delay: Mutex<Duration>,
    clients_built: AtomicUsize,
    producer_connects: AtomicUsize,
    consumer_connects: AtomicUsize,
    failing_producer_connects: AtomicUsize,
    failing_consumer_connects: AtomicUsize,
    failing_topics: Mutex<HashSet<String>>,
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create a broker with [`DEFAULT_PARTITIONS`] partitions per topic
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a broker with `partitions` partitions per topic
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            state: Arc::new(BrokerState {
                partitions_per_topic: partitions.max(1),
                topics: Mutex::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                appended: Notify::new(),
                round_robin: AtomicUsize::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
                clients_built: AtomicUsize::new(0),
                producer_connects: AtomicUsize::new(0),
                consumer_connects: AtomicUsize::new(0),
                failing_producer_connects: AtomicUsize::new(0),
                failing_consumer_connects: AtomicUsize::new(0),
                failing_topics: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Partition a key is routed to
    pub fn partition_for_key(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.state.partitions_per_topic as u64) as i32
    }

    /// Append a record directly, bypassing producers.
    /// Useful for injecting malformed or empty payloads.
    pub fn append_raw(&self, topic: &str, key: Option<&str>, payload: Option<Vec<u8>>) -> (i32, i64) {
        let record = StoredRecord {
            key: key.map(str::to_string),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        };
        let position = {
            let mut topics = self.state.topics.lock();
            self.append_locked(&mut topics, topic, record)
        };
        self.state.appended.notify_waiters();
        position
    }

    /// Every record of a topic, ordered by partition then offset
    pub fn records(&self, topic: &str) -> Vec<InboundMessage> {
        let topics = self.state.topics.lock();
        let Some(partitions) = topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, record)| {
                    to_inbound(topic, partition as i32, offset as i64, record)
                })
            })
            .collect()
    }

    /// Committed offset of a group for one partition
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .committed
            .lock()
            .get(group_id)
            .and_then(|offsets| offsets.get(&(topic.to_string(), partition)).copied())
    }

    /// Delay every connect, so concurrent first uses overlap
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Fail the next `count` producer connects
    pub fn fail_next_producer_connects(&self, count: usize) {
        self.state
            .failing_producer_connects
            .store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` consumer connects
    pub fn fail_next_consumer_connects(&self, count: usize) {
        self.state
            .failing_consumer_connects
            .store(count, Ordering::SeqCst);
    }

    /// Reject every publish to `topic`
    pub fn fail_publishes_to(&self, topic: &str) {
        self.state.failing_topics.lock().insert(topic.to_string());
    }

    /// Accept publishes to `topic` again
    pub fn restore_publishes_to(&self, topic: &str) {
        self.state.failing_topics.lock().remove(topic);
    }

    pub fn clients_built(&self) -> usize {
        self.state.clients_built.load(Ordering::SeqCst)
    }

    pub fn producer_connects(&self) -> usize {
        self.state.producer_connects.load(Ordering::SeqCst)
    }

    pub fn consumer_connects(&self) -> usize {
        self.state.consumer_connects.load(Ordering::SeqCst)
    }

    fn append_locked(
        &self,
        topics: &mut HashMap<String, Vec<Vec<StoredRecord>>>,
        topic: &str,
        record: StoredRecord,
    ) -> (i32, i64) {
        let partition = match record.key.as_deref() {
            Some(key) => self.partition_for_key(key),
            None => {
                let next = self.state.round_robin.fetch_add(1, Ordering::Relaxed);
                (next % self.state.partitions_per_topic) as i32
            }
        };

        let log = &mut self.topic_entry(topics, topic)[partition as usize];
        log.push(record);
        (partition, log.len() as i64 - 1)
    }

    fn topic_entry<'a>(
        &self,
        topics: &'a mut HashMap<String, Vec<Vec<StoredRecord>>>,
        topic: &str,
    ) -> &'a mut Vec<Vec<StoredRecord>> {
        topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.state.partitions_per_topic])
    }

    async fn connect_delay(&self) {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn to_inbound(topic: &str, partition: i32, offset: i64, record: &StoredRecord) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        partition,
        offset,
        timestamp: Some(record.timestamp),
        key: record.key.as_ref().map(|key| key.as_bytes().to_vec()),
        payload: record.payload.clone(),
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl BrokerConnector for InMemoryBroker {
    fn build_client(&self, settings: &ClientSettings) -> MessagingResult<Arc<dyn BrokerClient>> {
        self.state.clients_built.fetch_add(1, Ordering::SeqCst);
        debug!(client_id = %settings.client_id, "In-memory client built");
        Ok(Arc::new(InMemoryClient {
            broker: self.clone(),
        }))
    }
}

/// Client bound to an [`InMemoryBroker`]
pub struct InMemoryClient {
    broker: InMemoryBroker,
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn connect_producer(
        &self,
        _settings: &ProducerSettings,
    ) -> MessagingResult<Arc<dyn ProducerConnection>> {
        self.broker.connect_delay().await;
        if take_one(&self.broker.state.failing_producer_connects) {
            return Err(MessagingError::Connection(
                "in-memory broker refused producer connection".to_string(),
            ));
        }

        self.broker
            .state
            .producer_connects
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryProducer {
            broker: self.broker.clone(),
            connected: AtomicBool::new(true),
        }))
    }

    async fn connect_consumer(
        &self,
        settings: &ConsumerSettings,
    ) -> MessagingResult<Arc<dyn ConsumerConnection>> {
        self.broker.connect_delay().await;
        if take_one(&self.broker.state.failing_consumer_connects) {
            return Err(MessagingError::Connection(
                "in-memory broker refused consumer connection".to_string(),
            ));
        }

        self.broker
            .state
            .consumer_connects
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConsumer {
            broker: self.broker.clone(),
            group_id: settings.group_id.clone(),
            from_beginning: settings.from_beginning,
            positions: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Producer connection to an [`InMemoryBroker`]
pub struct InMemoryProducer {
    broker: InMemoryBroker,
    connected: AtomicBool,
}

#[async_trait]
impl ProducerConnection for InMemoryProducer {
    async fn send_batch(&self, topic: &str, messages: Vec<OutboundMessage>) -> MessagingResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MessagingError::publish(topic, "producer is disconnected"));
        }
        if self.broker.state.failing_topics.lock().contains(topic) {
            return Err(MessagingError::publish(topic, "broker rejected the batch"));
        }

        let timestamp = Utc::now().timestamp_millis();
        {
            let mut topics = self.broker.state.topics.lock();
            for message in messages {
                let record = StoredRecord {
                    key: message.key,
                    payload: Some(message.value),
                    timestamp,
                };
                self.broker.append_locked(&mut topics, topic, record);
            }
        }
        self.broker.state.appended.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer connection to an [`InMemoryBroker`]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group_id: String,
    from_beginning: bool,
    /// Next offset to read per subscribed partition
    positions: Mutex<BTreeMap<PartitionId, i64>>,
    closed: AtomicBool,
}

impl InMemoryConsumer {
    fn poll_once(&self) -> Option<InboundMessage> {
        let mut positions = self.positions.lock();
        let mut topics = self.broker.state.topics.lock();

        for ((topic, partition), position) in positions.iter_mut() {
            let partitions = self.broker.topic_entry(&mut topics, topic);
            let log = &partitions[*partition as usize];
            if let Some(record) = log.get(*position as usize) {
                let message = to_inbound(topic, *partition, *position, record);
                *position += 1;
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl ConsumerConnection for InMemoryConsumer {
    async fn subscribe(&self, topics: &[String]) -> MessagingResult<()> {
        let committed = self
            .broker
            .state
            .committed
            .lock()
            .get(&self.group_id)
            .cloned()
            .unwrap_or_default();

        let mut positions = self.positions.lock();
        let mut logs = self.broker.state.topics.lock();
        positions.clear();

        for topic in topics {
            let partitions = self.broker.topic_entry(&mut logs, topic);
            for (partition, log) in partitions.iter().enumerate() {
                let id = (topic.clone(), partition as i32);
                let start = match committed.get(&id) {
                    Some(offset) => *offset,
                    None if self.from_beginning => 0,
                    None => log.len() as i64,
                };
                positions.insert(id, start);
            }
        }
        Ok(())
    }

    async fn next_message(&self) -> MessagingResult<Option<InboundMessage>> {
        loop {
            let notified = self.broker.state.appended.notified();
            tokio::pin!(notified);
            // Register interest before checking, so an append between the
            // check and the await is not missed
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(message) = self.poll_once() {
                return Ok(Some(message));
            }

            notified.await;
        }
    }

    async fn commit(&self, message: &InboundMessage) -> MessagingResult<()> {
        self.broker
            .state
            .committed
            .lock()
            .entry(self.group_id.clone())
            .or_default()
            .insert((message.topic.clone(), message.partition), message.offset + 1);
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.broker.state.appended.notify_waiters();
        Ok(())
    }
}
