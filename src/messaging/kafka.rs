//! Kafka transport built on `rdkafka`

use crate::messaging::config::{ClientSettings, ConsumerSettings, ProducerSettings};
use crate::messaging::envelope::{InboundMessage, OutboundMessage};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    BrokerClient, BrokerConnector, ConsumerConnection, ProducerConnection,
};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Builds [`KafkaClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaConnector;

impl BrokerConnector for KafkaConnector {
    fn build_client(&self, settings: &ClientSettings) -> MessagingResult<Arc<dyn BrokerClient>> {
        if settings.brokers.is_empty() {
            return Err(MessagingError::Configuration(
                "Kafka broker list is empty".to_string(),
            ));
        }

        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", settings.brokers.join(","))
            .set("client.id", &settings.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                settings.connection_timeout.as_millis().to_string(),
            )
            .set(
                "socket.timeout.ms",
                settings.request_timeout.as_millis().to_string(),
            )
            .set(
                "reconnect.backoff.ms",
                settings.initial_retry_time.as_millis().to_string(),
            )
            .set(
                "retry.backoff.ms",
                settings.initial_retry_time.as_millis().to_string(),
            );

        Ok(Arc::new(KafkaClient {
            base,
            connection_timeout: settings.connection_timeout,
            request_timeout: settings.request_timeout,
            retries: settings.retries,
        }))
    }
}

/// Kafka client holding the shared connection parameters
pub struct KafkaClient {
    base: ClientConfig,
    connection_timeout: Duration,
    request_timeout: Duration,
    retries: u32,
}

impl KafkaClient {
    /// Round-trip a metadata request so "connected" means the cluster answered
    async fn check_reachable<C>(&self, client: Arc<C>) -> MessagingResult<()>
    where
        C: FetchMetadata + Send + Sync + 'static,
    {
        let timeout = self.connection_timeout;
        tokio::task::spawn_blocking(move || client.fetch(timeout))
            .await
            .map_err(|e| MessagingError::Connection(format!("metadata request aborted: {}", e)))?
    }
}

trait FetchMetadata {
    fn fetch(&self, timeout: Duration) -> MessagingResult<()>;
}

impl FetchMetadata for FutureProducer {
    fn fetch(&self, timeout: Duration) -> MessagingResult<()> {
        self.client()
            .fetch_metadata(None, timeout)
            .map(|_| ())
            .map_err(|e| MessagingError::Connection(format!("Kafka producer connect failed: {}", e)))
    }
}

impl FetchMetadata for StreamConsumer {
    fn fetch(&self, timeout: Duration) -> MessagingResult<()> {
        self.fetch_metadata(None, timeout)
            .map(|_| ())
            .map_err(|e| MessagingError::Connection(format!("Kafka consumer connect failed: {}", e)))
    }
}

#[async_trait]
impl BrokerClient for KafkaClient {
    async fn connect_producer(
        &self,
        settings: &ProducerSettings,
    ) -> MessagingResult<Arc<dyn ProducerConnection>> {
        let mut config = self.base.clone();
        config
            .set("enable.idempotence", settings.idempotent.to_string())
            .set(
                "max.in.flight.requests.per.connection",
                settings.max_in_flight_requests.to_string(),
            )
            .set(
                "transaction.timeout.ms",
                settings.transaction_timeout.as_millis().to_string(),
            )
            .set(
                "request.timeout.ms",
                self.request_timeout.as_millis().to_string(),
            )
            .set("retries", self.retries.to_string());

        let producer: FutureProducer = config.create().map_err(|e| {
            MessagingError::Connection(format!("Kafka producer creation failed: {}", e))
        })?;
        let producer = Arc::new(producer);
        self.check_reachable(producer.clone()).await?;

        Ok(Arc::new(KafkaProducer {
            producer,
            queue_timeout: self.request_timeout,
        }))
    }

    async fn connect_consumer(
        &self,
        settings: &ConsumerSettings,
    ) -> MessagingResult<Arc<dyn ConsumerConnection>> {
        let offset_reset = if settings.from_beginning {
            "earliest"
        } else {
            "latest"
        };

        let mut config = self.base.clone();
        config
            .set("group.id", &settings.group_id)
            .set(
                "session.timeout.ms",
                settings.session_timeout.as_millis().to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                settings.heartbeat_interval.as_millis().to_string(),
            )
            .set(
                "max.partition.fetch.bytes",
                settings.max_bytes_per_partition.to_string(),
            )
            .set("auto.offset.reset", offset_reset)
            // Offsets are committed explicitly according to the commit policy
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");

        let consumer: StreamConsumer = config.create().map_err(|e| {
            MessagingError::Connection(format!("Kafka consumer creation failed: {}", e))
        })?;
        let consumer = Arc::new(consumer);
        self.check_reachable(consumer.clone()).await?;

        Ok(Arc::new(KafkaConsumer::new(consumer)))
    }
}

/// Kafka producer connection
pub struct KafkaProducer {
    producer: Arc<FutureProducer>,
    queue_timeout: Duration,
}

#[async_trait]
impl ProducerConnection for KafkaProducer {
    async fn send_batch(&self, topic: &str, messages: Vec<OutboundMessage>) -> MessagingResult<()> {
        // Enqueue everything first, in order, then wait for delivery reports
        let mut deliveries = Vec::with_capacity(messages.len());
        for message in &messages {
            let mut record: FutureRecord<'_, str, [u8]> =
                FutureRecord::to(topic).payload(message.value.as_slice());
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }

            let delivery = self
                .producer
                .send_result(record)
                .map_err(|(e, _)| MessagingError::publish(topic, format!("enqueue failed: {}", e)))?;
            deliveries.push(delivery);
        }

        for delivery in futures::future::join_all(deliveries).await {
            match delivery {
                Ok(Ok(_)) => debug!(topic, "Kafka delivery acknowledged"),
                Ok(Err((e, _))) => return Err(MessagingError::publish(topic, e)),
                Err(_) => return Err(MessagingError::publish(topic, "delivery canceled")),
            }
        }

        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        let producer = self.producer.clone();
        let timeout = self.queue_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| MessagingError::Connection(format!("flush aborted: {}", e)))?
            .map_err(|e| MessagingError::Connection(format!("Kafka producer flush failed: {}", e)))
    }
}

/// Kafka consumer connection
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    /// Flipped once on disconnect; wakes a receive in flight
    closed: watch::Sender<bool>,
}

impl KafkaConsumer {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        let (closed, _) = watch::channel(false);
        Self { consumer, closed }
    }
}

#[async_trait]
impl ConsumerConnection for KafkaConsumer {
    async fn subscribe(&self, topics: &[String]) -> MessagingResult<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| MessagingError::Subscribe(format!("Kafka subscribe failed: {}", e)))
    }

    async fn next_message(&self) -> MessagingResult<Option<InboundMessage>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }

        let message = tokio::select! {
            _ = closed.changed() => return Ok(None),
            received = self.consumer.recv() => received
                .map_err(|e| MessagingError::Consume(format!("Kafka recv failed: {}", e)))?,
        };

        Ok(Some(InboundMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp: message.timestamp().to_millis(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        }))
    }

    async fn commit(&self, message: &InboundMessage) -> MessagingResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| MessagingError::Consume(format!("Kafka commit failed: {}", e)))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| MessagingError::Consume(format!("Kafka commit failed: {}", e)))
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.closed.send_replace(true);
        self.consumer.unsubscribe();
        Ok(())
    }
}
