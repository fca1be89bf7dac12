//! Publishing side of the messaging core

use crate::messaging::connection::ConnectionManager;
use crate::messaging::envelope::OutboundMessage;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Serializes messages to JSON and publishes them through the shared
/// producer handle.
///
/// Failures are returned to the caller as-is. Nothing is retried here.
#[derive(Clone)]
pub struct Producer {
    connections: Arc<ConnectionManager>,
    metrics_enabled: bool,
}

impl Producer {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            metrics_enabled: true,
        }
    }

    /// Enable or disable metric recording
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Publish a single message
    pub async fn produce<T>(&self, topic: &str, message: &T) -> MessagingResult<()>
    where
        T: Serialize + ?Sized,
    {
        let outbound = encode(topic, message)?;
        self.send(topic, vec![outbound]).await
    }

    /// Publish `messages` as one batch request, in order.
    /// An empty slice is a no-op.
    pub async fn produce_batch<T>(&self, topic: &str, messages: &[T]) -> MessagingResult<()>
    where
        T: Serialize,
    {
        if messages.is_empty() {
            return Ok(());
        }

        let batch = messages
            .iter()
            .map(|message| encode(topic, message))
            .collect::<MessagingResult<Vec<_>>>()?;
        self.send(topic, batch).await
    }

    /// Publish a single message with a partition key
    pub async fn produce_with_key<T>(&self, topic: &str, key: &str, message: &T) -> MessagingResult<()>
    where
        T: Serialize + ?Sized,
    {
        let outbound = encode(topic, message)?.with_key(key);
        self.send(topic, vec![outbound]).await
    }

    async fn send(&self, topic: &str, batch: Vec<OutboundMessage>) -> MessagingResult<()> {
        let producer = self.connections.producer().await?;
        let count = batch.len();
        let start = Instant::now();

        match producer.send_batch(topic, batch).await {
            Ok(()) => {
                debug!(topic, count, "Published {} message(s) to {}", count, topic);
                if self.metrics_enabled {
                    MESSAGING_METRICS
                        .messages_published
                        .with_label_values(&[topic])
                        .inc_by(count as f64);
                    MESSAGING_METRICS
                        .publish_latency
                        .with_label_values(&[topic])
                        .observe(start.elapsed().as_secs_f64());
                }
                Ok(())
            }
            Err(e) => {
                error!(topic, error = %e, "Error producing message");
                if self.metrics_enabled {
                    MESSAGING_METRICS
                        .publish_failures
                        .with_label_values(&[topic])
                        .inc();
                }
                Err(match e {
                    e @ MessagingError::Publish { .. } => e,
                    other => MessagingError::publish(topic, other),
                })
            }
        }
    }
}

fn encode<T: Serialize + ?Sized>(topic: &str, message: &T) -> MessagingResult<OutboundMessage> {
    OutboundMessage::json(message).map_err(|e| MessagingError::publish(topic, e))
}

/// Producer bound to one topic and one message type
pub struct TypedProducer<T> {
    producer: Producer,
    topic: String,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Serialize> TypedProducer<T> {
    pub fn new(producer: Producer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            _marker: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send(&self, message: &T) -> MessagingResult<()> {
        self.producer.produce(&self.topic, message).await
    }

    pub async fn send_with_key(&self, key: &str, message: &T) -> MessagingResult<()> {
        self.producer
            .produce_with_key(&self.topic, key, message)
            .await
    }
}

impl<T> Clone for TypedProducer<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            topic: self.topic.clone(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::config::KafkaConfig;
    use crate::messaging::memory::InMemoryBroker;
    use serde_json::{json, Value};

    fn producer(broker: &InMemoryBroker) -> Producer {
        let connections = Arc::new(ConnectionManager::new(
            KafkaConfig::default(),
            Arc::new(broker.clone()),
        ));
        Producer::new(connections).with_metrics(false)
    }

    fn payloads(broker: &InMemoryBroker, topic: &str) -> Vec<Value> {
        broker
            .records(topic)
            .iter()
            .map(|record| serde_json::from_slice(record.payload().unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let broker = InMemoryBroker::with_partitions(1);
        let producer = producer(&broker);

        let batch = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
        producer.produce_batch("audit", &batch).await.unwrap();

        assert_eq!(payloads(&broker, "audit"), batch);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);

        producer
            .produce_batch::<Value>("audit", &[])
            .await
            .unwrap();

        assert!(broker.records("audit").is_empty());
        assert_eq!(broker.producer_connects(), 0);
    }

    #[tokio::test]
    async fn test_keyed_message_lands_on_key_partition() {
        let broker = InMemoryBroker::with_partitions(4);
        let producer = producer(&broker);

        producer
            .produce_with_key("users", "u1", &json!({"userId": "u1"}))
            .await
            .unwrap();

        let records = broker.records("users");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some(&b"u1"[..]));
        assert_eq!(records[0].partition, broker.partition_for_key("u1"));
    }

    #[tokio::test]
    async fn test_rejected_publish_is_publish_error() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes_to("emails");
        let producer = producer(&broker);

        let err = producer
            .produce("emails", &json!({"to": "a@b.com"}))
            .await
            .unwrap_err();

        match err {
            MessagingError::Publish { topic, .. } => assert_eq!(topic, "emails"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let broker = InMemoryBroker::new();
        broker.fail_next_producer_connects(1);
        let producer = producer(&broker);

        let err = producer.produce("users", &json!({})).await.unwrap_err();
        assert!(matches!(err, MessagingError::Connection(_)));
    }

    #[tokio::test]
    async fn test_typed_producer_targets_its_topic() {
        let broker = InMemoryBroker::with_partitions(1);
        let typed = TypedProducer::<Value>::new(producer(&broker), "notifications");

        typed.send(&json!({"id": 1})).await.unwrap();
        typed.send_with_key("k", &json!({"id": 2})).await.unwrap();

        assert_eq!(typed.topic(), "notifications");
        assert_eq!(payloads(&broker, "notifications").len(), 2);
    }
}
