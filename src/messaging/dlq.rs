//! Dead-letter forwarding
//!
//! A message whose handler still fails after bounded retries is parked on
//! the dead-letter topic together with the failure. Writing the record is
//! best-effort: a failed write is reported to the caller as a result and
//! never interrupts the consumer loop.

use crate::messaging::consumer::MessageHandler;
use crate::messaging::envelope::DeliveryMetadata;
use crate::messaging::error::{BoxError, MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::producer::Producer;
use crate::messaging::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use std::marker::PhantomData;
use tracing::error;

/// Default dead-letter topic
pub const DEAD_LETTER_TOPIC: &str = "dead-letter-queue";

/// Record written to the dead-letter topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub original_message: Value,
    pub error: DeadLetterError,
    pub timestamp: DateTime<Utc>,
}

/// Failure description inside a [`DeadLetterRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterError {
    pub message: String,
    /// Chain of underlying causes, outermost first
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
}

impl DeadLetterError {
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }
}

/// Writer for the dead-letter topic
#[derive(Clone)]
pub struct DeadLetterQueue {
    producer: Producer,
    topic: String,
    metrics_enabled: bool,
}

impl DeadLetterQueue {
    pub fn new(producer: Producer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            metrics_enabled: true,
        }
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one record for `message`, which failed on `original_topic`
    pub async fn send<T>(
        &self,
        original_topic: &str,
        message: &T,
        err: &(dyn StdError + Send + Sync + 'static),
    ) -> MessagingResult<()>
    where
        T: Serialize + ?Sized,
    {
        let original_message = serde_json::to_value(message)
            .map_err(|e| MessagingError::DeadLetterWrite(e.to_string()))?;

        let record = DeadLetterRecord {
            original_topic: original_topic.to_string(),
            original_message,
            error: DeadLetterError::from_error(err),
            timestamp: Utc::now(),
        };

        self.producer
            .produce(&self.topic, &record)
            .await
            .map_err(|e| MessagingError::DeadLetterWrite(e.to_string()))?;

        error!(
            original_topic,
            dlq_topic = %self.topic,
            error = %record.error.message,
            "Message sent to DLQ"
        );
        if self.metrics_enabled {
            MESSAGING_METRICS
                .dead_lettered
                .with_label_values(&[original_topic])
                .inc();
        }
        Ok(())
    }
}

/// Handler wrapper: bounded retry, then park on the dead-letter topic.
///
/// The wrapped message is always reported as handled, so the consumer
/// commits it whether or not the dead-letter write succeeded.
pub struct DeadLetterHandler<T, H> {
    inner: H,
    dlq: DeadLetterQueue,
    policy: RetryPolicy,
    _marker: PhantomData<fn(T)>,
}

impl<T, H> DeadLetterHandler<T, H> {
    pub fn new(inner: H, dlq: DeadLetterQueue, policy: RetryPolicy) -> Self {
        Self {
            inner,
            dlq,
            policy,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> MessageHandler<T> for DeadLetterHandler<T, H>
where
    T: Serialize + Clone + Send + Sync + 'static,
    H: MessageHandler<T>,
{
    async fn handle(&self, message: T, metadata: DeliveryMetadata) -> Result<(), BoxError> {
        let exhausted = match with_retry(&self.policy, || {
            self.inner.handle(message.clone(), metadata.clone())
        })
        .await
        {
            Ok(()) => return Ok(()),
            Err(exhausted) => exhausted,
        };

        let err = MessagingError::RetryExhausted {
            attempts: exhausted.attempts,
            last_error: exhausted.last_error.to_string(),
        };
        error!(
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = %metadata.offset,
            error = %err,
            "Handler failed after retries"
        );
        if self.dlq.metrics_enabled {
            MESSAGING_METRICS
                .retries_exhausted
                .with_label_values(&[&metadata.topic])
                .inc();
        }

        if let Err(write_err) = self
            .dlq
            .send(&metadata.topic, &message, &*exhausted.last_error)
            .await
        {
            error!(
                topic = %metadata.topic,
                offset = %metadata.offset,
                error = %write_err,
                "Failed to send message to DLQ"
            );
            if self.dlq.metrics_enabled {
                MESSAGING_METRICS
                    .dead_letter_failures
                    .with_label_values(&[&metadata.topic])
                    .inc();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "could not store user")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_stack_lists_causes() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let described = DeadLetterError::from_error(&err);

        assert_eq!(described.message, "could not store user");
        assert_eq!(described.stack.as_deref(), Some("caused by: disk full"));
    }

    fn assert_send<F: Send>(_: &F) {}

    #[tokio::test]
    async fn test_send_future_is_send() {
        let connections = std::sync::Arc::new(crate::messaging::connection::ConnectionManager::new(
            crate::messaging::config::KafkaConfig::default(),
            std::sync::Arc::new(crate::messaging::memory::InMemoryBroker::new()),
        ));
        let dlq = DeadLetterQueue::new(Producer::new(connections).with_metrics(false), DEAD_LETTER_TOPIC)
            .with_metrics(false);
        let err: BoxError = "handler crashed".into();
        let message = serde_json::json!({"userId": "u1"});

        let pending = dlq.send("users", &message, &*err);
        assert_send(&pending);
        pending.await.unwrap();
    }

    #[test]
    fn test_record_wire_format() {
        let record = DeadLetterRecord {
            original_topic: "users".to_string(),
            original_message: serde_json::json!({"userId": "u1"}),
            error: DeadLetterError {
                message: "boom".to_string(),
                stack: None,
            },
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["originalTopic"], "users");
        assert_eq!(value["originalMessage"]["userId"], "u1");
        assert_eq!(value["error"], serde_json::json!({"message": "boom"}));
        assert_eq!(value["timestamp"], "2024-01-01T00:00:00Z");
    }
}
