//! Messaging configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// When the consumer commits an offset relative to handler execution
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit once the handler returned, successfully or not.
    /// A crash mid-handler redelivers the message (at-least-once).
    #[default]
    AfterHandler,
    /// Commit before the handler runs (at-most-once)
    BeforeHandler,
}

/// Transport-level reconnect policy handed to the broker client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportRetryConfig {
    /// Initial backoff between reconnect attempts in milliseconds
    #[serde(default = "default_initial_retry_time")]
    pub initial_retry_time_ms: u64,

    /// Number of transport retries
    #[serde(default = "default_transport_retries")]
    pub retries: u32,
}

impl Default for TransportRetryConfig {
    fn default() -> Self {
        Self {
            initial_retry_time_ms: default_initial_retry_time(),
            retries: default_transport_retries(),
        }
    }
}

/// Producer handle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProducerConfig {
    /// In-flight request limit; 1 keeps idempotent ordering
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_requests: u32,

    /// Enable idempotent delivery
    #[serde(default = "default_true")]
    pub idempotent: bool,

    /// Transaction timeout in milliseconds
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_in_flight_requests: default_max_in_flight(),
            idempotent: true,
            transaction_timeout_ms: default_transaction_timeout(),
        }
    }
}

/// Consumer handle settings shared by every group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Maximum bytes fetched per partition
    #[serde(default = "default_max_bytes_per_partition")]
    pub max_bytes_per_partition: usize,

    /// Offset commit timing
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_bytes_per_partition: default_max_bytes_per_partition(),
            commit_policy: CommitPolicy::default(),
        }
    }
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct KafkaConfig {
    /// Broker address list, comma-separated `host:port`
    #[validate(custom(function = "validate_broker_list"))]
    pub brokers: String,

    /// Client ID
    #[validate(length(min = 1))]
    pub client_id: String,

    /// Default consumer group ID
    #[validate(length(min = 1))]
    pub group_id: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Transport reconnect policy
    #[serde(default)]
    pub transport_retry: TransportRetryConfig,

    /// Producer settings
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "event-relay".to_string(),
            group_id: "event-relay-group".to_string(),
            connection_timeout_ms: default_connection_timeout(),
            request_timeout_ms: default_request_timeout(),
            transport_retry: TransportRetryConfig::default(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl KafkaConfig {
    /// Broker addresses with surrounding whitespace removed
    pub fn broker_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Settings used to construct the shared client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            client_id: self.client_id.clone(),
            brokers: self.broker_list(),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            initial_retry_time: Duration::from_millis(self.transport_retry.initial_retry_time_ms),
            retries: self.transport_retry.retries,
        }
    }

    /// Settings used to connect the shared producer
    pub fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            max_in_flight_requests: self.producer.max_in_flight_requests,
            idempotent: self.producer.idempotent,
            transaction_timeout: Duration::from_millis(self.producer.transaction_timeout_ms),
        }
    }

    /// Settings used to connect a consumer for `group_id`
    pub fn consumer_settings(&self, group_id: &str) -> ConsumerSettings {
        ConsumerSettings {
            group_id: group_id.to_string(),
            session_timeout: Duration::from_millis(self.consumer.session_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.consumer.heartbeat_interval_ms),
            max_bytes_per_partition: self.consumer.max_bytes_per_partition,
            from_beginning: false,
        }
    }
}

/// Resolved client construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub client_id: String,
    pub brokers: Vec<String>,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub initial_retry_time: Duration,
    pub retries: u32,
}

/// Resolved producer connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    pub max_in_flight_requests: u32,
    pub idempotent: bool,
    pub transaction_timeout: Duration,
}

/// Resolved consumer connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_bytes_per_partition: usize,
    /// New groups start at the log end unless set
    pub from_beginning: bool,
}

/// Consumer-side retry defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,

    /// Base delay in milliseconds; attempt `n` waits `base * n` before `n + 1`
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

/// Main messaging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MessagingConfig {
    /// Kafka configuration
    #[serde(default)]
    #[validate(nested)]
    pub kafka: KafkaConfig,

    /// Dead letter topic
    #[serde(default = "default_dlq_topic")]
    #[validate(length(min = 1))]
    pub dlq_topic: String,

    /// Retry defaults for dead-letter wrapped handlers
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,

    /// Enable metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            kafka: KafkaConfig::default(),
            dlq_topic: default_dlq_topic(),
            retry: RetryConfig::default(),
            enable_metrics: true,
        }
    }
}

fn validate_broker_list(brokers: &str) -> Result<(), ValidationError> {
    let mut seen = 0;
    for broker in brokers.split(',').map(str::trim).filter(|b| !b.is_empty()) {
        let valid = broker
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            let mut err = ValidationError::new("broker_address");
            err.message = Some(format!("'{}' is not a host:port pair", broker).into());
            return Err(err);
        }
        seen += 1;
    }

    if seen == 0 {
        return Err(ValidationError::new("empty_broker_list"));
    }
    Ok(())
}

fn default_connection_timeout() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    30000
}

fn default_initial_retry_time() -> u64 {
    100
}

fn default_transport_retries() -> u32 {
    8
}

fn default_max_in_flight() -> u32 {
    1
}

fn default_transaction_timeout() -> u64 {
    30000
}

fn default_session_timeout() -> u64 {
    30000
}

fn default_heartbeat_interval() -> u64 {
    3000
}

fn default_max_bytes_per_partition() -> usize {
    1_048_576 // 1MB
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_dlq_topic() -> String {
    super::dlq::DEAD_LETTER_TOPIC.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_list_trims_entries() {
        let config = KafkaConfig {
            brokers: " kafka-1:9092, kafka-2:9092 ,".to_string(),
            ..Default::default()
        };
        assert_eq!(config.broker_list(), vec!["kafka-1:9092", "kafka-2:9092"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_list_rejects_missing_port() {
        let config = KafkaConfig {
            brokers: "kafka-1:9092,kafka-2".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let empty = KafkaConfig {
            brokers: " , ".to_string(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_consumer_settings_start_at_log_end() {
        let settings = KafkaConfig::default().consumer_settings("billing");
        assert_eq!(settings.group_id, "billing");
        assert!(!settings.from_beginning);
        assert_eq!(settings.max_bytes_per_partition, 1_048_576);
        assert_eq!(settings.heartbeat_interval, Duration::from_millis(3000));
    }

    #[test]
    fn test_retry_config_requires_one_attempt() {
        let config = MessagingConfig {
            retry: RetryConfig {
                max_retries: 0,
                base_delay_ms: 10,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
