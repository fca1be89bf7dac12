//! Main messaging service

use crate::messaging::config::MessagingConfig;
use crate::messaging::connection::ConnectionManager;
use crate::messaging::consumer::{Subscriber, SubscriptionHandle};
use crate::messaging::dlq::{DeadLetterHandler, DeadLetterQueue};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::events::{EventEmitter, ReceivedEvent, Topic};
use crate::messaging::handlers::{EmailEventHandler, UserEventHandler};
use crate::messaging::health::HealthProbe;
use crate::messaging::kafka::KafkaConnector;
use crate::messaging::producer::Producer;
use crate::messaging::retry::RetryPolicy;
use crate::messaging::traits::BrokerConnector;
use std::sync::Arc;
use tracing::{error, info};
use validator::Validate;

/// Entry point wiring the connection registry, producer, subscriber,
/// dead-letter queue and health probe together
pub struct MessagingService {
    config: MessagingConfig,
    connections: Arc<ConnectionManager>,
    producer: Producer,
    subscriber: Subscriber,
    dlq: DeadLetterQueue,
    emitter: EventEmitter,
    health: HealthProbe,
    retry_policy: RetryPolicy,
}

impl MessagingService {
    /// Create a service whose connections are built by `connector`.
    /// Nothing connects until first use.
    pub fn new(
        config: MessagingConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> MessagingResult<Self> {
        config
            .validate()
            .map_err(|e| MessagingError::Configuration(e.to_string()))?;

        if config.enable_metrics {
            crate::messaging::metrics::init_messaging_metrics();
        }

        let metrics = config.enable_metrics;
        let connections =
            Arc::new(ConnectionManager::new(config.kafka.clone(), connector).with_metrics(metrics));
        let producer = Producer::new(connections.clone()).with_metrics(metrics);
        let subscriber = Subscriber::new(connections.clone()).with_metrics(metrics);
        let dlq = DeadLetterQueue::new(producer.clone(), config.dlq_topic.clone()).with_metrics(metrics);
        let emitter = EventEmitter::new(producer.clone());
        let health = HealthProbe::new(connections.clone());
        let retry_policy = RetryPolicy::from(&config.retry);

        Ok(Self {
            config,
            connections,
            producer,
            subscriber,
            dlq,
            emitter,
            health,
            retry_policy,
        })
    }

    /// Create a service backed by Kafka
    pub fn kafka(config: MessagingConfig) -> MessagingResult<Self> {
        Self::new(config, Arc::new(KafkaConnector))
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn dead_letter_queue(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn health(&self) -> &HealthProbe {
        &self.health
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Consumer group used by the default subscription on `topic`
    pub fn default_group(&self, topic: Topic) -> String {
        format!("{}.{}", self.config.kafka.group_id, topic)
    }

    /// Start the default consumers: `users` with retry and dead-letter
    /// fallback, `emails` with plain isolation.
    pub async fn start_default_consumers(&self) -> MessagingResult<Vec<SubscriptionHandle>> {
        let users_group = self.default_group(Topic::Users);
        let user_handler: DeadLetterHandler<ReceivedEvent, _> =
            DeadLetterHandler::new(UserEventHandler, self.dlq.clone(), self.retry_policy);
        let users = self
            .subscriber
            .subscribe(&[Topic::Users.as_ref()], user_handler, Some(&users_group))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to initialize Kafka consumers");
                e
            })?;

        let emails_group = self.default_group(Topic::Emails);
        let emails = match self
            .subscriber
            .subscribe::<ReceivedEvent, _>(
                &[Topic::Emails.as_ref()],
                EmailEventHandler,
                Some(&emails_group),
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Failed to initialize Kafka consumers");
                users.stop().await;
                return Err(e);
            }
        };

        info!("Kafka consumers initialized");
        Ok(vec![users, emails])
    }

    /// Disconnect every shared handle
    pub async fn shutdown(&self) -> MessagingResult<()> {
        self.connections.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::InMemoryBroker;

    fn service(broker: &InMemoryBroker) -> MessagingService {
        let config = MessagingConfig {
            enable_metrics: false,
            ..Default::default()
        };
        MessagingService::new(config, Arc::new(broker.clone())).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MessagingConfig::default();
        config.kafka.client_id.clear();

        let err = MessagingService::new(config, Arc::new(InMemoryBroker::new()))
            .err()
            .unwrap();
        assert!(matches!(err, MessagingError::Configuration(_)));
    }

    #[test]
    fn test_construction_is_lazy() {
        let broker = InMemoryBroker::new();
        let service = service(&broker);

        assert_eq!(broker.clients_built(), 0);
        assert_eq!(service.retry_policy(), RetryPolicy::default());
        assert_eq!(service.dead_letter_queue().topic(), "dead-letter-queue");
    }

    #[tokio::test]
    async fn test_default_consumers_use_separate_groups() {
        let broker = InMemoryBroker::new();
        let service = service(&broker);

        let handles = service.start_default_consumers().await.unwrap();
        let groups: Vec<&str> = handles.iter().map(|h| h.group_id()).collect();
        assert_eq!(groups, ["event-relay-group.users", "event-relay-group.emails"]);

        for handle in handles {
            handle.stop().await;
        }
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_second_subscription_stops_the_first() {
        let broker = InMemoryBroker::new();
        let service = service(&broker);

        let users = service
            .connections()
            .consumer(Some("event-relay-group.users"))
            .await
            .unwrap();
        broker.fail_next_consumer_connects(1);

        let err = service.start_default_consumers().await.err().unwrap();
        assert!(matches!(err, MessagingError::Connection(_)));
        assert!(!users.is_running());
    }
}
