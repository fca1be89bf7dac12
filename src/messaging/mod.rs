//! Event messaging over a partitioned log broker
//!
//! This module provides typed producers and consumers on top of Kafka, with
//! per-message failure isolation and dead-letter fallback on the consuming
//! side.
//!
//! # Features
//!
//! - **Shared Connections**: one client, one producer and one consumer per
//!   group, built lazily and at most once
//! - **Typed Events**: a closed event union routed to canonical topics
//! - **Failure Isolation**: a failing message never stops its subscription
//! - **Bounded Retry**: linear backoff, then park on the dead-letter topic
//! - **Explicit Commit Policy**: commit before or after the handler
//! - **Metrics Integration**: Prometheus metrics for monitoring
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │         MessagingService                         │
//! ├─────────────────────────────────────────────────┤
//! │  Producer / EventEmitter   Subscriber            │
//! │  DeadLetterQueue           HealthProbe           │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │      ConnectionManager                           │
//! ├─────────────────────────────────────────────────┤
//! │  client (once)  producer (once)  consumer/group  │
//! └─────────────────────────────────────────────────┘
//!           │                        │
//!           ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────┐
//! │  KafkaConnector  │    │  InMemoryBroker  │
//! ├──────────────────┤    ├──────────────────┤
//! │ - rdkafka        │    │ - tests, local   │
//! └──────────────────┘    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use event_relay::messaging::{MessagingConfig, MessagingService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let messaging = MessagingService::kafka(MessagingConfig::default())?;
//!
//!     messaging
//!         .emitter()
//!         .emit_user_created("u1", "a@b.com", None)
//!         .await?;
//!
//!     let consumers = messaging.start_default_consumers().await?;
//!     tokio::signal::ctrl_c().await?;
//!
//!     for consumer in consumers {
//!         consumer.stop().await;
//!     }
//!     messaging.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod consumer;
mod dlq;
mod envelope;
mod error;
mod events;
mod handlers;
mod health;
mod kafka;
mod memory;
mod metrics;
mod producer;
mod retry;
mod service;
mod traits;

pub use config::{
    ClientSettings, CommitPolicy, ConsumerConfig, ConsumerSettings, KafkaConfig, MessagingConfig,
    ProducerConfig, ProducerSettings, RetryConfig, TransportRetryConfig,
};
pub use connection::{ConnectionManager, ConsumerHandle};
pub use consumer::{MessageHandler, Subscriber, SubscriptionHandle, TypedConsumer};
pub use dlq::{
    DeadLetterError, DeadLetterHandler, DeadLetterQueue, DeadLetterRecord, DEAD_LETTER_TOPIC,
};
pub use envelope::{DeliveryMetadata, InboundMessage, OutboundMessage};
pub use error::{BoxError, MessagingError, MessagingResult};
pub use events::{
    EmailSent, Event, EventEmitter, EventType, ReceivedEvent, Topic, UserCreated, UserUpdated,
};
pub use handlers::{EmailEventHandler, UserEventHandler};
pub use health::{HealthProbe, HealthReport, HealthStatus, ServiceCheck, ServiceStatus};
pub use kafka::KafkaConnector;
pub use memory::InMemoryBroker;
pub use metrics::{init_messaging_metrics, MESSAGING_METRICS};
pub use producer::{Producer, TypedProducer};
pub use retry::{with_retry, RetryExhausted, RetryPolicy};
pub use service::MessagingService;
pub use traits::{BrokerClient, BrokerConnector, ConsumerConnection, ProducerConnection};
