//! Broker transport abstractions
//!
//! A [`BrokerConnector`] builds the process-wide client; the client opens
//! producer and consumer connections. Kafka and the in-memory broker both
//! implement this chain.

use crate::messaging::config::{ClientSettings, ConsumerSettings, ProducerSettings};
use crate::messaging::envelope::{InboundMessage, OutboundMessage};
use crate::messaging::error::MessagingResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds broker clients
pub trait BrokerConnector: Send + Sync {
    /// Construct a client. No network round trip happens here.
    fn build_client(&self, settings: &ClientSettings) -> MessagingResult<Arc<dyn BrokerClient>>;
}

/// Logical client session to the cluster
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open a connected producer
    async fn connect_producer(
        &self,
        settings: &ProducerSettings,
    ) -> MessagingResult<Arc<dyn ProducerConnection>>;

    /// Open a connected consumer bound to a group
    async fn connect_consumer(
        &self,
        settings: &ConsumerSettings,
    ) -> MessagingResult<Arc<dyn ConsumerConnection>>;
}

/// Connected publishing channel
#[async_trait]
pub trait ProducerConnection: Send + Sync {
    /// Send messages to a topic as one batch, preserving order
    async fn send_batch(&self, topic: &str, messages: Vec<OutboundMessage>) -> MessagingResult<()>;

    /// Flush and close the connection
    async fn disconnect(&self) -> MessagingResult<()>;
}

/// Connected pull session
#[async_trait]
pub trait ConsumerConnection: Send + Sync {
    /// Replace the subscription with `topics`
    async fn subscribe(&self, topics: &[String]) -> MessagingResult<()>;

    /// Wait for the next message. `None` once the connection is closed.
    async fn next_message(&self) -> MessagingResult<Option<InboundMessage>>;

    /// Mark `message` as handled for the group
    async fn commit(&self, message: &InboundMessage) -> MessagingResult<()>;

    /// Leave the group and close the connection
    async fn disconnect(&self) -> MessagingResult<()>;
}
