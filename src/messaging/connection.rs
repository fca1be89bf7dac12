//! Shared broker connections.
//!
//! [`ConnectionManager`] owns one client, one producer and one consumer per
//! group for the whole process. It is passed by `Arc` to producers and
//! subscribers instead of living in module globals. Every handle is built
//! at most once: concurrent first callers wait on the same construction, and
//! a failed connect leaves nothing cached so the next call starts over.

use crate::messaging::config::KafkaConfig;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::kafka::KafkaConnector;
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{
    BrokerClient, BrokerConnector, ConsumerConnection, ProducerConnection,
};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell as AsyncOnceCell};
use tracing::{error, info, warn};

/// Consumer connection bound to one group.
///
/// A handle drives at most one run loop at a time.
pub struct ConsumerHandle {
    group_id: String,
    connection: Arc<dyn ConsumerConnection>,
    running: AtomicBool,
}

impl ConsumerHandle {
    fn new(group_id: String, connection: Arc<dyn ConsumerConnection>) -> Self {
        Self {
            group_id,
            connection,
            running: AtomicBool::new(false),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn connection(&self) -> &Arc<dyn ConsumerConnection> {
        &self.connection
    }

    /// Whether a run loop currently owns this handle
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn try_claim(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

type ConsumerSlot = Arc<AsyncOnceCell<Arc<ConsumerHandle>>>;

/// Registry of lazily-connected broker handles
pub struct ConnectionManager {
    config: KafkaConfig,
    connector: Arc<dyn BrokerConnector>,
    client: OnceCell<Arc<dyn BrokerClient>>,
    producer: Mutex<Option<Arc<dyn ProducerConnection>>>,
    consumers: DashMap<String, ConsumerSlot>,
    metrics_enabled: bool,
}

impl ConnectionManager {
    /// Create a manager that builds its client through `connector`
    pub fn new(config: KafkaConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            client: OnceCell::new(),
            producer: Mutex::new(None),
            consumers: DashMap::new(),
            metrics_enabled: true,
        }
    }

    /// Enable or disable the active connections gauge
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Create a manager backed by Kafka
    pub fn kafka(config: KafkaConfig) -> Self {
        Self::new(config, Arc::new(KafkaConnector))
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Get the shared client, constructing it on first use.
    ///
    /// A constructed client is never rebuilt; reconnects are left to the
    /// transport library.
    pub fn client(&self) -> MessagingResult<Arc<dyn BrokerClient>> {
        self.client
            .get_or_try_init(|| {
                let settings = self.config.client_settings();
                match self.connector.build_client(&settings) {
                    Ok(client) => {
                        info!(
                            client_id = %settings.client_id,
                            brokers = ?settings.brokers,
                            "Kafka client initialized"
                        );
                        Ok(client)
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to initialize Kafka client");
                        Err(e)
                    }
                }
            })
            .cloned()
    }

    /// Whether the client object has been constructed
    pub fn is_client_initialized(&self) -> bool {
        self.client.get().is_some()
    }

    /// Get the shared producer, connecting it on first use
    pub async fn producer(&self) -> MessagingResult<Arc<dyn ProducerConnection>> {
        let mut slot = self.producer.lock().await;
        if let Some(producer) = slot.as_ref() {
            return Ok(producer.clone());
        }

        let client = self.client()?;
        match client.connect_producer(&self.config.producer_settings()).await {
            Ok(producer) => {
                info!("Kafka producer connected");
                self.track_connection("producer", true);
                *slot = Some(producer.clone());
                Ok(producer)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect Kafka producer");
                Err(into_connection_error(e))
            }
        }
    }

    /// Drop the cached producer so the next call reconnects
    pub async fn reset_producer(&self) {
        if self.producer.lock().await.take().is_some() {
            self.track_connection("producer", false);
            warn!("Kafka producer handle invalidated");
        }
    }

    /// Get the consumer for `group_id` (or the configured default group),
    /// connecting it on first use
    pub async fn consumer(&self, group_id: Option<&str>) -> MessagingResult<Arc<ConsumerHandle>> {
        let group_id = group_id.unwrap_or(&self.config.group_id).to_string();
        let slot = self
            .consumers
            .entry(group_id.clone())
            .or_default()
            .value()
            .clone();

        slot.get_or_try_init(|| self.connect_consumer(group_id.clone()))
            .await
            .cloned()
    }

    async fn connect_consumer(&self, group_id: String) -> MessagingResult<Arc<ConsumerHandle>> {
        let client = self.client()?;
        let settings = self.config.consumer_settings(&group_id);
        match client.connect_consumer(&settings).await {
            Ok(connection) => {
                info!(group_id = %group_id, "Kafka consumer connected with group ID: {}", group_id);
                self.track_connection("consumer", true);
                Ok(Arc::new(ConsumerHandle::new(group_id, connection)))
            }
            Err(e) => {
                error!(group_id = %group_id, error = %e, "Failed to connect Kafka consumer");
                Err(into_connection_error(e))
            }
        }
    }

    /// Disconnect every handle. All handles are attempted; the first error
    /// is returned.
    pub async fn shutdown(&self) -> MessagingResult<()> {
        let mut first_error = None;

        if let Some(producer) = self.producer.lock().await.take() {
            self.track_connection("producer", false);
            match producer.disconnect().await {
                Ok(()) => info!("Kafka producer disconnected"),
                Err(e) => {
                    error!(error = %e, "Error disconnecting Kafka producer");
                    first_error.get_or_insert(e);
                }
            }
        }

        let slots: Vec<ConsumerSlot> = self
            .consumers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.consumers.clear();

        for slot in slots {
            let Some(handle) = slot.get() else { continue };
            self.track_connection("consumer", false);
            match handle.connection().disconnect().await {
                Ok(()) => info!(group_id = %handle.group_id(), "Kafka consumer disconnected"),
                Err(e) => {
                    error!(group_id = %handle.group_id(), error = %e, "Error disconnecting Kafka consumer");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn track_connection(&self, role: &str, opened: bool) {
        if !self.metrics_enabled {
            return;
        }
        let gauge = MESSAGING_METRICS.active_connections.with_label_values(&[role]);
        if opened {
            gauge.inc();
        } else {
            gauge.dec();
        }
    }
}

fn into_connection_error(err: MessagingError) -> MessagingError {
    match err {
        err @ MessagingError::Connection(_) => err,
        other => MessagingError::Connection(other.to_string()),
    }
}
