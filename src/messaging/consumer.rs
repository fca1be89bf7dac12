//! Subscription runtime
//!
//! Each subscription owns one consumer group handle and runs a sequential
//! loop on its own task: pull a message, decode the JSON payload, invoke the
//! handler, commit. A failing message is logged and the loop moves on.

use crate::messaging::config::CommitPolicy;
use crate::messaging::connection::{ConnectionManager, ConsumerHandle};
use crate::messaging::envelope::{DeliveryMetadata, InboundMessage};
use crate::messaging::error::{BoxError, MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed receive before polling again
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

/// Processes decoded messages of type `T`
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static {
    async fn handle(&self, message: T, metadata: DeliveryMetadata) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T, DeliveryMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, message: T, metadata: DeliveryMetadata) -> Result<(), BoxError> {
        (self)(message, metadata).await
    }
}

/// Starts subscriptions against the shared consumer handles
#[derive(Clone)]
pub struct Subscriber {
    connections: Arc<ConnectionManager>,
    commit_policy: CommitPolicy,
    metrics_enabled: bool,
}

impl Subscriber {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        let commit_policy = connections.config().consumer.commit_policy;
        Self {
            connections,
            commit_policy,
            metrics_enabled: true,
        }
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Subscribe `group_id` (or the default group) to `topics` from the
    /// current offset and start dispatching to `handler`.
    ///
    /// Returns once the subscription is registered; messages published
    /// after that point are delivered. A group runs one loop at a time.
    pub async fn subscribe<T, H>(
        &self,
        topics: &[&str],
        handler: H,
        group_id: Option<&str>,
    ) -> MessagingResult<SubscriptionHandle>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        let handle = self.connections.consumer(group_id).await?;
        if !handle.try_claim() {
            return Err(MessagingError::Subscribe(format!(
                "consumer group '{}' already has a running subscription",
                handle.group_id()
            )));
        }

        let topics: Vec<String> = topics.iter().map(|topic| topic.to_string()).collect();
        if let Err(e) = handle.connection().subscribe(&topics).await {
            handle.release();
            error!(group_id = %handle.group_id(), error = %e, "Error subscribing to topics");
            return Err(e);
        }

        info!(group_id = %handle.group_id(), topics = ?topics, "Subscribed to topics");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = RunLoop {
            handle: handle.clone(),
            handler,
            commit_policy: self.commit_policy,
            metrics_enabled: self.metrics_enabled,
            _marker: PhantomData,
        };
        let task = tokio::spawn(run.run(shutdown_rx));

        Ok(SubscriptionHandle {
            group_id: handle.group_id().to_string(),
            topics,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Running subscription.
///
/// Dropping the handle detaches the loop; it keeps running until the
/// consumer connection closes.
pub struct SubscriptionHandle {
    group_id: String,
    topics: Vec<String>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop after the message in flight, if any, is handled
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(group_id = %self.group_id, error = %e, "Subscription task failed");
        }
    }
}

struct RunLoop<T, H> {
    handle: Arc<ConsumerHandle>,
    handler: H,
    commit_policy: CommitPolicy,
    metrics_enabled: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> RunLoop<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let connection = self.handle.connection().clone();

        loop {
            let next = tokio::select! {
                Ok(()) = shutdown.changed() => break,
                next = connection.next_message() => next,
            };

            match next {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => {
                    info!(group_id = %self.handle.group_id(), "Consumer connection closed");
                    break;
                }
                Err(e) => {
                    error!(group_id = %self.handle.group_id(), error = %e, "Error receiving message");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }

        self.handle.release();
        debug!(group_id = %self.handle.group_id(), "Subscription loop stopped");
    }

    async fn process(&self, message: InboundMessage) {
        let group_id = self.handle.group_id();

        let Some(payload) = message.payload() else {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Received message with no value"
            );
            self.count(&MESSAGING_METRICS.messages_skipped, &message.topic);
            self.commit(&message).await;
            return;
        };

        if self.commit_policy == CommitPolicy::BeforeHandler {
            self.commit(&message).await;
        }

        let outcome = match serde_json::from_slice::<T>(payload) {
            Ok(decoded) => {
                self.count(&MESSAGING_METRICS.messages_consumed, &message.topic);
                self.handler
                    .handle(decoded, message.metadata())
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("undecodable payload: {}", e)),
        };

        if let Err(reason) = outcome {
            let err = MessagingError::Handler {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset.to_string(),
                reason,
            };
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                group_id,
                error = %err,
                "Error processing message"
            );
            self.count(&MESSAGING_METRICS.handler_failures, &message.topic);
        }

        if self.commit_policy == CommitPolicy::AfterHandler {
            self.commit(&message).await;
        }
    }

    async fn commit(&self, message: &InboundMessage) {
        if let Err(e) = self.handle.connection().commit(message).await {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Error committing offset"
            );
        }
    }

    fn count(&self, counter: &prometheus::CounterVec, topic: &str) {
        if self.metrics_enabled {
            counter
                .with_label_values(&[topic, self.handle.group_id()])
                .inc();
        }
    }
}

/// Subscription bound to fixed topics, handler and group
pub struct TypedConsumer<T, H> {
    subscriber: Subscriber,
    topics: Vec<String>,
    handler: H,
    group_id: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> TypedConsumer<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    pub fn new(subscriber: Subscriber, topics: &[&str], handler: H) -> Self {
        Self {
            subscriber,
            topics: topics.iter().map(|topic| topic.to_string()).collect(),
            handler,
            group_id: None,
            _marker: PhantomData,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub async fn start(self) -> MessagingResult<SubscriptionHandle> {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.subscriber
            .subscribe(&topics, self.handler, self.group_id.as_deref())
            .await
    }
}
