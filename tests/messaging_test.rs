use event_relay::messaging::{
    BoxError, CommitPolicy, ConnectionManager, DeliveryMetadata, Event, EventType, InMemoryBroker,
    KafkaConfig, MessagingConfig, MessagingService, Producer, ReceivedEvent, Subscriber, Topic,
    MESSAGING_METRICS,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct TestMessage {
    id: String,
    content: String,
    sequence: u32,
}

fn connections(broker: &InMemoryBroker) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        KafkaConfig::default(),
        Arc::new(broker.clone()),
    )
    .with_metrics(false))
}

fn pipeline(broker: &InMemoryBroker) -> (Producer, Subscriber) {
    let connections = connections(broker);
    (
        Producer::new(connections.clone()).with_metrics(false),
        Subscriber::new(connections).with_metrics(false),
    )
}

/// Handler forwarding every decoded message and its metadata to a channel
fn forward<T: Send + 'static>(
    tx: mpsc::UnboundedSender<(T, DeliveryMetadata)>,
) -> impl Fn(T, DeliveryMetadata) -> std::future::Ready<Result<(), BoxError>> + Send + Sync + 'static
{
    move |message: T, metadata: DeliveryMetadata| {
        let _ = tx.send((message, metadata));
        std::future::ready(Ok(()))
    }
}

/// Round trip: a produced message is delivered structurally unchanged
#[tokio::test]
async fn test_produce_subscribe_round_trip() {
    let broker = InMemoryBroker::new();
    let (producer, subscriber) = pipeline(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = subscriber
        .subscribe(&["notifications"], forward::<TestMessage>(tx), None)
        .await
        .unwrap();

    let sent = TestMessage {
        id: "msg-1".to_string(),
        content: "hello".to_string(),
        sequence: 1,
    };
    producer.produce("notifications", &sent).await.unwrap();

    let (received, metadata) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, sent);
    assert_eq!(metadata.topic, "notifications");
    assert!(metadata.timestamp.parse::<i64>().is_ok());

    handle.stop().await;
}

/// Same-key messages keep their call order
#[tokio::test]
async fn test_keyed_messages_preserve_order() {
    let broker = InMemoryBroker::with_partitions(4);
    let (producer, subscriber) = pipeline(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = subscriber
        .subscribe(&["audit"], forward::<Value>(tx), Some("auditors"))
        .await
        .unwrap();

    for sequence in 1..=5 {
        producer
            .produce_with_key("audit", "account-42", &json!({ "sequence": sequence }))
            .await
            .unwrap();
    }

    let expected_partition = broker.partition_for_key("account-42");
    for sequence in 1..=5 {
        let (received, metadata) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(received["sequence"], sequence);
        assert_eq!(metadata.partition, expected_partition);
    }

    handle.stop().await;
}

/// A handler failing for M does not block M+1
#[tokio::test]
async fn test_handler_failure_is_isolated() {
    let broker = InMemoryBroker::with_partitions(1);
    let (producer, subscriber) = pipeline(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handler = move |message: Value, _metadata: DeliveryMetadata| {
        let tx = tx.clone();
        async move {
            if message["poison"] == json!(true) {
                return Err::<(), BoxError>("poison message".into());
            }
            let _ = tx.send(message);
            Ok(())
        }
    };

    let handle = subscriber
        .subscribe(&["emails"], handler, Some("mailers"))
        .await
        .unwrap();

    producer
        .produce_batch(
            "emails",
            &[json!({"poison": true, "n": 1}), json!({"poison": false, "n": 2})],
        )
        .await
        .unwrap();

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received["n"], 2);
    handle.stop().await;

    // Both messages were committed under the default policy
    assert_eq!(broker.committed_offset("mailers", "emails", 0), Some(2));
}

/// Empty or missing payloads never reach the handler
#[tokio::test]
async fn test_empty_payload_is_skipped() {
    let broker = InMemoryBroker::with_partitions(1);
    let (_producer, subscriber) = pipeline(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = subscriber
        .subscribe(&["users"], forward::<Value>(tx), Some("skippers"))
        .await
        .unwrap();

    broker.append_raw("users", None, None);
    broker.append_raw("users", None, Some(Vec::new()));
    broker.append_raw("users", None, Some(br#"{"n":3}"#.to_vec()));

    let (received, metadata) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, json!({"n": 3}));
    assert_eq!(metadata.offset, "2");

    handle.stop().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.committed_offset("skippers", "users", 0), Some(3));
}

/// Subscriptions start at the log end, never replaying history
#[tokio::test]
async fn test_new_subscription_skips_history() {
    let broker = InMemoryBroker::with_partitions(1);
    let (producer, subscriber) = pipeline(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    producer
        .produce("audit", &json!({"old": true}))
        .await
        .unwrap();

    let handle = subscriber
        .subscribe(&["audit"], forward::<Value>(tx), None)
        .await
        .unwrap();
    producer
        .produce("audit", &json!({"old": false}))
        .await
        .unwrap();

    let (received, _) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, json!({"old": false}));
    handle.stop().await;
}

/// Concurrent first users of the producer share one connection
#[tokio::test]
async fn test_concurrent_producer_acquisition_connects_once() {
    let broker = InMemoryBroker::new();
    broker.set_connect_delay(Duration::from_millis(50));
    let connections = connections(&broker);

    let acquisitions = (0..8).map(|_| {
        let connections = connections.clone();
        tokio::spawn(async move { connections.producer().await })
    });
    let producers: Vec<_> = futures::future::join_all(acquisitions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(broker.producer_connects(), 1);
    assert_eq!(broker.clients_built(), 1);
    assert!(producers.iter().all(|p| Arc::ptr_eq(p, &producers[0])));
}

/// Concurrent first users of a consumer group share one connection
#[tokio::test]
async fn test_concurrent_consumer_acquisition_connects_once() {
    let broker = InMemoryBroker::new();
    broker.set_connect_delay(Duration::from_millis(50));
    let connections = connections(&broker);

    let (a, b, c) = tokio::join!(
        connections.consumer(Some("billing")),
        connections.consumer(Some("billing")),
        connections.consumer(None),
    );

    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(c.unwrap().group_id(), "event-relay-group");
    assert_eq!(broker.consumer_connects(), 2);
}

/// Commit-before-handler marks the message handled even when the handler fails
#[tokio::test]
async fn test_commit_before_handler_policy() {
    let broker = InMemoryBroker::with_partitions(1);
    let (producer, subscriber) = pipeline(&broker);
    let subscriber = subscriber.with_commit_policy(CommitPolicy::BeforeHandler);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handler = move |_message: Value, metadata: DeliveryMetadata| {
        let _ = tx.send(metadata.offset);
        std::future::ready(Err::<(), BoxError>("always fails".into()))
    };

    let handle = subscriber
        .subscribe(&["audit"], handler, Some("at-most-once"))
        .await
        .unwrap();
    producer.produce("audit", &json!({"n": 1})).await.unwrap();

    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "0");
    handle.stop().await;
    assert_eq!(broker.committed_offset("at-most-once", "audit", 0), Some(1));
}

/// The user.created scenario end to end
#[tokio::test]
async fn test_user_created_scenario() {
    let broker = InMemoryBroker::new();
    let (producer, subscriber) = pipeline(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = subscriber
        .subscribe(&[Topic::Users.as_ref()], forward::<Value>(tx), None)
        .await
        .unwrap();

    let message = json!({
        "type": "user.created",
        "userId": "u1",
        "email": "a@b.com",
        "timestamp": "2024-01-01T00:00:00Z"
    });
    producer.produce("users", &message).await.unwrap();

    let (received, metadata) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, message);
    assert_eq!(metadata.topic, "users");

    let event: ReceivedEvent = serde_json::from_value(received).unwrap();
    match event {
        ReceivedEvent::Known {
            event: Event::UserCreated(created),
            ..
        } => {
            assert_eq!(created.user_id, "u1");
            assert_eq!(created.email, "a@b.com");
            assert!(created.name.is_none());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    handle.stop().await;
}

/// Emitters always route to the canonical topic
#[tokio::test]
async fn test_emitter_routes_to_canonical_topics() {
    let broker = InMemoryBroker::new();
    let config = MessagingConfig {
        enable_metrics: false,
        ..Default::default()
    };
    let service = MessagingService::new(config, Arc::new(broker.clone())).unwrap();

    service
        .emitter()
        .emit_user_created("u1", "a@b.com", Some("Ada".to_string()))
        .await
        .unwrap();
    service
        .emitter()
        .emit_email_sent("a@b.com", "Welcome", None)
        .await
        .unwrap();

    let users = broker.records("users");
    let emails = broker.records("emails");
    assert_eq!(users.len(), 1);
    assert_eq!(emails.len(), 1);

    let user_event: Event = serde_json::from_slice(users[0].payload().unwrap()).unwrap();
    assert_eq!(user_event.event_type(), EventType::UserCreated);
    let email_event: Value = serde_json::from_slice(emails[0].payload().unwrap()).unwrap();
    assert_eq!(email_event["type"], "email.sent");
    assert!(email_event.get("template").is_none());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_gauge_untouched_when_metrics_disabled() {
    let gauge = |role: &str| {
        MESSAGING_METRICS
            .active_connections
            .with_label_values(&[role])
            .get()
    };
    let before = (gauge("producer"), gauge("consumer"));

    let broker = InMemoryBroker::new();
    let connections = connections(&broker);
    connections.producer().await.unwrap();
    connections.consumer(Some("gauge-check")).await.unwrap();
    assert_eq!((gauge("producer"), gauge("consumer")), before);

    connections.shutdown().await.unwrap();
    assert_eq!((gauge("producer"), gauge("consumer")), before);
}
