use event_relay::config::Config;
use event_relay::messaging::CommitPolicy;
use event_relay::AppError;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_defaults_match_documented_values() {
    let config = assert_ok!(Config::load_file(None));
    let kafka = &config.messaging.kafka;

    assert_eq!(kafka.client_id, "event-relay");
    assert_eq!(kafka.group_id, "event-relay-group");
    assert_eq!(kafka.request_timeout_ms, 30000);
    assert_eq!(kafka.transport_retry.initial_retry_time_ms, 100);
    assert_eq!(kafka.transport_retry.retries, 8);
    assert_eq!(kafka.producer.max_in_flight_requests, 1);
    assert!(kafka.producer.idempotent);
    assert_eq!(kafka.consumer.session_timeout_ms, 30000);
    assert_eq!(kafka.consumer.heartbeat_interval_ms, 3000);
    assert_eq!(kafka.consumer.max_bytes_per_partition, 1_048_576);
    assert_eq!(kafka.consumer.commit_policy, CommitPolicy::AfterHandler);
    assert_eq!(config.messaging.retry.base_delay_ms, 1000);
}

#[test]
fn test_file_overrides_defaults() {
    let file = toml_file(
        r#"
[messaging]
dlq_topic = "parked"

[messaging.kafka]
brokers = "kafka-1:9092,kafka-2:9093"
group_id = "billing"

[messaging.kafka.consumer]
commit_policy = "before_handler"
"#,
    );

    let config = assert_ok!(Config::load_file(Some(file.path())));
    assert_eq!(config.messaging.dlq_topic, "parked");
    assert_eq!(
        config.messaging.kafka.broker_list(),
        vec!["kafka-1:9092", "kafka-2:9093"]
    );
    assert_eq!(config.messaging.kafka.group_id, "billing");
    // Untouched keys keep their defaults
    assert_eq!(config.messaging.kafka.client_id, "event-relay");
    assert_eq!(
        config.messaging.kafka.consumer.commit_policy,
        CommitPolicy::BeforeHandler
    );
    assert_eq!(config.messaging.kafka.consumer.session_timeout_ms, 30000);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = assert_ok!(Config::load_file(Some(&dir.path().join("absent.toml"))));
    assert_eq!(config.messaging.kafka.brokers, "localhost:9092");
}

#[test]
fn test_invalid_broker_list_is_configuration_error() {
    let file = toml_file(
        r#"
[messaging.kafka]
brokers = "kafka-1"
"#,
    );

    let err = assert_err!(Config::load_file(Some(file.path())));
    assert!(matches!(err, AppError::Configuration(_)), "got {err:?}");
}

#[test]
fn test_zero_retries_is_rejected() {
    let file = toml_file(
        r#"
[messaging.retry]
max_retries = 0
"#,
    );

    let err = assert_err!(Config::load_file(Some(file.path())));
    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
}

/// Environment handling lives in one test; the variables are process-wide
#[test]
fn test_environment_overrides() {
    std::env::set_var("EVENT_RELAY__MESSAGING__KAFKA__CLIENT_ID", "relay-from-env");
    std::env::set_var("EVENT_RELAY__MESSAGING__RETRY__MAX_RETRIES", "5");
    std::env::set_var("KAFKA_BROKERS", "legacy-1:9092");
    std::env::set_var("KAFKA_GROUP_ID", "legacy-group");

    let loaded = Config::load_from(None);

    std::env::remove_var("EVENT_RELAY__MESSAGING__KAFKA__CLIENT_ID");
    std::env::remove_var("EVENT_RELAY__MESSAGING__RETRY__MAX_RETRIES");
    std::env::remove_var("KAFKA_BROKERS");
    std::env::remove_var("KAFKA_GROUP_ID");

    let config = assert_ok!(loaded);
    assert_eq!(config.messaging.kafka.client_id, "relay-from-env");
    assert_eq!(config.messaging.retry.max_retries, 5);
    assert_eq!(config.messaging.kafka.brokers, "legacy-1:9092");
    assert_eq!(config.messaging.kafka.group_id, "legacy-group");
}
