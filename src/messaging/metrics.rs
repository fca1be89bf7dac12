//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages published counter
    pub messages_published: CounterVec,

    /// Message publish failures
    pub publish_failures: CounterVec,

    /// Message publish latency
    pub publish_latency: HistogramVec,

    /// Messages handed to a handler
    pub messages_consumed: CounterVec,

    /// Messages skipped because their payload was missing
    pub messages_skipped: CounterVec,

    /// Handler and decode failures
    pub handler_failures: CounterVec,

    /// Handlers that exhausted their retries
    pub retries_exhausted: CounterVec,

    /// Messages parked on the dead letter topic
    pub dead_lettered: CounterVec,

    /// Dead letter writes that failed
    pub dead_letter_failures: CounterVec,

    /// Active connections gauge
    pub active_connections: GaugeVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_published: register_counter_vec!(
            "messaging_messages_published_total",
            "Total number of messages published",
            &["topic"]
        )
        .expect("register messaging_messages_published_total"),

        publish_failures: register_counter_vec!(
            "messaging_publish_failures_total",
            "Total number of publish failures",
            &["topic"]
        )
        .expect("register messaging_publish_failures_total"),

        publish_latency: register_histogram_vec!(
            "messaging_publish_latency_seconds",
            "Message publish latency in seconds",
            &["topic"]
        )
        .expect("register messaging_publish_latency_seconds"),

        messages_consumed: register_counter_vec!(
            "messaging_messages_consumed_total",
            "Total number of messages handed to handlers",
            &["topic", "group"]
        )
        .expect("register messaging_messages_consumed_total"),

        messages_skipped: register_counter_vec!(
            "messaging_messages_skipped_total",
            "Total number of messages skipped for a missing payload",
            &["topic", "group"]
        )
        .expect("register messaging_messages_skipped_total"),

        handler_failures: register_counter_vec!(
            "messaging_handler_failures_total",
            "Total number of handler failures",
            &["topic", "group"]
        )
        .expect("register messaging_handler_failures_total"),

        retries_exhausted: register_counter_vec!(
            "messaging_retries_exhausted_total",
            "Total number of handler invocations that exhausted retries",
            &["topic"]
        )
        .expect("register messaging_retries_exhausted_total"),

        dead_lettered: register_counter_vec!(
            "messaging_dead_lettered_total",
            "Total number of messages written to the dead letter topic",
            &["topic"]
        )
        .expect("register messaging_dead_lettered_total"),

        dead_letter_failures: register_counter_vec!(
            "messaging_dead_letter_failures_total",
            "Total number of failed dead letter writes",
            &["topic"]
        )
        .expect("register messaging_dead_letter_failures_total"),

        active_connections: register_gauge_vec!(
            "messaging_active_connections",
            "Number of active messaging connections",
            &["role"]
        )
        .expect("register messaging_active_connections"),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}
