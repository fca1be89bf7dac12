use anyhow::Context;
use event_relay::{
    config::Config,
    messaging::{init_messaging_metrics, MessagingService},
    telemetry::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::process::exit(1);
    });

    init_tracing(&config.observability);

    tracing::info!(
        service = %config.observability.service_name,
        "Starting event relay v{}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        brokers = %config.messaging.kafka.brokers,
        group_id = %config.messaging.kafka.group_id,
        commit_policy = ?config.messaging.kafka.consumer.commit_policy,
        "Kafka configuration loaded"
    );

    if config.messaging.enable_metrics {
        init_messaging_metrics();
        tracing::info!("Prometheus metrics initialized");
    }

    let messaging = MessagingService::kafka(config.messaging.clone())
        .context("failed to create messaging service")?;

    let consumers = messaging
        .start_default_consumers()
        .await
        .context("failed to start consumers")?;

    tracing::info!(count = consumers.len(), "Consumers running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");

    for consumer in consumers {
        let group_id = consumer.group_id().to_string();
        consumer.stop().await;
        tracing::info!(group_id = %group_id, "Consumer stopped");
    }

    if let Err(e) = messaging.shutdown().await {
        tracing::error!(error = %e, "Error during messaging shutdown");
    }

    tracing::info!("Event relay stopped");
    Ok(())
}
