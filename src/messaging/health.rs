//! Readiness reporting
//!
//! The Kafka entry is shallow: it reports whether the shared client object
//! can be constructed, not whether the cluster answers. Treat it as a
//! readiness hint, never as a liveness guarantee.

use crate::messaging::connection::ConnectionManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tracing::warn;

/// Overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Status of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceStatus {
    Connected,
    Disconnected,
    Available,
    Unavailable,
}

impl ServiceStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, ServiceStatus::Connected | ServiceStatus::Available)
    }
}

/// Collaborator reporting its own connectivity (database, cache, ...)
#[async_trait]
pub trait ServiceCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `true` when the service answered
    async fn check(&self) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStatus>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// HTTP-style status code for the report
    pub fn status_code(&self) -> u16 {
        if self.is_healthy() {
            200
        } else {
            503
        }
    }
}

/// Builds [`HealthReport`]s
#[derive(Clone)]
pub struct HealthProbe {
    connections: Arc<ConnectionManager>,
    checks: Vec<Arc<dyn ServiceCheck>>,
}

impl HealthProbe {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            checks: Vec::new(),
        }
    }

    /// Register a collaborator check
    pub fn with_check(mut self, check: Arc<dyn ServiceCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Shallow Kafka readiness: can the shared client be obtained
    pub fn kafka_status(&self) -> ServiceStatus {
        match self.connections.client() {
            Ok(_) => ServiceStatus::Available,
            Err(e) => {
                warn!(error = %e, "Kafka client unavailable");
                ServiceStatus::Unavailable
            }
        }
    }

    pub async fn report(&self) -> HealthReport {
        let mut services = BTreeMap::new();

        for check in &self.checks {
            let status = if check.check().await {
                ServiceStatus::Connected
            } else {
                ServiceStatus::Disconnected
            };
            services.insert(check.name().to_string(), status);
        }
        services.insert("kafka".to_string(), self.kafka_status());

        let status = if services.values().all(ServiceStatus::is_up) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::config::KafkaConfig;
    use crate::messaging::kafka::KafkaConnector;
    use crate::messaging::memory::InMemoryBroker;

    struct StaticCheck(&'static str, bool);

    #[async_trait]
    impl ServiceCheck for StaticCheck {
        fn name(&self) -> &str {
            self.0
        }

        async fn check(&self) -> bool {
            self.1
        }
    }

    fn probe(config: KafkaConfig) -> HealthProbe {
        let broker = InMemoryBroker::new();
        HealthProbe::new(Arc::new(ConnectionManager::new(config, Arc::new(broker))))
    }

    #[tokio::test]
    async fn test_kafka_only_report_is_healthy() {
        let report = probe(KafkaConfig::default()).report().await;

        assert!(report.is_healthy());
        assert_eq!(report.status_code(), 200);
        assert_eq!(report.services["kafka"], ServiceStatus::Available);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["services"]["kafka"], "available");
    }

    #[tokio::test]
    async fn test_failed_collaborator_degrades() {
        let report = probe(KafkaConfig::default())
            .with_check(Arc::new(StaticCheck("database", true)))
            .with_check(Arc::new(StaticCheck("redis", false)))
            .report()
            .await;

        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.status_code(), 503);
        assert_eq!(report.services["database"], ServiceStatus::Connected);
        assert_eq!(report.services["redis"], ServiceStatus::Disconnected);
    }

    #[test]
    fn test_unbuildable_client_is_unavailable() {
        let config = KafkaConfig {
            brokers: String::new(),
            ..Default::default()
        };
        let connections = ConnectionManager::new(config, Arc::new(KafkaConnector));
        let probe = HealthProbe::new(Arc::new(connections));

        assert_eq!(probe.kafka_status(), ServiceStatus::Unavailable);
    }
}
