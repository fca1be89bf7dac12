//! Event messaging over a partitioned log broker.
//!
//! `event_relay` wraps a Kafka cluster with typed event schemas, a shared
//! connection registry, per-message failure isolation on the consuming side,
//! bounded retries with linear backoff, and dead-letter fallback.
//!
//! See [`messaging`] for the component overview.

pub mod config;
pub mod error;
pub mod messaging;
pub mod telemetry;

pub use error::{AppError, Result};
