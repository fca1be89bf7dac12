//! Error types for messaging operations

use crate::error::AppError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Boxed error returned by subscribed handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Client, producer or consumer failed to connect. The cached handle
    /// was invalidated and the next acquisition starts from scratch.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Send failed after the producer connected
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A subscribed handler failed for one message
    #[error("Handler failed for {topic}[{partition}]@{offset}: {reason}")]
    Handler {
        topic: String,
        partition: i32,
        offset: String,
        reason: String,
    },

    /// Bounded retry ran out of attempts
    #[error("Retries exhausted after {attempts} attempt(s): {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// Dead-letter record could not be written
    #[error("Dead letter write failed: {0}")]
    DeadLetterWrite(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Consume failed
    #[error("Consume failed: {0}")]
    Consume(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MessagingError {
    pub(crate) fn publish(topic: &str, reason: impl ToString) -> Self {
        MessagingError::Publish {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Configuration(msg) => AppError::Configuration(msg),
            MessagingError::Connection(msg) => AppError::Connection(msg),
            MessagingError::Serialization(msg) => AppError::Serialization(msg),
            err @ MessagingError::Publish { .. } => AppError::Publish(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
