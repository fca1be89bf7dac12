//! Default handlers for the `users` and `emails` topics

use crate::messaging::consumer::MessageHandler;
use crate::messaging::envelope::DeliveryMetadata;
use crate::messaging::error::BoxError;
use crate::messaging::events::{Event, ReceivedEvent};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Handles user lifecycle events
#[derive(Debug, Clone, Copy, Default)]
pub struct UserEventHandler;

#[async_trait]
impl MessageHandler<ReceivedEvent> for UserEventHandler {
    async fn handle(&self, event: ReceivedEvent, metadata: DeliveryMetadata) -> Result<(), BoxError> {
        debug!(
            event_type = event.event_type(),
            topic = %metadata.topic,
            offset = %metadata.offset,
            "Processing user event"
        );

        match event {
            ReceivedEvent::Known {
                event: Event::UserCreated(created),
                ..
            } => {
                info!(user_id = %created.user_id, email = %created.email, "User created");
            }
            ReceivedEvent::Known {
                event: Event::UserUpdated(updated),
                ..
            } => {
                let changed: Vec<&str> = updated.changes.keys().map(String::as_str).collect();
                info!(user_id = %updated.user_id, changes = ?changed, "User updated");
            }
            ReceivedEvent::Known {
                event: other @ Event::EmailSent(_),
                ..
            } => {
                warn!(
                    event_type = %other.event_type(),
                    topic = %metadata.topic,
                    "Event published to the wrong topic, skipping"
                );
            }
            ReceivedEvent::Unknown { event_type, .. } => {
                warn!(event_type = %event_type, topic = %metadata.topic, "Unknown event type");
            }
        }

        Ok(())
    }
}

/// Handles email delivery events
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailEventHandler;

#[async_trait]
impl MessageHandler<ReceivedEvent> for EmailEventHandler {
    async fn handle(&self, event: ReceivedEvent, metadata: DeliveryMetadata) -> Result<(), BoxError> {
        match event {
            ReceivedEvent::Known {
                event: Event::EmailSent(sent),
                ..
            } => {
                info!(to = %sent.to, subject = %sent.subject, "Email sent event received");
            }
            other => {
                debug!(
                    event_type = other.event_type(),
                    topic = %metadata.topic,
                    "Ignoring non-email event"
                );
            }
        }

        Ok(())
    }
}
