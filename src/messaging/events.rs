//! Event schema registry
//!
//! A closed set of event variants, each routed to exactly one canonical
//! topic. Consumers decode into [`ReceivedEvent`], which keeps tags this
//! build does not know about instead of failing the message.

use crate::messaging::error::MessagingResult;
use crate::messaging::producer::Producer;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use tracing::info;

/// Canonical topics
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Topic {
    Users,
    Emails,
    Notifications,
    Audit,
}

/// Discriminant tag of an [`Event`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, IntoStaticStr, EnumString, EnumIter,
)]
pub enum EventType {
    #[strum(serialize = "user.created")]
    UserCreated,
    #[strum(serialize = "user.updated")]
    UserUpdated,
    #[strum(serialize = "email.sent")]
    EmailSent,
}

impl EventType {
    /// Topic every event of this type is published to
    pub fn topic(&self) -> Topic {
        match self {
            EventType::UserCreated | EventType::UserUpdated => Topic::Users,
            EventType::EmailSent => Topic::Emails,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user_id: String,
    pub changes: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSent {
    pub to: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Domain events, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "user.created")]
    UserCreated(UserCreated),
    #[serde(rename = "user.updated")]
    UserUpdated(UserUpdated),
    #[serde(rename = "email.sent")]
    EmailSent(EmailSent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::UserCreated(_) => EventType::UserCreated,
            Event::UserUpdated(_) => EventType::UserUpdated,
            Event::EmailSent(_) => EventType::EmailSent,
        }
    }

    /// Canonical topic of this event
    pub fn topic(&self) -> Topic {
        self.event_type().topic()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::UserCreated(e) => e.timestamp,
            Event::UserUpdated(e) => e.timestamp,
            Event::EmailSent(e) => e.timestamp,
        }
    }
}

/// Event as decoded by a consumer.
///
/// Both variants keep the payload exactly as it arrived, so serializing a
/// received event reproduces the published JSON, including fields this
/// build does not model.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedEvent {
    Known { event: Event, raw: Value },
    /// Tag not recognized by this build
    Unknown { event_type: String, raw: Value },
}

impl ReceivedEvent {
    pub fn event_type(&self) -> &str {
        match self {
            ReceivedEvent::Known { event, .. } => event.event_type().into(),
            ReceivedEvent::Unknown { event_type, .. } => event_type,
        }
    }

    /// Typed event, when the tag is known
    pub fn event(&self) -> Option<&Event> {
        match self {
            ReceivedEvent::Known { event, .. } => Some(event),
            ReceivedEvent::Unknown { .. } => None,
        }
    }

    /// Payload as received
    pub fn raw(&self) -> &Value {
        match self {
            ReceivedEvent::Known { raw, .. } | ReceivedEvent::Unknown { raw, .. } => raw,
        }
    }
}

impl<'de> Deserialize<'de> for ReceivedEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let tag = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field("type"))?;

        if tag.parse::<EventType>().is_err() {
            return Ok(ReceivedEvent::Unknown {
                event_type: tag.to_string(),
                raw,
            });
        }

        let event = Event::deserialize(&raw).map_err(D::Error::custom)?;
        Ok(ReceivedEvent::Known { event, raw })
    }
}

impl Serialize for ReceivedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

/// Stamps events and publishes them to their canonical topic
#[derive(Clone)]
pub struct EventEmitter {
    producer: Producer,
}

impl EventEmitter {
    pub fn new(producer: Producer) -> Self {
        Self { producer }
    }

    /// Publish `event` to its canonical topic
    pub async fn emit(&self, event: &Event) -> MessagingResult<()> {
        let topic = event.topic();
        self.producer.produce(topic.as_ref(), event).await?;
        info!(event_type = %event.event_type(), topic = %topic, "Event emitted");
        Ok(())
    }

    pub async fn emit_user_created(
        &self,
        user_id: impl Into<String>,
        email: impl Into<String>,
        name: Option<String>,
    ) -> MessagingResult<()> {
        self.emit(&Event::UserCreated(UserCreated {
            user_id: user_id.into(),
            email: email.into(),
            name,
            timestamp: Utc::now(),
        }))
        .await
    }

    pub async fn emit_user_updated(
        &self,
        user_id: impl Into<String>,
        changes: Map<String, Value>,
    ) -> MessagingResult<()> {
        self.emit(&Event::UserUpdated(UserUpdated {
            user_id: user_id.into(),
            changes,
            timestamp: Utc::now(),
        }))
        .await
    }

    pub async fn emit_email_sent(
        &self,
        to: impl Into<String>,
        subject: impl Into<String>,
        template: Option<String>,
    ) -> MessagingResult<()> {
        self.emit(&Event::EmailSent(EmailSent {
            to: to.into(),
            subject: subject.into(),
            template,
            timestamp: Utc::now(),
        }))
        .await
    }
}
