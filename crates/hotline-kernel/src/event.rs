//! Gateway events and outbound messages.
//!
//! The wire format of the upstream chat gateway is not modelled here; a
//! gateway implementation decodes its frames into [`GatewayEvent`]s and the
//! host wraps each one in an [`EventEnvelope`] before dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as seen by the application module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let author_id = author_id.into();
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            author_name: author_id.clone(),
            author_id,
            content: content.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_name = name.into();
        self
    }
}

/// Inbound event delivered by the gateway connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum GatewayEvent {
    /// The session is established (sent once per connection).
    Ready { session_id: String },
    /// A message was posted in a channel the service can see.
    MessageCreated(ChatMessage),
    /// A message was deleted.
    MessageDeleted { channel_id: String, message_id: String },
    /// Anything the gateway forwards without a dedicated variant.
    Custom { name: String, payload: serde_json::Value },
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MessageCreated(_) => "message_created",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::Custom { .. } => "custom",
        }
    }

    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            Self::MessageCreated(msg) => Some(msg),
            _ => None,
        }
    }
}

/// An inbound event tagged with its position in the connection's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic per-connection sequence number.
    pub sequence: u64,
    /// Shard the event arrived on.
    pub shard: u32,
    pub received_at: DateTime<Utc>,
    pub event: GatewayEvent,
}

impl EventEnvelope {
    pub fn new(sequence: u64, shard: u32, event: GatewayEvent) -> Self {
        Self {
            sequence,
            shard,
            received_at: Utc::now(),
            event,
        }
    }
}

/// A message the service sends back through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub content: String,
    /// Message this one replies to, if any.
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to: None,
        }
    }

    pub fn reply(to: &ChatMessage, content: impl Into<String>) -> Self {
        Self {
            channel_id: to.channel_id.clone(),
            content: content.into(),
            reply_to: Some(to.id.clone()),
        }
    }
}
