//! Wire frames exchanged over a realtime connection.
//!
//! Outbound frames are JSON text: either a [`Notification`]
//! (`{type, data, timestamp}`) or an [`Acknowledgement`]
//! (`{type: "ACK", messageId, timestamp}`). Inbound frames are parsed
//! leniently into [`InboundFrame`]; only the `messageId` field matters.
//!
//! Timestamps are epoch milliseconds rendered as a decimal string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall-clock time as epoch milliseconds, rendered as a string.
pub fn now_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Closed set of notification types.
///
/// The question-flavored legacy names are accepted on input so older
/// producers keep working.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// A new work item was created.
    #[serde(alias = "NEW_QUESTION")]
    NewItem,
    /// A work item changed state.
    #[serde(alias = "QUESTION_UPDATED")]
    ItemUpdated,
    /// A work item was claimed by a responder.
    #[serde(alias = "QUESTION_ACCEPTED")]
    ItemClaimed,
    /// A work item was closed.
    #[serde(alias = "QUESTION_CLOSED")]
    ItemClosed,
    /// A chat message between the two parties of an item.
    ChatMessage,
    /// Acknowledgement of an inbound frame.
    Ack,
}

impl NotificationType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewItem => "NEW_ITEM",
            Self::ItemUpdated => "ITEM_UPDATED",
            Self::ItemClaimed => "ITEM_CLAIMED",
            Self::ItemClosed => "ITEM_CLOSED",
            Self::ChatMessage => "CHAT_MESSAGE",
            Self::Ack => "ACK",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-originated message delivered to one or more connections.
///
/// The payload is opaque to the fan-out layer and is passed through
/// unmodified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    kind: NotificationType,
    data: Value,
    timestamp: String,
}

impl Notification {
    /// Build a notification stamped with the current time.
    pub fn new(kind: NotificationType, data: Value) -> Self {
        Self::with_timestamp(kind, data, now_millis())
    }

    /// Build a notification with an explicit timestamp.
    pub fn with_timestamp(kind: NotificationType, data: Value, timestamp: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            timestamp: timestamp.into(),
        }
    }

    /// Notification type.
    pub fn kind(&self) -> NotificationType {
        self.kind
    }

    /// Opaque payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Epoch-millisecond timestamp.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reply echoing a client-supplied message id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    #[serde(rename = "type")]
    kind: NotificationType,
    message_id: String,
    timestamp: String,
}

impl Acknowledgement {
    /// Acknowledge `message_id` at the current time.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            kind: NotificationType::Ack,
            message_id: message_id.into(),
            timestamp: now_millis(),
        }
    }

    /// The echoed id.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Epoch-millisecond timestamp.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

/// A client-originated frame.
///
/// Every field is optional and unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    /// Client-declared frame type, unused by the server.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Id to echo back in an acknowledgement.
    #[serde(default, deserialize_with = "lenient_id")]
    pub message_id: Option<String>,
}

impl InboundFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The message id, if present and non-empty.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Accept string or numeric ids; anything else counts as absent.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
