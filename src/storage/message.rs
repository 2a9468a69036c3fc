//! Chat participants, messages and conversations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Forum user identifier
pub type UserId = i64;

/// Signed-in forum user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub id: UserId,
    /// Display name
    pub username: String,
    /// Bearer token for the REST API and the broker handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl User {
    /// Create a user with a token
    pub fn new(id: UserId, username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            token: Some(token.into()),
        }
    }

    /// Usable bearer token; blank tokens count as missing
    pub fn bearer_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// A user shown as a chat counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// User ID of the counterpart
    pub id: UserId,
    /// Display name
    pub username: String,
}

impl Contact {
    /// Create a contact
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// A chat message as exchanged with the REST API and the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-generated ID, used to recognise our own messages echoed back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Sender user ID
    pub sender_id: UserId,
    /// Recipient user ID
    pub recipient_id: UserId,
    /// Sender display name
    #[serde(default)]
    pub sender_name: String,
    /// Recipient display name
    #[serde(default)]
    pub recipient_name: String,
    /// Message text
    pub content: String,
    /// Creation time
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message from `user` to `contact`, stamped now
    pub fn outgoing(user: &User, contact: &Contact, content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            sender_id: user.id,
            recipient_id: contact.id,
            sender_name: user.username.clone(),
            recipient_name: contact.username.clone(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether `user_id` sent this message
    pub fn is_from(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }
}

/// The unordered pair of users a chat is between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversation {
    /// Signed-in user
    pub user_id: UserId,
    /// Counterpart
    pub contact_id: UserId,
}

impl Conversation {
    /// Conversation between a user and a contact
    pub fn between(user: &User, contact: &Contact) -> Self {
        Self {
            user_id: user.id,
            contact_id: contact.id,
        }
    }

    /// Whether a sender/recipient pair belongs here, in either direction
    pub fn involves(&self, sender_id: UserId, recipient_id: UserId) -> bool {
        (sender_id == self.user_id && recipient_id == self.contact_id)
            || (sender_id == self.contact_id && recipient_id == self.user_id)
    }

    /// REST path of the conversation history
    pub fn history_path(&self) -> String {
        format!("/messages/{}/{}", self.user_id, self.contact_id)
    }
}

/// What the chat window needs to draw one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Message text
    pub content: String,
    /// Sent by the signed-in user
    pub is_sender_message: bool,
    /// Sender display name
    pub sender: String,
}

impl MessageView {
    /// Project a message for the signed-in user
    pub fn from_message(message: &Message, current_user_id: UserId) -> Self {
        Self {
            content: message.content.clone(),
            is_sender_message: message.is_from(current_user_id),
            sender: message.sender_name.clone(),
        }
    }
}

/// Lenient timestamp parsing: RFC 3339, zone-less ISO (taken as UTC), or epoch millis
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", ms))),
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|naive| naive.and_utc())
                })
                .map_err(|e| de::Error::custom(format!("invalid timestamp {:?}: {}", text, e))),
        }
    }
}
