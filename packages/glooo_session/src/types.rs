//! Data model shared by the store, the directory and the wire protocol.
//!
//! Identifiers travel on the wire wrapped as `{ "$oid": "<hex>" }`; inside the
//! crate they are opaque strings compared by exact match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque identifier for a user, conversation or message.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Id(String);

impl Id {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Serialize)]
struct ObjectIdRef<'a> {
    #[serde(rename = "$oid")]
    oid: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Wrapped {
        #[serde(rename = "$oid")]
        oid: String,
    },
    Bare(String),
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ObjectIdRef { oid: &self.0 }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match IdRepr::deserialize(deserializer)? {
            IdRepr::Wrapped { oid } | IdRepr::Bare(oid) => Ok(Id(oid)),
        }
    }
}

/// A single chat message.
///
/// `id` is absent until the server has persisted the message; optimistic
/// entries created on send never get one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, alias = "_id")]
    pub id: Option<Id>,
    #[serde(rename = "from_id", default)]
    pub sender_id: Option<Id>,
    #[serde(rename = "to_id")]
    pub recipient_id: Id,
    #[serde(rename = "chat_id")]
    pub conversation_id: Id,
    pub content: String,
    /// Local send time. Only set on optimistic messages and never used for
    /// ordering.
    #[serde(skip)]
    pub origin_timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Build the local echo of a message the user is about to send.
    pub fn optimistic(
        sender: Id,
        recipient: Id,
        conversation: Id,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            sender_id: Some(sender),
            recipient_id: recipient,
            conversation_id: conversation,
            content: content.into(),
            origin_timestamp: Some(Utc::now()),
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_from(&self, user: &Id) -> bool {
        self.sender_id.as_ref() == Some(user)
    }
}

/// Directory-level summary of the latest message in a conversation.
///
/// Kept looser than [`Message`]: a freshly created chat carries a placeholder
/// with null identifiers and empty content.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    #[serde(rename = "from_id", default)]
    pub sender_id: Option<Id>,
    #[serde(default)]
    pub content: String,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
        }
    }
}

/// The other participant of a two-party conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counterpart {
    pub id: Id,
    pub name: String,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Id,
    #[serde(rename = "receiver")]
    pub counterpart: Counterpart,
    #[serde(
        rename = "last_message",
        alias = "last_updated_message",
        default
    )]
    pub last_message: Option<MessageSummary>,
}

impl Conversation {
    /// Preview text for the directory listing.
    pub fn preview(&self) -> &str {
        match &self.last_message {
            Some(summary) if !summary.content.is_empty() => &summary.content,
            _ => "No messages yet",
        }
    }

    /// Who wrote `message`: the counterpart's name, or "Me" for anything
    /// the counterpart did not send (including optimistic entries).
    pub fn author_label(&self, message: &Message) -> &str {
        if message.is_from(&self.counterpart.id) {
            &self.counterpart.name
        } else {
            "Me"
        }
    }
}
