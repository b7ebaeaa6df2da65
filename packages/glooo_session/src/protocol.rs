//! Text frames exchanged over the duplex connection.

use serde::{Deserialize, Serialize};

use crate::types::{Id, Message};

/// Frames the client writes to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Direct {
        to_id: String,
        content: String,
        chat_id: String,
    },
}

impl OutboundFrame {
    pub fn direct(to: &Id, content: impl Into<String>, conversation: &Id) -> Self {
        Self::Direct {
            to_id: to.as_str().to_string(),
            content: content.into(),
            chat_id: conversation.as_str().to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A successfully parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A message pushed by the server (a peer's message or an echo).
    Message(Message),
    /// The server could not deliver or persist something we sent.
    ServerError(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireFrame {
    Error { err: serde_json::Value },
    Message(Message),
}

/// Parse one inbound text frame.
///
/// Anything that is neither a message nor a server error object is an
/// error; callers drop such frames.
pub fn parse_inbound(raw: &str) -> Result<InboundFrame, serde_json::Error> {
    match serde_json::from_str::<WireFrame>(raw)? {
        WireFrame::Message(message) => Ok(InboundFrame::Message(message)),
        WireFrame::Error { err } => Ok(InboundFrame::ServerError(match err {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })),
    }
}
