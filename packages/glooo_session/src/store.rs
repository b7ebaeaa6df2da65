use std::collections::HashMap;
use tracing::debug;

use crate::types::{Id, Message};

/// Per-conversation log state.
#[derive(Debug, Default)]
struct ConversationLog {
    messages: Vec<Message>,
    history_loaded: bool,
}

/// Append-only message logs, one per conversation.
///
/// Order within a log is call order into the store. Nothing is ever
/// re-sorted by timestamp, and optimistic entries are not collapsed with
/// their server echo.
#[derive(Debug, Default)]
pub struct MessageStore {
    logs: HashMap<Id, ConversationLog>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log for `conversation` with server-ordered history.
    pub fn load_history(&mut self, conversation: &Id, messages: Vec<Message>) {
        debug!(%conversation, count = messages.len(), "loading history");
        let log = self.logs.entry(conversation.clone()).or_default();
        log.messages = messages;
        log.history_loaded = true;
    }

    /// Append a locally originated message before the server has seen it.
    pub fn append_optimistic(&mut self, conversation: &Id, message: Message) {
        debug_assert!(message.id.is_none(), "optimistic messages carry no id");
        self.append(conversation, message);
    }

    /// Append a message delivered by the server.
    pub fn append_inbound(&mut self, conversation: &Id, message: Message) {
        self.append(conversation, message);
    }

    fn append(&mut self, conversation: &Id, message: Message) {
        self.logs
            .entry(conversation.clone())
            .or_default()
            .messages
            .push(message);
    }

    /// The log for `conversation`, or an empty slice if none exists yet.
    pub fn get(&self, conversation: &Id) -> &[Message] {
        self.logs
            .get(conversation)
            .map(|log| log.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Whether any log (history or appended) exists for `conversation`.
    pub fn contains(&self, conversation: &Id) -> bool {
        self.logs.contains_key(conversation)
    }

    /// Whether history has been fetched for `conversation`.
    pub fn has_history(&self, conversation: &Id) -> bool {
        self.logs
            .get(conversation)
            .is_some_and(|log| log.history_loaded)
    }

    /// Number of optimistic entries still shown in `conversation`.
    pub fn pending_count(&self, conversation: &Id) -> usize {
        self.get(conversation)
            .iter()
            .filter(|m| m.is_optimistic())
            .count()
    }
}
