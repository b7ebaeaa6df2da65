use tracing::debug;

use crate::types::{Conversation, Id, Message, MessageSummary};

/// Cached list of the local user's conversations, in fetch order.
///
/// Entries only ever come from the authoritative fetch; pushes update the
/// summary of an existing entry but never create one.
#[derive(Debug, Default)]
pub struct ConversationDirectory {
    entries: Vec<Conversation>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory.
    pub fn refresh(&mut self, conversations: Vec<Conversation>) {
        debug!(count = conversations.len(), "directory refreshed");
        self.entries = conversations;
    }

    /// Update `last_message` for `conversation`. Returns false (and changes
    /// nothing) when the conversation is not in the directory.
    pub fn touch(&mut self, conversation: &Id, message: &Message) -> bool {
        match self.entries.iter_mut().find(|c| &c.id == conversation) {
            Some(entry) => {
                entry.last_message = Some(MessageSummary::from(message));
                true
            }
            None => {
                debug!(%conversation, "push for unknown conversation, directory unchanged");
                false
            }
        }
    }

    pub fn find(&self, conversation: &Id) -> Option<&Conversation> {
        self.entries.iter().find(|c| &c.id == conversation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.entries.iter()
    }

    /// Conversation at a 1-based position, as shown in listings.
    pub fn nth(&self, position: usize) -> Option<&Conversation> {
        position.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
