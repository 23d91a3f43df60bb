use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use crate::error::ValidationError;
use crate::types::WireMessage;

/// Ordered turns of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHistory {
    messages: Vec<Message>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Inserts at the end and returns the new message's index.
    pub fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<Message> {
        (index < self.messages.len()).then(|| self.messages.remove(index))
    }

    /// Keeps `0..=index` and drops everything after it.
    pub fn truncate_after(&mut self, index: usize) -> Result<(), ValidationError> {
        self.check_index(index)?;
        self.messages.truncate(index + 1);
        Ok(())
    }

    /// True iff no user message exists after `index`.
    pub fn is_latest_user_message(&self, index: usize) -> bool {
        !self
            .messages
            .iter()
            .skip(index.saturating_add(1))
            .any(|message| message.role == Role::User)
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.last_assistant_index().map(|index| &self.messages[index])
    }

    pub fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|message| message.role == Role::Assistant)
    }

    /// Nearest user message strictly before `index`.
    pub fn preceding_user_index(&self, index: usize) -> Option<usize> {
        self.messages[..index.min(self.messages.len())]
            .iter()
            .rposition(|message| message.role == Role::User)
    }

    /// Messages for display, with their storage indices. Tool-role entries,
    /// including transient processing markers, are hidden.
    pub fn filter_visible(&self) -> Vec<(usize, &Message)> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, message)| message.role != Role::Tool)
            .collect()
    }

    /// Drops every transient processing marker, returning how many went.
    pub fn remove_transient(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| !message.is_transient());
        before - self.messages.len()
    }

    /// Removes the transient marker for one tool call, if present.
    pub fn remove_processing(&mut self, tool_call_id: &str) -> bool {
        let position = self.messages.iter().position(|message| {
            message.is_transient() && message.tool_call_id.as_deref() == Some(tool_call_id)
        });
        match position {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Wire form of the sendable history, skipping transient markers.
    pub fn to_wire(&self) -> Vec<WireMessage> {
        self.wire_range(self.messages.len())
    }

    /// Wire form of `0..end`, skipping transient markers.
    pub fn wire_range(&self, end: usize) -> Vec<WireMessage> {
        self.messages[..end.min(self.messages.len())]
            .iter()
            .filter(|message| !message.is_transient())
            .map(Message::to_wire)
            .collect()
    }

    fn check_index(&self, index: usize) -> Result<(), ValidationError> {
        if index >= self.messages.len() {
            return Err(ValidationError::InvalidIndex {
                index,
                len: self.messages.len(),
            });
        }
        Ok(())
    }
}

impl From<Vec<Message>> for MessageHistory {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
