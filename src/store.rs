use std::collections::HashSet;

use thiserror::Error;

use crate::message::{Message, MessageId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("message {0} is already in the conversation")]
    DuplicateId(MessageId),
}

/// Append-only log of conversation messages, in display order.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) -> Result<&Message, StoreError> {
        if !self.ids.insert(message.id) {
            return Err(StoreError::DuplicateId(message.id));
        }
        self.messages.push(message);
        Ok(&self.messages[self.messages.len() - 1])
    }

    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
