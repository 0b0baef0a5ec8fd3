//! Bounded conversation memory.
//!
//! Turns accumulate as the loop runs; after every append the store prunes
//! itself to the most recent `limit` turns. Pruning drops whole turns only
//! and always keeps at least the newest one, so the backend is never handed
//! a half-truncated exchange.

use std::collections::VecDeque;

use crate::error::AgentError;
use crate::types::ChatMessage;

/// Default turn limit, matching what the loop can usefully replay.
pub const DEFAULT_MEMORY_LIMIT: usize = 100;

/// Raw prompt accepted by a run: plain text, a single turn, or a sequence.
#[derive(Debug, Clone)]
pub enum Prompt {
    Text(String),
    Message(ChatMessage),
    Messages(Vec<ChatMessage>),
}

impl Prompt {
    /// Normalize into turns. Text becomes a user turn; an empty sequence is
    /// the one remaining invalid shape.
    pub fn into_turns(self) -> Result<Vec<ChatMessage>, AgentError> {
        match self {
            Self::Text(text) => Ok(vec![ChatMessage::user(text).build()]),
            Self::Message(message) => Ok(vec![message]),
            Self::Messages(messages) if messages.is_empty() => {
                Err(AgentError::InvalidPromptFormat)
            }
            Self::Messages(messages) => Ok(messages),
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<ChatMessage> for Prompt {
    fn from(message: ChatMessage) -> Self {
        Self::Message(message)
    }
}

impl From<Vec<ChatMessage>> for Prompt {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self::Messages(messages)
    }
}

/// Bounded store of conversation turns.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<ChatMessage>,
    limit: usize,
}

impl ConversationMemory {
    /// Create a store keeping at most `limit` turns (minimum one).
    pub fn new(limit: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Create a store with the default limit.
    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT)
    }

    /// Append one turn, then prune.
    pub fn append(&mut self, turn: ChatMessage) {
        self.turns.push_back(turn);
        self.prune();
    }

    /// Append several turns, then prune once.
    pub fn append_all(&mut self, turns: impl IntoIterator<Item = ChatMessage>) {
        self.turns.extend(turns);
        self.prune();
    }

    /// Immutable copy of the history, oldest first. This is what gets handed
    /// to the backend; later appends do not affect it.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn prune(&mut self) {
        if self.turns.len() <= self.limit {
            return;
        }
        let dropped = self.turns.len() - self.limit;
        tracing::debug!(
            limit = self.limit,
            dropped,
            "pruning conversation history to most recent turns"
        );
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::with_default_limit()
    }
}
