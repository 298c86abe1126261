//! Conversation State
//!
//! The ordered message log plus the flags derived from the request lifecycle.
//! Only the [`ChatController`](crate::controller::ChatController) mutates it;
//! every method here is a single mutation, and the controller publishes one
//! snapshot after each.
//!
//! # Invariants
//!
//! - The log starts with an assistant greeting.
//! - At most one message is `streaming`, and only while `loading` is true.
//! - `loading` is true iff a request session is active.

use std::sync::Arc;

use crate::messages::{
    ChatState, ConversationSnapshot, HistoryEntry, Message, MessageId, MessageRole,
};

/// The conversation owned by the controller
#[derive(Clone, Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    state: ChatState,
    active_model: String,
    input: String,
}

impl ConversationState {
    /// Create a conversation that opens with an assistant greeting
    pub fn new(greeting: impl Into<String>, active_model: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(MessageRole::Assistant, greeting)],
            state: ChatState::Ready,
            active_model: active_model.into(),
            input: String::new(),
        }
    }

    /// All messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get message by ID
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Whether a request session is active
    pub fn is_loading(&self) -> bool {
        self.state != ChatState::Ready
    }

    /// Current operational state
    pub fn state(&self) -> ChatState {
        self.state
    }

    /// Model identifier new requests will use
    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    /// Current contents of the input field
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Replace the input field contents
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Take the input field contents, leaving it empty
    pub fn take_input(&mut self) -> String {
        std::mem::take(&mut self.input)
    }

    /// Switch the model used by subsequent requests
    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.active_model = model_id.into();
    }

    /// Set the operational state; `Ready` clears `loading`
    pub fn set_state(&mut self, state: ChatState) {
        self.state = state;
    }

    /// Append a user message
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Message::new(MessageRole::User, content))
    }

    /// Append a complete assistant message
    pub fn push_assistant(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Message::new(MessageRole::Assistant, content))
    }

    /// Append the empty assistant message a response streams into
    pub fn start_assistant(&mut self) -> MessageId {
        self.push(Message::placeholder())
    }

    /// Append text to a streaming message
    ///
    /// Returns false if the slot no longer exists or is already frozen.
    pub fn append_to(&mut self, id: &MessageId, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(msg) if msg.streaming => {
                msg.append(text);
                true
            }
            _ => false,
        }
    }

    /// Freeze a streaming message
    pub fn finish(&mut self, id: &MessageId) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(msg) if msg.streaming => {
                msg.complete();
                true
            }
            _ => false,
        }
    }

    /// Prepare the log for regenerating the answer to `target`
    ///
    /// Drops the trailing message if it is assistant-authored and follows the
    /// target, then returns the history up to and including the target.
    /// Returns `None` (log untouched) if `target` is not a user message here.
    ///
    /// Only the trailing message is ever removed. For an earlier target the
    /// later exchanges stay in the log, and the regenerated answer, which is
    /// conditioned on the history up to the target only, is appended at the
    /// end of the log.
    pub fn truncate_for_regenerate(&mut self, target: &MessageId) -> Option<Vec<HistoryEntry>> {
        let target_idx = self
            .messages
            .iter()
            .position(|m| &m.id == target && m.is_user())?;

        let trailing_assistant = self
            .messages
            .last()
            .is_some_and(Message::is_assistant);
        if trailing_assistant && self.messages.len() - 1 > target_idx {
            let removed = self.messages.pop();
            tracing::debug!(
                removed = ?removed.map(|m| m.id),
                "Dropped trailing assistant message for regeneration"
            );
        }

        Some(
            self.messages[..=target_idx]
                .iter()
                .map(HistoryEntry::from)
                .collect(),
        )
    }

    /// Provider-facing history of the whole log
    ///
    /// An empty streaming placeholder is not part of the history.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| !(m.streaming && m.content.is_empty()))
            .map(HistoryEntry::from)
            .collect()
    }

    /// Build the immutable value published to surfaces
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: Arc::from(self.messages.as_slice()),
            loading: self.is_loading(),
            state: self.state,
            active_model: self.active_model.clone(),
            input: self.input.clone(),
        }
    }

    fn push(&mut self, message: Message) -> MessageId {
        let id = message.id.clone();
        self.messages.push(message);
        id
    }
}
