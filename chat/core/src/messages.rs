//! Conversation Messages
//!
//! The data model shared by the controller and every UI surface: individual
//! chat messages, and the snapshot value surfaces render from.
//!
//! # Design Philosophy
//!
//! Surfaces are pure renderers. They never hold a mutable reference to the
//! conversation; they receive a complete [`ConversationSnapshot`] after every
//! mutation and dispatch intents back to the controller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Model output, including the greeting and error reports
    Assistant,
}

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Whether the message is the live target of a streaming response
    pub streaming: bool,
}

impl Message {
    /// Create a complete message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            streaming: false,
        }
    }

    /// Create an empty assistant message that a response will stream into
    pub fn placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            content: String::new(),
            streaming: true,
        }
    }

    /// Append streamed text
    pub fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Freeze the message once its stream has ended
    pub fn complete(&mut self) {
        self.streaming = false;
    }

    /// Whether this message was written by the user
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    /// Whether this message was written by the assistant
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }
}

/// One `{role, content}` pair as sent to a provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who sent the message
    pub role: MessageRole,
    /// The message text
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Coarse operational state, for spinners and status lines
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatState {
    /// Idle, accepting input
    Ready,
    /// Request issued, waiting for the provider to answer
    Thinking,
    /// Response is streaming in
    Responding,
}

impl ChatState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Thinking => "Thinking...",
            Self::Responding => "Responding...",
        }
    }
}

/// Immutable view of the conversation published to surfaces
///
/// Every mutation publishes a fresh snapshot, so a surface can never observe a
/// half-applied change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    /// All messages, oldest first
    pub messages: Arc<[Message]>,
    /// Whether a request session is active
    pub loading: bool,
    /// Operational state
    pub state: ChatState,
    /// Model identifier new requests will use
    pub active_model: String,
    /// Current contents of the input field
    pub input: String,
}

impl ConversationSnapshot {
    /// The last message, if any
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent user message, if any
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_user())
    }
}
