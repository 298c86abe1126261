//! Surface Intents
//!
//! Everything a UI surface can ask the controller to do. Surfaces never
//! mutate the conversation; they dispatch a [`ChatIntent`] through
//! [`ChatController::dispatch`](crate::controller::ChatController::dispatch)
//! and re-render from the next published snapshot.
//!
//! Intents are serializable so a surface in another process (or a wasm
//! shell) can forward them as JSON.

use serde::{Deserialize, Serialize};

use crate::messages::MessageId;

/// Intents from a UI surface to the controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatIntent {
    // ============================================
    // Conversation
    // ============================================
    /// Submit a prompt
    Send {
        /// Prompt text; `None` sends the input field contents
        #[serde(default)]
        prompt: Option<String>,
    },

    /// Regenerate the answer to a user message
    Regenerate {
        /// The user message to answer again
        message_id: MessageId,
    },

    /// Stop the in-flight response
    Abort,

    // ============================================
    // Controls
    // ============================================
    /// Select the model for subsequent requests
    SetModel {
        /// Registry identifier
        model_id: String,
    },

    /// Input field edited
    SetInput {
        /// Full field contents
        text: String,
    },
}

impl ChatIntent {
    /// Send a specific prompt
    pub fn send(prompt: impl Into<String>) -> Self {
        Self::Send {
            prompt: Some(prompt.into()),
        }
    }

    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Regenerate { .. } => "regenerate",
            Self::Abort => "abort",
            Self::SetModel { .. } => "set_model",
            Self::SetInput { .. } => "set_input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_json_shape() {
        let json = serde_json::to_value(ChatIntent::send("Hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "send", "prompt": "Hi"}));

        let intent: ChatIntent = serde_json::from_str(r#"{"type":"send"}"#).unwrap();
        assert_eq!(intent, ChatIntent::Send { prompt: None });

        let intent: ChatIntent =
            serde_json::from_str(r#"{"type":"regenerate","message_id":"msg_3"}"#).unwrap();
        assert_eq!(
            intent,
            ChatIntent::Regenerate {
                message_id: MessageId("msg_3".to_string())
            }
        );
    }

    #[test]
    fn test_intent_names() {
        assert_eq!(ChatIntent::Abort.name(), "abort");
        assert_eq!(
            ChatIntent::SetModel {
                model_id: "qwen".into()
            }
            .name(),
            "set_model"
        );
    }
}
