//! Chatstream Core - Headless Streaming Chat Client
//!
//! This crate provides the core of a chat client that talks to interchangeable
//! LLM providers over token-streaming HTTP, completely independent of any UI
//! framework. It can drive a browser shell, a desktop app, a TUI, or run
//! headless under test.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         UI Surfaces                           │
//! │     render ConversationSnapshot      dispatch ChatIntent      │
//! └───────────────▲──────────────────────────────┬────────────────┘
//!                 │ watch                        │
//! ┌───────────────┴──────────────────────────────▼────────────────┐
//! │                       ChatController                          │
//! │  ┌──────────────┐  ┌───────────────┐  ┌────────────────────┐  │
//! │  │ Conversation │  │ RequestSession│  │   ModelRegistry    │  │
//! │  │    State     │  │ (token, slot) │  │ (adapter, bearer)  │  │
//! │  └──────────────┘  └───────┬───────┘  └────────────────────┘  │
//! └────────────────────────────┼──────────────────────────────────┘
//!                              │ spawned task
//!               ChatBackend ──▶ SseDecoder ──▶ deltas
//! ```
//!
//! # Key Types
//!
//! - [`ChatController`]: Owns the conversation and the request lifecycle
//! - [`ConversationSnapshot`]: Immutable state published to surfaces
//! - [`ChatIntent`]: Everything a surface can ask for
//! - [`ModelRegistry`]: Model id to endpoint, credential and adapter
//! - [`ChatBackend`]: Transport seam, [`HttpBackend`] in production
//!
//! # Quick Start
//!
//! ```ignore
//! use chatstream_core::{load_config, ChatController, ChatIntent, HttpBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     chatstream_core::logging::init()?;
//!
//!     let config = load_config()?;
//!     let backend = HttpBackend::from_config(&config)?;
//!     let mut controller = ChatController::from_config(backend, &config)?;
//!     let mut snapshots = controller.subscribe();
//!
//!     controller.dispatch(ChatIntent::send("Hello"))?;
//!     while controller.next_update().await {
//!         let snapshot = snapshots.borrow_and_update().clone();
//!         // Render snapshot.messages
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: Messages, roles and the published snapshot
//! - [`conversation`]: The message log and its mutations
//! - [`registry`]: Model descriptors and provider adapters
//! - [`backend`]: Provider transport (HTTP)
//! - [`streaming`]: Server-sent event decoding
//! - [`controller`]: Request sessions: send, regenerate, abort, supersede
//! - [`events`]: Surface intents
//! - [`auth`]: Credential service client
//! - [`config`]: Configuration file and environment loading
//! - [`logging`]: Subscriber setup for host applications
//!
//! # No UI Dependencies
//!
//! This crate depends on no UI framework. Rendering, theming and markdown are
//! the surface's business.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod backend;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod events;
pub mod logging;
pub mod messages;
pub mod registry;
pub mod streaming;

// Re-exports for convenience
pub use auth::{AuthClient, AuthError, AuthSession, LoginRequest, RegisterRequest, User};
pub use backend::{BackendError, ByteStream, ChatBackend, HttpBackend};
pub use controller::{
    ChatController, ControllerError, ControllerSettings, RequestSession, SessionEvent, SessionId,
};
pub use conversation::ConversationState;
pub use events::ChatIntent;
pub use messages::{
    ChatState, ConversationSnapshot, HistoryEntry, Message, MessageId, MessageRole,
};
pub use registry::{
    Credential, ModelDescriptor, ModelRegistry, OpenAiCompatible, ProviderAdapter, RecordDelta,
    RegistryError,
};
pub use streaming::{decode_deltas, DeltaStream, SseDecoder, SseRecord};

// Config exports
pub use config::{
    builtin_models, default_config_path, load_config, load_config_from_path,
    load_config_with_env, ChatConfig, ChatToml, ConfigError, ConfigSource, ModelConfig,
    ModelToml,
};
