//! LLM Provider Transport
//!
//! Abstracted access to chat-completion providers through a common trait.
//! A backend only opens the response body; decoding it into text deltas is
//! the job of [`crate::streaming`], and deciding what to do with the deltas
//! is the job of the [`ChatController`](crate::controller::ChatController).
//!
//! # Usage
//!
//! ```ignore
//! use chatstream_core::backend::{ChatBackend, HttpBackend};
//!
//! let backend = HttpBackend::from_config(&config)?;
//! let model = registry.get("kimi")?;
//! let bytes = backend.open_stream(model, &history).await?;
//! ```

mod http;
mod traits;

pub use http::HttpBackend;
pub use traits::{BackendError, ByteStream, ChatBackend};
