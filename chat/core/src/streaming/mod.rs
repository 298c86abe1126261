//! Stream Decoding
//!
//! Turns a provider's raw response body into the ordered sequence of text
//! deltas the controller applies to the conversation.
//!
//! # Pipeline
//!
//! ```text
//! ByteStream ──▶ SseDecoder ──▶ data records ──▶ ProviderAdapter ──▶ deltas
//!  (chunks)      (lines)        ("data: {...}")   (extract_delta)     (text)
//! ```
//!
//! - Only `data:` lines are records; other SSE fields and comments are ignored.
//! - Empty records are dropped.
//! - `[DONE]` ends the sequence; later bytes are never read.
//! - Records that fail to parse are skipped, never fatal.
//! - A record carrying a finish reason ends the sequence after its own text.

mod decoder;

pub use decoder::{decode_deltas, DeltaStream, SseDecoder, SseRecord, DONE_SENTINEL};
