//! Backend Traits
//!
//! The seam between the request controller and the network. Implementations
//! handle provider transport details (URLs, headers, status codes); the
//! [`ModelDescriptor`] supplies the payload and credentials.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::messages::HistoryEntry;
use crate::registry::ModelDescriptor;

/// Raw response body, delivered incrementally
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Transport failures
///
/// The `Display` text of every variant is what the user sees in the
/// conversation when a request fails.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request could not be sent or no response arrived
    #[error("Request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status
    #[error("{status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// Reading the response body failed mid-stream
    #[error("Stream interrupted: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() || err.is_decode() {
            Self::Stream(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Chat provider transport
///
/// Implement this trait to add a transport (HTTP, in-process, scripted test
/// doubles).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get the backend name (e.g., "HTTP")
    fn name(&self) -> &str;

    /// Issue a streaming chat request and return the response body
    ///
    /// Must fail before returning if the provider rejects the request, so the
    /// caller never decodes an error page.
    async fn open_stream(
        &self,
        model: &ModelDescriptor,
        history: &[HistoryEntry],
    ) -> Result<ByteStream, BackendError>;
}
