//! HTTP Backend Implementation
//!
//! Streams chat completions from provider endpoints over HTTPS.
//!
//! # Wire Format
//!
//! `POST <endpoint>` with a JSON body built by the model's provider adapter
//! and `Authorization: Bearer <credential>` supplied by the descriptor. A
//! success response is a chunked `text/event-stream` body; anything else is
//! returned as [`BackendError::Status`] with the body text, before decoding
//! starts.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::traits::{BackendError, ByteStream, ChatBackend};
use crate::config::ChatConfig;
use crate::messages::HistoryEntry;
use crate::registry::ModelDescriptor;

/// Provider client over reqwest
#[derive(Clone, Debug)]
pub struct HttpBackend {
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend with the given connect timeout
    ///
    /// There is no total request timeout: a response may legitimately stream
    /// for minutes, and the user can always abort.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Request` if the TLS backend cannot be initialized.
    pub fn new(connect_timeout: Duration) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http_client })
    }

    /// Create from `ChatConfig`
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Request` if the HTTP client cannot be built.
    pub fn from_config(config: &ChatConfig) -> Result<Self, BackendError> {
        Self::new(Duration::from_millis(config.connect_timeout_ms))
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn open_stream(
        &self,
        model: &ModelDescriptor,
        history: &[HistoryEntry],
    ) -> Result<ByteStream, BackendError> {
        let payload = model.build_payload(history);

        tracing::debug!(
            model = %model.id,
            endpoint = %model.endpoint,
            messages = history.len(),
            adapter = model.adapter().name(),
            "Opening chat stream"
        );

        let request = model.authorize(self.http_client.post(&model.endpoint).json(&payload));
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model = %model.id, status, "Provider rejected chat request");
            return Err(BackendError::Status { status, body });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(BackendError::from))
            .boxed())
    }
}
