//! Model Registry
//!
//! Static lookup from model identifier to everything needed to talk to it:
//! endpoint, credential, and the provider adapter that builds request bodies
//! and reads stream records. Built once from [`ChatConfig`] at startup and
//! never mutated afterwards.
//!
//! # Provider Adapters
//!
//! Provider-specific wire details live behind [`ProviderAdapter`]. Callers
//! never inspect provider JSON themselves; the decoder hands each record to
//! the adapter of the model that produced it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::config::{ChatConfig, ModelConfig};
use crate::messages::HistoryEntry;

/// Registry lookup errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No model with this identifier is registered
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// What one stream record contributes to the response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordDelta {
    /// Incremental text, if the record carries any
    pub text: Option<String>,
    /// Whether the record carries a terminal finish reason
    pub finished: bool,
}

/// Provider-specific request and response handling
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Adapter name for logs
    fn name(&self) -> &'static str;

    /// Build the JSON request body; streaming must be enabled
    fn build_payload(
        &self,
        model_name: &str,
        temperature: f32,
        history: &[HistoryEntry],
    ) -> serde_json::Value;

    /// Read the text fragment and finish signal from one `data:` record
    ///
    /// # Errors
    ///
    /// Returns the parse error if the record is not valid JSON of the
    /// expected shape. Callers treat this as a skippable record.
    fn extract_delta(&self, record: &str) -> Result<RecordDelta, serde_json::Error>;
}

/// Adapter for OpenAI-compatible chat-completions endpoints
///
/// Kimi (Moonshot), DeepSeek and Qwen (DashScope compatible mode) all accept
/// this protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiCompatible;

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ProviderAdapter for OpenAiCompatible {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    fn build_payload(
        &self,
        model_name: &str,
        temperature: f32,
        history: &[HistoryEntry],
    ) -> serde_json::Value {
        serde_json::json!({
            "model": model_name,
            "messages": history,
            "stream": true,
            "temperature": temperature,
        })
    }

    fn extract_delta(&self, record: &str) -> Result<RecordDelta, serde_json::Error> {
        let chunk: CompletionChunk = serde_json::from_str(record)?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(RecordDelta::default());
        };

        let text = choice
            .delta
            .and_then(|d| d.content)
            .filter(|t| !t.is_empty());
        let finished = choice.finish_reason.is_some_and(|r| !r.is_empty());

        Ok(RecordDelta { text, finished })
    }
}

/// Bearer credential that never appears in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret itself, for building the `Authorization` header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Everything needed to stream from one model
#[derive(Clone, Debug)]
pub struct ModelDescriptor {
    /// Registry identifier
    pub id: String,
    /// Name shown in model pickers
    pub display_name: String,
    /// Chat-completions endpoint URL
    pub endpoint: String,
    /// Provider-side model name
    pub model_name: String,
    /// Sampling temperature
    pub temperature: f32,
    credential: Option<Credential>,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ModelDescriptor {
    /// Create a descriptor with an explicit adapter
    pub fn new(config: &ModelConfig, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            id: config.id.clone(),
            display_name: config.display_name.clone(),
            endpoint: config.endpoint.clone(),
            model_name: config.model.clone(),
            temperature: config.temperature,
            credential: config.api_key.clone().map(Credential::new),
            adapter,
        }
    }

    /// The adapter for this model's provider
    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    /// Whether a credential is configured
    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Build the request body for a history
    pub fn build_payload(&self, history: &[HistoryEntry]) -> serde_json::Value {
        self.adapter
            .build_payload(&self.model_name, self.temperature, history)
    }

    /// Attach this model's credential to an outgoing request
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credential {
            Some(ref credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }
}

/// Immutable model lookup
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
    order: Vec<String>,
}

impl ModelRegistry {
    /// Build the registry from configuration
    ///
    /// Every configured model speaks the OpenAI-compatible protocol.
    pub fn from_config(config: &ChatConfig) -> Self {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(OpenAiCompatible);
        Self::from_descriptors(
            config
                .models
                .iter()
                .map(|m| ModelDescriptor::new(m, Arc::clone(&adapter))),
        )
    }

    /// Build the registry from ready-made descriptors, keeping their order
    ///
    /// A later descriptor with a repeated id replaces the earlier one.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut registry = Self::default();
        for descriptor in descriptors {
            if !registry.models.contains_key(&descriptor.id) {
                registry.order.push(descriptor.id.clone());
            }
            registry.models.insert(descriptor.id.clone(), descriptor);
        }
        registry
    }

    /// Look up a model
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownModel` if no model has this id.
    pub fn get(&self, id: &str) -> Result<&ModelDescriptor, RegistryError> {
        self.models
            .get(id)
            .ok_or_else(|| RegistryError::UnknownModel(id.to_string()))
    }

    /// Whether a model id is registered
    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    /// Models in configuration order, for pickers
    pub fn list(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.order.iter().filter_map(|id| self.models.get(id))
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
