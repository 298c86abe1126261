//! TOML Configuration File Support
//!
//! Centralized configuration loading, supporting a TOML file at
//! `~/.config/chatstream/config.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! Provider credentials are never part of the defaults. Each model names the
//! environment variable its key is read from (`api_key_env`); a key may also
//! be written inline in the file, in which case the environment still wins.
//!
//! # Example Configuration
//!
//! ```toml
//! default_model = "deepseek"
//! connect_timeout_ms = 5000
//! auth_base_url = "https://chat.example.com"
//!
//! [[models]]
//! id = "deepseek"
//! temperature = 0.3
//!
//! [[models]]
//! id = "local"
//! display_name = "Local (llama3.2)"
//! endpoint = "http://localhost:11434/v1/chat/completions"
//! model = "llama3.2"
//! api_key_env = "LOCAL_API_KEY"
//! ```
//!
//! A `[[models]]` entry whose `id` matches a built-in model overrides only the
//! fields it sets; any other id adds a new model.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Greeting the conversation opens with
pub const DEFAULT_GREETING: &str = "Hello! I'm an AI assistant. How can I help you?";

/// Text appended to a response the user stopped
pub const DEFAULT_STOP_MARKER: &str = "\n\n(generation stopped)";

/// Default connect timeout for provider requests
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// One `[[models]]` entry of the TOML configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelToml {
    /// Registry identifier (required)
    pub id: String,
    /// Name shown in model pickers
    pub display_name: Option<String>,
    /// Chat-completions endpoint URL
    pub endpoint: Option<String>,
    /// Provider-side model name
    pub model: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Inline API key (environment takes precedence)
    pub api_key: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for ModelToml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelToml")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Model selected at startup
    pub default_model: Option<String>,
    /// Greeting the conversation opens with
    pub greeting: Option<String>,
    /// Text appended to stopped responses
    pub stop_marker: Option<String>,
    /// Connect timeout for provider requests
    pub connect_timeout_ms: Option<u64>,
    /// Base URL of the credential service
    pub auth_base_url: Option<String>,
    /// Model definitions
    pub models: Vec<ModelToml>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// A fully resolved model definition
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry identifier
    pub id: String,
    /// Name shown in model pickers
    pub display_name: String,
    /// Chat-completions endpoint URL
    pub endpoint: String,
    /// Provider-side model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Resolved API key
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ModelConfig {
    /// Create a model definition with the default temperature and no credential
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key_env: None,
            api_key: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Name the environment variable the API key is read from
    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Set the API key directly
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn apply_toml(&mut self, toml: &ModelToml) {
        if let Some(ref name) = toml.display_name {
            self.display_name.clone_from(name);
        }
        if let Some(ref endpoint) = toml.endpoint {
            self.endpoint.clone_from(endpoint);
        }
        if let Some(ref model) = toml.model {
            self.model.clone_from(model);
        }
        if toml.api_key_env.is_some() {
            self.api_key_env.clone_from(&toml.api_key_env);
        }
        if toml.api_key.is_some() {
            self.api_key.clone_from(&toml.api_key);
        }
        if let Some(temperature) = toml.temperature {
            self.temperature = temperature;
        }
    }
}

/// The models every installation knows about
///
/// All three speak the OpenAI-compatible chat-completions protocol.
#[must_use]
pub fn builtin_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new(
            "kimi",
            "Kimi (moonshot-v1-8k)",
            "https://api.moonshot.cn/v1/chat/completions",
            "moonshot-v1-8k",
        )
        .with_api_key_env("KIMI_API_KEY"),
        ModelConfig::new(
            "deepseek",
            "DeepSeek (deepseek-chat)",
            "https://api.deepseek.com/v1/chat/completions",
            "deepseek-chat",
        )
        .with_api_key_env("DEEPSEEK_API_KEY"),
        ModelConfig::new(
            "qwen",
            "Qwen (qwen-plus)",
            "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
            "qwen-plus",
        )
        .with_api_key_env("QWEN_API_KEY"),
    ]
}

/// Complete client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Model selected at startup
    pub default_model: String,
    /// Greeting the conversation opens with
    pub greeting: String,
    /// Text appended to stopped responses
    pub stop_marker: String,
    /// Connect timeout for provider requests in milliseconds
    pub connect_timeout_ms: u64,
    /// Base URL of the credential service (`None` = same origin)
    pub auth_base_url: Option<String>,
    /// Model definitions, in picker order
    pub models: Vec<ModelConfig>,
    /// Path of the file this configuration was loaded from
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,
    /// Highest-priority source that contributed a value
    #[serde(skip)]
    source: ConfigSource,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: "kimi".to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            stop_marker: DEFAULT_STOP_MARKER.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            auth_base_url: None,
            models: builtin_models(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChatConfig {
    /// Configuration with the given models and no file or environment input
    pub fn with_models(default_model: impl Into<String>, models: Vec<ModelConfig>) -> Self {
        Self {
            default_model: default_model.into(),
            models,
            ..Default::default()
        }
    }

    /// Get the configuration source
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Find a model definition by id
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one model must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "model id must not be empty".to_string(),
                ));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
            if model.endpoint.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' has no endpoint",
                    model.id
                )));
            }
            if model.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' has no provider model name",
                    model.id
                )));
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' temperature {} is outside 0.0..=2.0",
                    model.id, model.temperature
                )));
            }
        }

        if self.model(&self.default_model).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "default model '{}' is not configured",
                self.default_model
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chatstream/config.toml` or
/// `~/.config/chatstream/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatstream").join("config.toml"))
}

/// Load configuration from all sources with proper priority
///
/// `CHATSTREAM_CONFIG` replaces the default file location.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged configuration is invalid. A missing config file is not an error.
pub fn load_config() -> Result<ChatConfig, ConfigError> {
    let path = std::env::var("CHATSTREAM_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(default_config_path);
    load_config_from_path(path)
}

/// Load configuration from a specific path, reading the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged configuration is invalid.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ChatConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ChatConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ChatToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, &env);

    for model in &mut config.models {
        model.endpoint = model.endpoint.trim().to_string();
        if model.api_key.is_none() {
            tracing::warn!(
                model = %model.id,
                env = ?model.api_key_env,
                "No API key configured; requests to this model will be rejected by the provider"
            );
        }
    }

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatConfig, toml: &ChatToml) -> Result<(), ConfigError> {
    if let Some(ref model) = toml.default_model {
        config.default_model.clone_from(model);
    }
    if let Some(ref greeting) = toml.greeting {
        config.greeting.clone_from(greeting);
    }
    if let Some(ref marker) = toml.stop_marker {
        config.stop_marker.clone_from(marker);
    }
    if let Some(timeout) = toml.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if toml.auth_base_url.is_some() {
        config.auth_base_url.clone_from(&toml.auth_base_url);
    }

    for entry in &toml.models {
        if let Some(existing) = config.models.iter_mut().find(|m| m.id == entry.id) {
            existing.apply_toml(entry);
            continue;
        }

        let (Some(endpoint), Some(model)) = (&entry.endpoint, &entry.model) else {
            return Err(ConfigError::ValidationError(format!(
                "model '{}' needs both `endpoint` and `model`",
                entry.id
            )));
        };
        let mut added = ModelConfig::new(
            entry.id.clone(),
            entry.display_name.clone().unwrap_or_else(|| entry.id.clone()),
            endpoint.clone(),
            model.clone(),
        );
        added.apply_toml(entry);
        config.models.push(added);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ChatConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(model) = env("CHATSTREAM_MODEL") {
        config.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(url) = env("CHATSTREAM_AUTH_BASE_URL") {
        config.auth_base_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("CHATSTREAM_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.connect_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }

    for model in &mut config.models {
        let Some(ref var) = model.api_key_env else {
            continue;
        };
        if let Some(key) = env(var).filter(|k| !k.trim().is_empty()) {
            model.api_key = Some(key);
        }
    }
}
