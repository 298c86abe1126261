//! Credential Service Client
//!
//! Thin client for the account service the chat front end sits behind:
//! register, log in, and ask who the current session belongs to. The service
//! keeps the session in a cookie, so the client carries a cookie store and
//! every call after a successful login is authenticated implicitly.
//!
//! # Endpoints
//!
//! | Call       | Request                                              | Success  |
//! |------------|------------------------------------------------------|----------|
//! | `register` | `POST /api/register {username, password, confirm_password}` | `{user}` |
//! | `login`    | `POST /api/login {username, password}`               | `{user}` |
//! | `me`       | `GET /api/me`                                        | `{user}` |
//!
//! Failures carry a JSON `{error}` body with a non-success status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChatConfig;

/// Credential service errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Password and confirmation differ; nothing was sent
    #[error("Passwords do not match")]
    PasswordMismatch,

    /// The service refused the request
    #[error("{0}")]
    Rejected(String),

    /// The service answered with something other than the expected JSON
    #[error("Malformed response from credential service")]
    MalformedResponse,

    /// The service could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// No credential service URL is configured
    #[error("Credential service URL not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// An account as returned by the service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id
    pub id: u64,
    /// Login name
    pub username: String,
    /// Creation timestamp, as sent by the service
    pub created_at: String,
}

/// `POST /api/login` body
#[derive(Clone, Debug, Serialize)]
pub struct LoginRequest {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
}

/// `POST /api/register` body
#[derive(Clone, Debug, Serialize)]
pub struct RegisterRequest {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
    /// Password typed a second time
    pub confirm_password: String,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for the credential service
#[derive(Clone, Debug)]
pub struct AuthClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl AuthClient {
    /// Create a client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Network` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from `ChatConfig`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotConfigured` if `auth_base_url` is unset.
    pub fn from_config(config: &ChatConfig) -> Result<Self, AuthError> {
        match config.auth_base_url {
            Some(ref url) => Self::new(url.clone()),
            None => Err(AuthError::NotConfigured),
        }
    }

    /// Service base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create an account and start a session for it
    ///
    /// # Errors
    ///
    /// Returns `PasswordMismatch` without contacting the service if the
    /// confirmation differs, otherwise the service or network error.
    pub async fn register(&self, request: &RegisterRequest) -> Result<User, AuthError> {
        if request.password != request.confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        let response = self
            .http_client
            .post(self.url("/api/register"))
            .json(request)
            .send()
            .await?;
        read_user(response, "Registration failed").await
    }

    /// Log in
    ///
    /// # Errors
    ///
    /// Returns the service's error message as `Rejected`, or a network error.
    pub async fn login(&self, request: &LoginRequest) -> Result<User, AuthError> {
        let response = self
            .http_client
            .post(self.url("/api/login"))
            .json(request)
            .send()
            .await?;
        read_user(response, "Login failed").await
    }

    /// The user the current session cookie belongs to
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if there is no valid session.
    pub async fn me(&self) -> Result<User, AuthError> {
        let response = self.http_client.get(self.url("/api/me")).send().await?;
        read_user(response, "Not logged in").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Decode a `{user}` success body or a `{error}` failure body
async fn read_user(response: reqwest::Response, fallback: &str) -> Result<User, AuthError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| fallback.to_string());
        tracing::debug!(status = status.as_u16(), error = %message, "Credential service rejected request");
        return Err(AuthError::Rejected(message));
    }

    serde_json::from_str::<UserEnvelope>(&body)
        .map(|envelope| envelope.user)
        .map_err(|e| {
            tracing::warn!(error = %e, "Unexpected credential service response");
            AuthError::MalformedResponse
        })
}

/// The signed-in user, if any
#[derive(Debug)]
pub struct AuthSession {
    client: AuthClient,
    user: Option<User>,
    last_error: Option<AuthError>,
}

impl AuthSession {
    /// Create a signed-out session
    pub fn new(client: AuthClient) -> Self {
        Self {
            client,
            user: None,
            last_error: None,
        }
    }

    /// The signed-in user
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Whether a user is signed in
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Error from the last register or login attempt
    pub fn last_error(&self) -> Option<&AuthError> {
        self.last_error.as_ref()
    }

    /// Forget the last error
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Register and sign in
    ///
    /// # Errors
    ///
    /// See [`AuthClient::register`]; the error is also kept as `last_error`.
    pub async fn register(&mut self, request: &RegisterRequest) -> Result<&User, AuthError> {
        let result = self.client.register(request).await;
        self.settle(result)
    }

    /// Sign in
    ///
    /// # Errors
    ///
    /// See [`AuthClient::login`]; the error is also kept as `last_error`.
    pub async fn login(&mut self, request: &LoginRequest) -> Result<&User, AuthError> {
        let result = self.client.login(request).await;
        self.settle(result)
    }

    /// Sign out locally
    pub fn logout(&mut self) {
        if let Some(user) = self.user.take() {
            tracing::info!(username = %user.username, "Signed out");
        }
        self.last_error = None;
    }

    /// Refresh the signed-in user from the session cookie
    ///
    /// Any failure signs the session out; returns whether a user is signed in.
    pub async fn check(&mut self) -> bool {
        match self.client.me().await {
            Ok(user) => {
                self.user = Some(user);
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "No active credential session");
                self.user = None;
                false
            }
        }
    }

    fn settle(&mut self, result: Result<User, AuthError>) -> Result<&User, AuthError> {
        match result {
            Ok(user) => {
                tracing::info!(user_id = user.id, username = %user.username, "Signed in");
                self.last_error = None;
                Ok(&*self.user.insert(user))
            }
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}
