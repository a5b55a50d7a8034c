//! Authentication error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing or invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(#[from] auth_config::CoreError),

    /// The user dismissed the consent screen
    #[error("Sign in cancelled")]
    UserCancelled,

    /// The provider redirected back with an error
    #[error("Provider error: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Provider {
        error: String,
        description: Option<String>,
    },

    /// The broker rejected the authorization code; a fresh sign-in is required
    #[error("Token exchange failed: {0}")]
    Exchange(String),

    /// Exchange attempted without an authorization code
    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    /// Redirect `state` did not match the pending request
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// A sign-in is already waiting for the provider
    #[error("Sign in already in progress")]
    FlowInProgress,

    /// Network failure outside of reqwest (e.g. loopback listener)
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Access token is malformed, expired or rejected
    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    /// Refresh could not produce a new session; the session is signed out
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Invalid state transition in the session or OAuth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] auth_storage::StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network failures and timeouts
    /// - HTTP errors with 5xx status codes
    /// - Connection errors
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Timeout => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Classify the error for display and state bookkeeping.
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::Config(_) => AuthErrorKind::Config,
            AuthError::UserCancelled => AuthErrorKind::UserCancelled,
            AuthError::Provider { .. } | AuthError::StateMismatch => AuthErrorKind::Provider,
            AuthError::Exchange(_) | AuthError::MissingAuthorizationCode => AuthErrorKind::Exchange,
            AuthError::Network(_) | AuthError::Http(_) | AuthError::Timeout | AuthError::Io(_) => {
                AuthErrorKind::Network
            }
            AuthError::TokenInvalid(_) => AuthErrorKind::TokenInvalid,
            AuthError::RefreshFailed(_) => AuthErrorKind::RefreshFailed,
            AuthError::Storage(_) => AuthErrorKind::Storage,
            AuthError::FlowInProgress
            | AuthError::InvalidStateTransition(_)
            | AuthError::Json(_)
            | AuthError::InvalidUrl(_) => AuthErrorKind::Internal,
        }
    }
}

/// Error category kept in session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    Config,
    UserCancelled,
    Provider,
    Exchange,
    Network,
    TokenInvalid,
    RefreshFailed,
    Storage,
    Internal,
}

/// Last user-visible error, cloneable for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl From<&AuthError> for LastError {
    fn from(error: &AuthError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
