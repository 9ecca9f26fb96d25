//! Error types for ChatBridge
//!
//! This module defines all error types used throughout the service,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Coarse error classes used for propagation decisions and HTTP mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input, rejected before any side effect
    Validation,
    /// Missing, invalid, or expired credential
    Auth,
    /// Session or model absent, or not owned by the caller
    NotFound,
    /// Upstream AI failure
    Provider,
    /// Store write/read failure
    Persistence,
    /// Anything else (configuration, internal bugs)
    Internal,
}

/// Main error type for ChatBridge operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// The user turn was empty or whitespace only
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// Generic request validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// Access token could not be verified
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Authentication errors (missing header, upstream 401)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Session missing, tombstoned, or owned by someone else
    #[error("Chat session not found: {0}")]
    SessionNotFound(i64),

    /// Model id/name unknown or disabled
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// No enabled model can serve as default
    #[error("No default model is configured")]
    NoDefaultModel,

    /// The model names a provider the factory cannot build
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Provider credentials absent from configuration
    #[error("Missing credentials for provider: {0}")]
    MissingCredential(String),

    /// Provider-related errors (API calls, malformed responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider answered without any completion choice
    #[error("Provider returned no completion choices")]
    EmptyResponse,

    /// Storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ChatError {
    /// Classify this error into one of the propagation classes
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyPrompt | Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidToken(_) | Self::Authentication(_) => ErrorKind::Auth,
            Self::SessionNotFound(_) | Self::ModelNotFound(_) | Self::NoDefaultModel => {
                ErrorKind::NotFound
            }
            Self::UnsupportedProvider(_)
            | Self::MissingCredential(_)
            | Self::Provider(_)
            | Self::EmptyResponse
            | Self::Http(_) => ErrorKind::Provider,
            Self::Storage(_) | Self::Database(_) => ErrorKind::Persistence,
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) | Self::Yaml(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Classify an `anyhow::Error`, falling back to [`ErrorKind::Internal`]
/// when it does not wrap a [`ChatError`].
pub fn error_kind(error: &anyhow::Error) -> ErrorKind {
    error
        .downcast_ref::<ChatError>()
        .map(ChatError::kind)
        .unwrap_or(ErrorKind::Internal)
}

/// Result type alias for ChatBridge operations
///
/// Uses `anyhow::Error` so call sites can attach context while still
/// carrying a [`ChatError`] that [`error_kind`] can recover.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prompt_display() {
        assert_eq!(ChatError::EmptyPrompt.to_string(), "Prompt cannot be empty");
    }

    #[test]
    fn test_provider_error_display() {
        let error = ChatError::Provider("API timeout".to_string());
        assert_eq!(error.to_string(), "Provider error: API timeout");
    }

    #[test]
    fn test_missing_credential_display() {
        let error = ChatError::MissingCredential("zhipu".to_string());
        assert_eq!(error.to_string(), "Missing credentials for provider: zhipu");
    }

    #[test]
    fn test_session_not_found_display() {
        assert_eq!(
            ChatError::SessionNotFound(7).to_string(),
            "Chat session not found: 7"
        );
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(ChatError::EmptyPrompt.kind(), ErrorKind::Validation);
        assert_eq!(
            ChatError::InvalidToken("expired".into()).kind(),
            ErrorKind::Auth
        );
        assert_eq!(ChatError::SessionNotFound(1).kind(), ErrorKind::NotFound);
        assert_eq!(ChatError::NoDefaultModel.kind(), ErrorKind::NotFound);
        assert_eq!(ChatError::EmptyResponse.kind(), ErrorKind::Provider);
        assert_eq!(
            ChatError::UnsupportedProvider("openai".into()).kind(),
            ErrorKind::Provider
        );
        assert_eq!(
            ChatError::Storage("disk full".into()).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(ChatError::Config("bad".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_kind_through_anyhow() {
        let error: anyhow::Error = ChatError::ModelNotFound("9999".into()).into();
        assert_eq!(error_kind(&error), ErrorKind::NotFound);

        let opaque = anyhow::anyhow!("something else");
        assert_eq!(error_kind(&opaque), ErrorKind::Internal);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ChatError = json_error.into();
        assert!(matches!(error, ChatError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: ChatError = yaml_error.into();
        assert!(matches!(error, ChatError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }
}
