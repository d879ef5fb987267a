use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Missing or invalid credentials for {provider}: {message}")]
    Credential { provider: String, message: String },

    #[error(
        "Model '{model}' not offered by provider '{provider}'. Available models: {}",
        available.join(", ")
    )]
    UnknownModel {
        provider: String,
        model: String,
        available: Vec<String>,
    },

    #[error(
        "Provider '{name}' not registered. Available providers: {}",
        available.join(", ")
    )]
    ProviderNotRegistered { name: String, available: Vec<String> },

    #[error("{provider} request failed{}: {message}", status_code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    BackendRequest {
        provider: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl LlmError {
    /// Shorthand for a backend failure without an HTTP status
    pub fn backend(provider: &str, message: impl Into<String>) -> Self {
        Self::BackendRequest {
            provider: provider.to_string(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Credential { .. } => ErrorKind::Credential,
            Self::UnknownModel { .. } => ErrorKind::UnknownModel,
            Self::ProviderNotRegistered { .. } => ErrorKind::ProviderNotRegistered,
            Self::Validation(_) => ErrorKind::Validation,
            Self::BackendRequest { .. }
            | Self::ConfigError(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::TomlParse(_) => ErrorKind::BackendRequest,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// Failure category carried by an error-bearing [`crate::Response`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Credential,
    UnknownModel,
    ProviderNotRegistered,
    BackendRequest,
    Validation,
}

/// Uniform failure descriptor attached to responses and stream items.
///
/// Unlike [`LlmError`] this is a plain value: cloneable, comparable and
/// serializable, so it can live inside history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ResponseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&LlmError> for ResponseError {
    fn from(err: &LlmError) -> Self {
        let status_code = match err {
            LlmError::BackendRequest { status_code, .. } => *status_code,
            _ => None,
        };
        // Backend messages are kept verbatim, everything else uses Display
        let message = match err {
            LlmError::BackendRequest { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
            status_code,
        }
    }
}

impl From<LlmError> for ResponseError {
    fn from(err: LlmError) -> Self {
        Self::from(&err)
    }
}
