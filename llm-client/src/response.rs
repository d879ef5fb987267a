use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ResponseError;

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// What a backend hands back on success, before normalization
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub metadata: Map<String, Value>,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Uniform response returned by every facade and client call.
///
/// Either `content` is populated or `error` is, never both. Check
/// [`Response::error`] before trusting [`Response::content`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    content: String,
    provider: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<TokenUsage>,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl Response {
    pub fn success(provider: &str, model: &str, completion: Completion) -> Self {
        Self {
            content: completion.content,
            provider: provider.to_string(),
            model: model.to_string(),
            usage: completion.usage,
            metadata: completion.metadata,
            created_at: Utc::now(),
            error: None,
        }
    }

    pub fn failure(provider: &str, model: &str, error: impl Into<ResponseError>) -> Self {
        Self {
            content: String::new(),
            provider: provider.to_string(),
            model: model.to_string(),
            usage: None,
            metadata: Map::new(),
            created_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn error(&self) -> Option<&ResponseError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Split into content or error, consuming the response
    pub fn into_result(self) -> std::result::Result<String, ResponseError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_success_carries_usage_and_no_error() {
        let response = Response::success(
            "mock",
            "mock-model",
            Completion::new("pong").with_usage(1, 1),
        );
        assert!(response.is_ok());
        assert_eq!(response.content(), "pong");
        assert_eq!(response.usage().map(TokenUsage::total), Some(2));
    }

    #[test]
    fn test_failure_has_empty_content() {
        let response = Response::failure(
            "anthropic",
            "claude",
            ResponseError::new(ErrorKind::BackendRequest, "boom"),
        );
        assert!(!response.is_ok());
        assert!(response.content().is_empty());
        assert!(response.usage().is_none());
        assert_eq!(response.into_result().unwrap_err().message, "boom");
    }
}
