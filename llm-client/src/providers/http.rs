//! HTTP plumbing shared by the API-backed adapters

use futures_util::stream::{BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

use crate::error::{LlmError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub(crate) fn build_client(timeout_secs: Option<u64>) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(
            timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        ))
        .build()
        .map_err(|e| LlmError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

/// Send a request and turn a non-2xx status into `BackendRequest`,
/// keeping the provider's own error message
pub(crate) async fn send(provider: &str, request: RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::backend(provider, format!("Request failed: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(LlmError::BackendRequest {
        provider: provider.to_string(),
        message: error_message(&error_text),
        status_code: Some(status.as_u16()),
    })
}

/// Decode a JSON body into `T`
pub(crate) async fn json<T: serde::de::DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| LlmError::backend(provider, format!("Failed to parse response: {}", e)))
}

/// Pull the human-readable message out of a provider error body.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is returned as-is.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let message = value
        .pointer("/error/message")
        .or_else(|| value.get("error").filter(|e| e.is_string()))
        .or_else(|| value.get("message"))
        .and_then(Value::as_str);
    match message {
        Some(message) => message.to_string(),
        None => body.to_string(),
    }
}

/// Server-sent events: yields the `data:` payload of each event and stops
/// at `[DONE]` or end of body.
///
/// Dropping the stream drops the response body, which closes the
/// connection.
pub(crate) fn sse_data(provider: &str, response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let provider = provider.to_string();
    let mut body = response.bytes_stream();

    let stream = async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        'read: while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(LlmError::backend(&provider, format!("Stream interrupted: {}", e)));
                    break 'read;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\r', '\n']);

                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim_start();
                    if data == "[DONE]" {
                        break 'read;
                    }
                    if !data.is_empty() {
                        yield Ok(data.to_string());
                    }
                }
            }
        }
    };

    stream.boxed()
}

/// Parse one SSE payload as JSON
pub(crate) fn parse_event(provider: &str, data: &str) -> Result<Value> {
    serde_json::from_str(data)
        .map_err(|e| LlmError::backend(provider, format!("Malformed stream event: {}", e)))
}
