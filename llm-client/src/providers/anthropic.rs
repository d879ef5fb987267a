//! Anthropic API provider
//!
//! Direct HTTP implementation for the Anthropic Messages API, with SSE
//! streaming.

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::http;
use crate::catalog::{BuiltinModel, ModelDescriptor};
use crate::error::{LlmError, Result};
use crate::facade::{FragmentStream, ResponseFacade};
use crate::params::EffectiveConfig;
use crate::provider::{FacadeOptions, ProviderAdapter, ProviderContext};
use crate::request::{Message, Role};
use crate::response::Completion;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

const MODELS: [BuiltinModel; 4] = [
    BuiltinModel::new("claude-3-5-sonnet-20241022", 200_000, 8192, 3.0, 15.0),
    BuiltinModel::new("claude-3-opus-20240229", 200_000, 4096, 15.0, 75.0),
    BuiltinModel::new("claude-3-sonnet-20240229", 200_000, 4096, 3.0, 15.0),
    BuiltinModel::new("claude-3-haiku-20240307", 200_000, 4096, 0.25, 1.25),
];

/// Adapter for direct Anthropic API calls
pub struct AnthropicAdapter {
    name: String,
    models: Vec<ModelDescriptor>,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self {
            name: ctx.name.clone(),
            models: ctx.model_set(&MODELS),
            api_key: ctx.api_key(API_KEY_ENV),
            base_url: ctx
                .base_url()
                .unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    fn validate_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    fn create_facade(
        &self,
        model: &str,
        options: &FacadeOptions,
    ) -> Result<Arc<dyn ResponseFacade>> {
        if !self.supports_model(model) {
            return Err(self.unknown_model(model));
        }
        let api_key = self.api_key.clone().ok_or_else(|| LlmError::Credential {
            provider: self.name.clone(),
            message: format!("{} is not set", API_KEY_ENV),
        })?;
        let base_url = options.base_url.as_deref().unwrap_or(&self.base_url);

        Ok(Arc::new(AnthropicFacade {
            provider: self.name.clone(),
            model: model.to_string(),
            api_key,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            client: http::build_client(options.timeout_secs)?,
        }))
    }
}

// Anthropic API request/response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: ResponseUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Facade for one Anthropic model
pub struct AnthropicFacade {
    provider: String,
    model: String,
    api_key: String,
    endpoint: String,
    client: Client,
}

impl AnthropicFacade {
    fn build_request(
        &self,
        messages: &[Message],
        config: &EffectiveConfig,
        stream: bool,
    ) -> MessagesRequest {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let params = config.params();

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop_sequences.clone(),
            stream,
        }
    }

    async fn post(&self, body: &MessagesRequest) -> Result<reqwest::Response> {
        let request = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body);
        http::send(&self.provider, request).await
    }
}

/// Text carried by one streaming event, if any
fn delta_text(provider: &str, data: &str) -> Result<Option<String>> {
    let event = http::parse_event(provider, data)?;
    match event.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(|t| t.as_str())
            .map(str::to_string)),
        Some("error") => Err(LlmError::backend(
            provider,
            event
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("stream error"),
        )),
        _ => Ok(None),
    }
}

#[async_trait]
impl ResponseFacade for AnthropicFacade {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], config: &EffectiveConfig) -> Result<Completion> {
        let body = self.build_request(messages, config, false);
        log::debug!("POST {} model={}", self.endpoint, self.model);

        let response = self.post(&body).await?;
        let api_response: MessagesResponse = http::json(&self.provider, response).await?;

        let content = api_response
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<String>();

        let mut completion = Completion::new(content).with_usage(
            api_response.usage.input_tokens,
            api_response.usage.output_tokens,
        );
        if let Some(reason) = api_response.stop_reason {
            completion = completion.with_metadata("stop_reason", reason);
        }
        Ok(completion)
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        config: &EffectiveConfig,
    ) -> Result<FragmentStream> {
        let body = self.build_request(messages, config, true);
        let response = self.post(&body).await?;

        let provider = self.provider.clone();
        let fragments = http::sse_data(&self.provider, response).filter_map(move |item| {
            future::ready(match item {
                Ok(data) => delta_text(&provider, &data).transpose(),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(fragments.boxed())
    }
}
