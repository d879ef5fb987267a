//! OpenAI-compatible API provider
//!
//! Used for providers that implement the OpenAI chat completions API:
//! - OpenAI
//! - Together
//! - xAI Grok
//! - OpenRouter
//! - Cerebras
//! - Hugging Face router

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::http;
use crate::catalog::{BuiltinModel, ModelDescriptor, default_api_key_env};
use crate::error::{LlmError, Result};
use crate::facade::{FragmentStream, ResponseFacade};
use crate::params::EffectiveConfig;
use crate::provider::{FacadeOptions, ProviderAdapter, ProviderContext};
use crate::request::Message;
use crate::response::Completion;

/// Endpoint and built-in models of one OpenAI-compatible service
#[derive(Debug)]
pub struct Preset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub models: &'static [BuiltinModel],
}

pub const OPENAI: Preset = Preset {
    name: "openai",
    base_url: "https://api.openai.com/v1",
    models: &[
        BuiltinModel::new("gpt-4o", 128_000, 16_384, 2.5, 10.0),
        BuiltinModel::new("gpt-4o-mini", 128_000, 16_384, 0.15, 0.6),
        BuiltinModel::new("gpt-4-turbo", 128_000, 4096, 10.0, 30.0),
        BuiltinModel::new("gpt-3.5-turbo", 16_385, 4096, 0.5, 1.5),
    ],
};

pub const TOGETHER: Preset = Preset {
    name: "together",
    base_url: "https://api.together.xyz/v1",
    models: &[
        BuiltinModel::new("meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo", 130_815, 16_384, 3.5, 3.5),
        BuiltinModel::new("meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo", 131_072, 32_768, 0.88, 0.88),
        BuiltinModel::new("meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo", 131_072, 8192, 0.18, 0.18),
        BuiltinModel::new("mistralai/Mixtral-8x7B-Instruct-v0.1", 32_768, 32_768, 0.6, 0.6),
        BuiltinModel::new("mistralai/Mistral-7B-Instruct-v0.2", 32_768, 32_768, 0.2, 0.2),
        BuiltinModel::new("Qwen/Qwen2.5-72B-Instruct-Turbo", 32_768, 32_768, 0.88, 0.88),
        BuiltinModel::new("deepseek-ai/deepseek-llm-67b-chat", 4096, 4096, 0.9, 0.9),
    ],
};

pub const GROK: Preset = Preset {
    name: "grok",
    base_url: "https://api.x.ai/v1",
    models: &[
        BuiltinModel::new("grok-beta", 131_072, 131_072, 5.0, 15.0),
        BuiltinModel::new("grok-vision-beta", 8192, 8192, 5.0, 15.0),
    ],
};

pub const OPENROUTER: Preset = Preset {
    name: "openrouter",
    base_url: "https://openrouter.ai/api/v1",
    models: &[
        BuiltinModel::new("anthropic/claude-3.5-sonnet", 200_000, 8192, 3.0, 15.0),
        BuiltinModel::new("openai/gpt-4o", 128_000, 16_384, 2.5, 10.0),
        BuiltinModel::new("meta-llama/llama-3.1-70b-instruct", 131_072, 8192, 0.4, 0.4),
    ],
};

pub const CEREBRAS: Preset = Preset {
    name: "cerebras",
    base_url: "https://api.cerebras.ai/v1",
    models: &[
        BuiltinModel::new("llama3.1-8b", 8192, 8192, 0.1, 0.1),
        BuiltinModel::new("llama-3.3-70b", 8192, 8192, 0.85, 1.2),
    ],
};

pub const HUGGINGFACE: Preset = Preset {
    name: "huggingface",
    base_url: "https://router.huggingface.co/v1",
    models: &[
        BuiltinModel::new("meta-llama/Meta-Llama-3.1-70B-Instruct", 131_072, 8192, 0.65, 0.65),
        BuiltinModel::new("meta-llama/Meta-Llama-3.1-8B-Instruct", 131_072, 8192, 0.05, 0.05),
        BuiltinModel::new("mistralai/Mistral-7B-Instruct-v0.3", 32_768, 8192, 0.05, 0.05),
        BuiltinModel::new("mistralai/Mixtral-8x7B-Instruct-v0.1", 32_768, 8192, 0.25, 0.25),
    ],
};

/// Adapter for OpenAI-compatible APIs
pub struct OpenAICompatibleAdapter {
    name: String,
    models: Vec<ModelDescriptor>,
    api_key: Option<String>,
    api_key_env: String,
    base_url: String,
}

impl OpenAICompatibleAdapter {
    pub fn new(ctx: &ProviderContext, preset: &Preset) -> Self {
        let api_key_env = ctx
            .descriptor
            .as_ref()
            .and_then(|d| d.api_key_env.clone())
            .unwrap_or_else(|| default_api_key_env(preset.name));
        Self {
            name: ctx.name.clone(),
            models: ctx.model_set(preset.models),
            api_key: ctx.api_key(&api_key_env),
            api_key_env,
            base_url: ctx
                .base_url()
                .unwrap_or_else(|| preset.base_url.to_string()),
        }
    }
}

impl ProviderAdapter for OpenAICompatibleAdapter {
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
            message: format!("{} is not set", self.api_key_env),
        })?;
        let base_url = options.base_url.as_deref().unwrap_or(&self.base_url);

        Ok(Arc::new(OpenAICompatibleFacade {
            provider: self.name.clone(),
            model: model.to_string(),
            api_key,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client: http::build_client(options.timeout_secs)?,
        }))
    }
}

// OpenAI API request/response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Facade for one model behind an OpenAI-compatible endpoint
pub struct OpenAICompatibleFacade {
    provider: String,
    model: String,
    api_key: String,
    url: String,
    client: Client,
}

impl OpenAICompatibleFacade {
    fn build_request(
        &self,
        messages: &[Message],
        config: &EffectiveConfig,
        stream: bool,
    ) -> ChatCompletionRequest {
        let params = config.params();
        // top_k has no counterpart in this API
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: params.stop_sequences.clone(),
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stream,
        }
    }

    async fn post(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let request = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body);
        http::send(&self.provider, request).await
    }
}

/// Text carried by one streamed chunk, if any
fn chunk_text(provider: &str, data: &str) -> Result<Option<String>> {
    let chunk = http::parse_event(provider, data)?;
    if let Some(message) = chunk.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(LlmError::backend(provider, message));
    }
    Ok(chunk
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl ResponseFacade for OpenAICompatibleFacade {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], config: &EffectiveConfig) -> Result<Completion> {
        let body = self.build_request(messages, config, false);
        log::debug!("POST {} model={}", self.url, self.model);

        let response = self.post(&body).await?;
        let chat_response: ChatCompletionResponse = http::json(&self.provider, response).await?;

        let choice = chat_response.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let mut completion = Completion::new(content);
        if let Some(usage) = chat_response.usage {
            completion = completion.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        if let Some(reason) = finish_reason {
            completion = completion.with_metadata("finish_reason", reason);
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
                Ok(data) => chunk_text(&provider, &data).transpose(),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(fragments.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GenerationParams;
    use crate::providers::test_context;

    #[test]
    fn test_presets_use_their_own_key_and_endpoint() {
        let ctx = test_context("grok", &[("GROK_API_KEY", "xai-key")]);
        let adapter = OpenAICompatibleAdapter::new(&ctx, &GROK);
        assert!(adapter.validate_credentials());
        assert_eq!(adapter.base_url, "https://api.x.ai/v1");
        assert!(adapter.supports_model("grok-beta"));

        let ctx = test_context("together", &[("GROK_API_KEY", "xai-key")]);
        let adapter = OpenAICompatibleAdapter::new(&ctx, &TOGETHER);
        assert!(!adapter.validate_credentials());

        let err = adapter
            .create_facade("mistralai/Mixtral-8x7B-Instruct-v0.1", &FacadeOptions::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("TOGETHER_API_KEY"));
    }

    #[test]
    fn test_request_maps_params() {
        let facade = OpenAICompatibleFacade {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key: "sk".into(),
            url: "http://localhost/chat/completions".into(),
            client: Client::new(),
        };
        let config = EffectiveConfig::new(
            GenerationParams::new()
                .with_max_tokens(64)
                .with_top_k(5)
                .with_presence_penalty(0.5)
                .with_stop_sequences(["\n\n"]),
        );
        let body = facade.build_request(
            &[Message::system("sys"), Message::user("hi")],
            &config,
            true,
        );
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["max_tokens"], 64);
        assert_eq!(json["presence_penalty"], 0.5);
        assert_eq!(json["stop"][0], "\n\n");
        assert_eq!(json["stream"], true);
        assert!(json.get("top_k").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_chunk_text() {
        let chunk = r#"{"id":"1","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#;
        assert_eq!(chunk_text("openai", chunk).unwrap().as_deref(), Some("Hi"));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(chunk_text("openai", role_only).unwrap(), None);

        let error = r#"{"error":{"message":"rate limited"}}"#;
        assert!(chunk_text("openrouter", error).is_err());
    }
}
