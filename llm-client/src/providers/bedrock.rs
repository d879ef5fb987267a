//! AWS Bedrock provider
//!
//! Uses the Bedrock Converse API with a Bedrock API key (bearer token).
//! Responses arrive as a single fragment when streamed.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::http;
use crate::catalog::{BuiltinModel, ModelDescriptor};
use crate::error::{LlmError, Result};
use crate::facade::ResponseFacade;
use crate::params::EffectiveConfig;
use crate::provider::{FacadeOptions, ProviderAdapter, ProviderContext};
use crate::request::{Message, Role};
use crate::response::Completion;

pub const BEARER_TOKEN_ENV: &str = "AWS_BEARER_TOKEN_BEDROCK";
const DEFAULT_REGION: &str = "us-east-1";

const MODELS: [BuiltinModel; 5] = [
    BuiltinModel::new("meta.llama3-3-70b-instruct-v1:0", 128_000, 8192, 0.99, 0.99),
    BuiltinModel::new("meta.llama3-1-405b-instruct-v1:0", 128_000, 32_768, 5.32, 16.0),
    BuiltinModel::new("meta.llama3-1-70b-instruct-v1:0", 128_000, 32_768, 0.99, 0.99),
    BuiltinModel::new("meta.llama3-1-8b-instruct-v1:0", 128_000, 32_768, 0.22, 0.22),
    BuiltinModel::new("amazon.titan-text-premier-v1:0", 32_000, 32_000, 0.5, 1.5),
];

/// Adapter for models hosted on Bedrock
pub struct BedrockAdapter {
    name: String,
    models: Vec<ModelDescriptor>,
    token: Option<String>,
    region: String,
    base_url: Option<String>,
}

impl BedrockAdapter {
    pub fn new(ctx: &ProviderContext) -> Self {
        // options, then AWS_REGION, then AWS_DEFAULT_REGION
        let region = ctx
            .lookup("region")
            .or_else(|| ctx.lookup("AWS_REGION"))
            .or_else(|| ctx.lookup("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Self {
            name: ctx.name.clone(),
            models: ctx.model_set(&MODELS),
            token: ctx.api_key(BEARER_TOKEN_ENV),
            region,
            base_url: ctx.base_url(),
        }
    }

    fn endpoint(&self, base_url: Option<&str>, model: &str) -> Result<Url> {
        let base = match base_url.or(self.base_url.as_deref()) {
            Some(base) => base.to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        };
        let mut url = Url::parse(&base)
            .map_err(|e| LlmError::ConfigError(format!("Invalid Bedrock endpoint {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| LlmError::ConfigError(format!("Invalid Bedrock endpoint {}", base)))?
            .pop_if_empty()
            .extend(["model", model, "converse"]);
        Ok(url)
    }
}

impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    fn validate_credentials(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn create_facade(
        &self,
        model: &str,
        options: &FacadeOptions,
    ) -> Result<Arc<dyn ResponseFacade>> {
        if !self.supports_model(model) {
            return Err(self.unknown_model(model));
        }
        let token = self.token.clone().ok_or_else(|| LlmError::Credential {
            provider: self.name.clone(),
            message: format!("{} is not set", BEARER_TOKEN_ENV),
        })?;

        Ok(Arc::new(BedrockFacade {
            provider: self.name.clone(),
            model: model.to_string(),
            url: self.endpoint(options.base_url.as_deref(), model)?,
            token,
            client: http::build_client(options.timeout_secs)?,
        }))
    }
}

// Converse API request/response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest {
    messages: Vec<ConverseMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<TextBlock>,
    inference_config: InferenceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConverseMessage {
    role: String,
    content: Vec<TextBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    usage: Option<ConverseUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    message: ConverseMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn build_request(messages: &[Message], config: &EffectiveConfig) -> ConverseRequest {
    let params = config.params();
    let (system, turns): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.role == Role::System);

    ConverseRequest {
        messages: turns
            .into_iter()
            .map(|m| ConverseMessage {
                role: m.role.as_str().to_string(),
                content: vec![TextBlock {
                    text: m.content.clone(),
                }],
            })
            .collect(),
        system: system
            .into_iter()
            .map(|m| TextBlock {
                text: m.content.clone(),
            })
            .collect(),
        inference_config: InferenceConfig {
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop_sequences: params.stop_sequences.clone(),
        },
    }
}

/// Facade for one Bedrock model
pub struct BedrockFacade {
    provider: String,
    model: String,
    url: Url,
    token: String,
    client: Client,
}

#[async_trait]
impl ResponseFacade for BedrockFacade {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], config: &EffectiveConfig) -> Result<Completion> {
        log::debug!("POST {}", self.url);
        let request = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(&build_request(messages, config));

        let response = http::send(&self.provider, request).await?;
        let body: ConverseResponse = http::json(&self.provider, response).await?;

        let content: String = body
            .output
            .message
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect();

        let mut completion = Completion::new(content);
        if let Some(usage) = body.usage {
            completion = completion.with_usage(usage.input_tokens, usage.output_tokens);
        }
        if let Some(reason) = body.stop_reason {
            completion = completion.with_metadata("stop_reason", reason);
        }
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GenerationParams;
    use crate::providers::test_context;

    #[test]
    fn test_region_chain() {
        let adapter = BedrockAdapter::new(&test_context("bedrock", &[]));
        assert_eq!(adapter.region, DEFAULT_REGION);
        assert!(!adapter.validate_credentials());

        let adapter = BedrockAdapter::new(&test_context(
            "bedrock",
            &[("AWS_DEFAULT_REGION", "eu-central-1"), (BEARER_TOKEN_ENV, "tok")],
        ));
        assert_eq!(adapter.region, "eu-central-1");
        assert!(adapter.validate_credentials());

        let adapter = BedrockAdapter::new(&test_context(
            "bedrock",
            &[("AWS_DEFAULT_REGION", "eu-central-1"), ("AWS_REGION", "ap-south-1")],
        ));
        assert_eq!(adapter.region, "ap-south-1");
    }

    #[test]
    fn test_endpoint_keeps_model_id_in_one_segment() {
        let adapter = BedrockAdapter::new(&test_context("bedrock", &[("AWS_REGION", "us-west-2")]));
        let url = adapter
            .endpoint(None, "meta.llama3-1-8b-instruct-v1:0")
            .unwrap();
        assert_eq!(url.host_str(), Some("bedrock-runtime.us-west-2.amazonaws.com"));
        let segments: Vec<_> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], "model");
        assert_eq!(segments[2], "converse");
    }

    #[test]
    fn test_request_shape() {
        let config = EffectiveConfig::new(GenerationParams::new().with_max_tokens(200));
        let body = build_request(&[Message::system("sys"), Message::user("hi")], &config);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["system"][0]["text"], "sys");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["text"], "hi");
        assert_eq!(json["inferenceConfig"]["maxTokens"], 200);
    }
}
