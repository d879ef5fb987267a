//! Google Gemini provider
//!
//! Talks to either the Generative Language API (API key) or Vertex AI
//! (project, region and an OAuth access token).

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::StreamExt;
use reqwest::{Client, RequestBuilder};
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

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";
pub const REGION_ENV: &str = "GOOGLE_CLOUD_REGION";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

const GENERATIVE_LANGUAGE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REGION: &str = "us-central1";

const MODELS: [BuiltinModel; 3] = [
    BuiltinModel::new("gemini-1.5-pro", 2_097_152, 8192, 1.25, 5.0),
    BuiltinModel::new("gemini-1.5-flash", 1_048_576, 8192, 0.075, 0.3),
    BuiltinModel::new("gemini-2.0-flash", 1_048_576, 8192, 0.1, 0.4),
];

#[derive(Debug, Clone, PartialEq)]
enum GoogleAuth {
    ApiKey(String),
    Vertex {
        project: String,
        region: String,
        access_token: Option<String>,
    },
}

/// Adapter for Gemini models
pub struct GoogleAdapter {
    name: String,
    models: Vec<ModelDescriptor>,
    auth: Option<GoogleAuth>,
    base_url: Option<String>,
}

impl GoogleAdapter {
    pub fn new(ctx: &ProviderContext) -> Self {
        let option = |short: &str, env: &str| ctx.lookup(short).or_else(|| ctx.lookup(env));

        let auth = match ctx.api_key(API_KEY_ENV) {
            Some(key) => Some(GoogleAuth::ApiKey(key)),
            None => option("project", PROJECT_ENV).map(|project| GoogleAuth::Vertex {
                project,
                region: option("region", REGION_ENV)
                    .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                access_token: option("access_token", ACCESS_TOKEN_ENV),
            }),
        };

        Self {
            name: ctx.name.clone(),
            models: ctx.model_set(&MODELS),
            auth,
            base_url: ctx.base_url(),
        }
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    fn validate_credentials(&self) -> bool {
        match &self.auth {
            Some(GoogleAuth::ApiKey(key)) => !key.trim().is_empty(),
            Some(GoogleAuth::Vertex {
                project,
                access_token,
                ..
            }) => !project.is_empty() && access_token.as_deref().is_some_and(|t| !t.is_empty()),
            None => false,
        }
    }

    fn create_facade(
        &self,
        model: &str,
        options: &FacadeOptions,
    ) -> Result<Arc<dyn ResponseFacade>> {
        if !self.supports_model(model) {
            return Err(self.unknown_model(model));
        }
        let auth = match &self.auth {
            Some(auth) if self.validate_credentials() => auth.clone(),
            _ => {
                return Err(LlmError::Credential {
                    provider: self.name.clone(),
                    message: format!(
                        "set {} or {} with {}",
                        API_KEY_ENV, PROJECT_ENV, ACCESS_TOKEN_ENV
                    ),
                });
            }
        };

        let base_url = options
            .base_url
            .clone()
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| match &auth {
                GoogleAuth::ApiKey(_) => GENERATIVE_LANGUAGE_URL.to_string(),
                GoogleAuth::Vertex { project, region, .. } => format!(
                    "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/google"
                ),
            });

        Ok(Arc::new(GoogleFacade {
            provider: self.name.clone(),
            model: model.to_string(),
            model_url: format!("{}/models/{}", base_url.trim_end_matches('/'), model),
            auth,
            client: http::build_client(options.timeout_secs)?,
        }))
    }
}

// Gemini request/response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Facade for one Gemini model
pub struct GoogleFacade {
    provider: String,
    model: String,
    model_url: String,
    auth: GoogleAuth,
    client: Client,
}

fn build_request(messages: &[Message], config: &EffectiveConfig) -> GenerateContentRequest {
    let system: Vec<Part> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| Part {
            text: m.content.clone(),
        })
        .collect();
    let params = config.params().clone();

    GenerateContentRequest {
        contents: messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: Some(match m.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                }),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect(),
        system_instruction: (!system.is_empty()).then_some(Content {
            role: None,
            parts: system,
        }),
        generation_config: GenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_tokens,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop_sequences,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
        },
    }
}

impl GoogleFacade {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            GoogleAuth::ApiKey(key) => request.header("x-goog-api-key", key),
            GoogleAuth::Vertex { access_token, .. } => {
                request.bearer_auth(access_token.as_deref().unwrap_or_default())
            }
        }
    }

    async fn post(&self, url: &str, body: &GenerateContentRequest) -> Result<reqwest::Response> {
        let request = self.authorize(self.client.post(url)).json(body);
        http::send(&self.provider, request).await
    }
}

#[async_trait]
impl ResponseFacade for GoogleFacade {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], config: &EffectiveConfig) -> Result<Completion> {
        let url = format!("{}:generateContent", self.model_url);
        log::debug!("POST {}", url);

        let response = self.post(&url, &build_request(messages, config)).await?;
        let body: GenerateContentResponse = http::json(&self.provider, response).await?;

        let mut completion = Completion::new(body.text());
        if let Some(usage) = &body.usage_metadata {
            completion =
                completion.with_usage(usage.prompt_token_count, usage.candidates_token_count);
        }
        if let Some(reason) = body.candidates.first().and_then(|c| c.finish_reason.clone()) {
            completion = completion.with_metadata("finish_reason", reason);
        }
        Ok(completion)
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        config: &EffectiveConfig,
    ) -> Result<FragmentStream> {
        let url = format!("{}:streamGenerateContent?alt=sse", self.model_url);
        let response = self.post(&url, &build_request(messages, config)).await?;

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

fn chunk_text(provider: &str, data: &str) -> Result<Option<String>> {
    let value = http::parse_event(provider, data)?;
    if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(LlmError::backend(provider, message));
    }
    let chunk: GenerateContentResponse = serde_json::from_value(value)?;
    let text = chunk.text();
    Ok((!text.is_empty()).then_some(text))
}
