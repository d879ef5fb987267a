//! Mock LLM provider
//!
//! Deterministic, input-derived responses with no network access. Used as
//! the default provider, the fallback target and in tests, where it can
//! also simulate failures.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::catalog::{BuiltinModel, ModelDescriptor};
use crate::error::{LlmError, Result};
use crate::facade::{FragmentStream, ResponseFacade};
use crate::params::EffectiveConfig;
use crate::provider::{FacadeOptions, ProviderAdapter, ProviderContext};
use crate::request::{Message, Role};
use crate::response::Completion;

pub const MOCK_PROVIDER: &str = "mock";
pub const MOCK_MODEL: &str = "mock-model";

const DEFAULT_TEMPLATE: &str = "Mock response to: {prompt}";
const PROMPT_PREVIEW_CHARS: usize = 100;

const MODELS: [BuiltinModel; 3] = [
    BuiltinModel::new("mock-model", 4096, 4096, 0.0, 0.0),
    BuiltinModel::new("mock-model-large", 8192, 8192, 0.0, 0.0),
    BuiltinModel::new("mock-model-fast", 2048, 2048, 0.0, 0.0),
];

/// Shared failure plan for every facade built by one adapter
#[derive(Debug, Default)]
struct FailurePlan {
    /// Number of calls to fail before succeeding (`usize::MAX` = always)
    fail_count: usize,
    message: Option<String>,
    call_count: AtomicUsize,
}

/// Mock adapter
pub struct MockAdapter {
    name: String,
    models: Vec<ModelDescriptor>,
    plan: Arc<FailurePlan>,
}

impl MockAdapter {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self {
            name: ctx.name.clone(),
            models: ctx.model_set(&MODELS),
            plan: Arc::new(FailurePlan::default()),
        }
    }

    /// A standalone mock with the built-in model set
    pub fn standalone() -> Self {
        Self {
            name: MOCK_PROVIDER.to_string(),
            models: MODELS.iter().map(|m| m.describe(MOCK_PROVIDER)).collect(),
            plan: Arc::new(FailurePlan::default()),
        }
    }

    /// Fail the first `n` calls with `message`, then succeed
    pub fn fails_then_succeeds(mut self, n: usize, message: &str) -> Self {
        self.plan = Arc::new(FailurePlan {
            fail_count: n,
            message: Some(message.to_string()),
            call_count: AtomicUsize::new(0),
        });
        self
    }

    /// Fail every call with `message`
    pub fn always_fails(self, message: &str) -> Self {
        self.fails_then_succeeds(usize::MAX, message)
    }

    /// Number of completions attempted across all facades of this adapter
    pub fn call_count(&self) -> usize {
        self.plan.call_count.load(Ordering::SeqCst)
    }
}

impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    fn validate_credentials(&self) -> bool {
        true
    }

    fn create_facade(
        &self,
        model: &str,
        options: &FacadeOptions,
    ) -> Result<Arc<dyn ResponseFacade>> {
        if !self.supports_model(model) {
            return Err(self.unknown_model(model));
        }
        Ok(Arc::new(MockFacade {
            provider: self.name.clone(),
            model: model.to_string(),
            template: options
                .response_template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            plan: Arc::clone(&self.plan),
        }))
    }
}

/// Mock facade
pub struct MockFacade {
    provider: String,
    model: String,
    template: String,
    plan: Arc<FailurePlan>,
}

impl MockFacade {
    fn render(&self, messages: &[Message]) -> String {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .or(messages.last())
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let preview: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        self.template.replace("{prompt}", &preview)
    }
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[async_trait]
impl ResponseFacade for MockFacade {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], config: &EffectiveConfig) -> Result<Completion> {
        let call_num = self.plan.call_count.fetch_add(1, Ordering::SeqCst);
        if call_num < self.plan.fail_count {
            if let Some(message) = &self.plan.message {
                return Err(LlmError::backend(&self.provider, message.clone()));
            }
        }

        let content = self.render(messages);
        let input_tokens = messages.iter().map(|m| word_count(&m.content)).sum();
        let output_tokens = word_count(&content);

        let mut completion = Completion::new(content)
            .with_usage(input_tokens, output_tokens)
            .with_metadata("mock", true)
            .with_metadata("messages_count", messages.len());
        if let Some(temperature) = config.params().temperature {
            completion = completion.with_metadata("temperature", temperature);
        }
        Ok(completion)
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        config: &EffectiveConfig,
    ) -> Result<FragmentStream> {
        let completion = self.complete(messages, config).await?;
        // Word-sized fragments that concatenate back to the full content
        let fragments: Vec<Result<String>> = completion
            .content
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::params::GenerationParams;

    fn facade(adapter: &MockAdapter) -> Arc<dyn ResponseFacade> {
        adapter
            .create_facade(MOCK_MODEL, &FacadeOptions::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping_is_deterministic() {
        let facade = facade(&MockAdapter::standalone());
        let config = EffectiveConfig::default();

        let first = facade.generate("ping", &config).await;
        let second = facade.generate("ping", &config).await;

        assert!(first.error().is_none());
        assert!(first.content().contains("ping"));
        assert_eq!(first.content(), second.content());
        assert!(first.usage().unwrap().input_tokens > 0);
    }

    #[tokio::test]
    async fn test_stream_matches_generate() {
        let facade = facade(&MockAdapter::standalone());
        let config = EffectiveConfig::default();

        let full = facade.generate("tell me a story", &config).await;
        let fragments: Vec<String> = facade
            .generate_stream("tell me a story", &config)
            .await
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), full.content());
    }

    #[tokio::test]
    async fn test_template_and_metadata() {
        let adapter = MockAdapter::standalone();
        let options = FacadeOptions {
            response_template: Some("echo<{prompt}>".into()),
            ..Default::default()
        };
        let facade = adapter.create_facade("mock-model-fast", &options).unwrap();
        let config = EffectiveConfig::new(GenerationParams::new().with_temperature(0.5));

        let response = facade
            .chat(&[Message::system("sys"), Message::user("hi")], &config)
            .await;
        assert_eq!(response.content(), "echo<hi>");
        assert_eq!(response.metadata()["messages_count"], 2);
        assert_eq!(response.metadata()["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_fails_then_succeeds() {
        let adapter = MockAdapter::standalone().fails_then_succeeds(2, "overloaded");
        let facade = facade(&adapter);
        let config = EffectiveConfig::default();

        for _ in 0..2 {
            let response = facade.generate("test", &config).await;
            let error = response.error().unwrap();
            assert_eq!(error.kind, ErrorKind::BackendRequest);
            assert_eq!(error.message, "overloaded");
        }
        assert!(facade.generate("test", &config).await.is_ok());
        assert_eq!(adapter.call_count(), 3);
    }

    #[test]
    fn test_unknown_model() {
        let adapter = MockAdapter::standalone();
        let err = adapter
            .create_facade("gpt-4", &FacadeOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::UnknownModel { .. }));
        assert_eq!(adapter.list_models().len(), 3);
    }
}
