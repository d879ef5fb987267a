//! Stateful client bound to one facade
//!
//! Adds default parameters, precedence resolution and a bounded
//! interaction history on top of a [`ResponseFacade`].

use futures_util::stream::{self, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::catalog::ModelDescriptor;
use crate::config::ConfigResolver;
use crate::error::ResponseError;
use crate::facade::{ResponseFacade, TextStream};
use crate::history::{Interaction, InteractionHistory};
use crate::params::{EffectiveConfig, GenerationParams};
use crate::request::{Input, Message, Request, Role};
use crate::response::{Completion, Response};

pub struct Client {
    facade: Arc<dyn ResponseFacade>,
    model_info: Option<ModelDescriptor>,
    resolver: Arc<ConfigResolver>,
    history: Arc<Mutex<InteractionHistory>>,
    defaults: RwLock<GenerationParams>,
}

fn lock(history: &Mutex<InteractionHistory>) -> MutexGuard<'_, InteractionHistory> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Client {
    /// History capacity comes from the resolved settings
    pub fn new(facade: Arc<dyn ResponseFacade>, resolver: Arc<ConfigResolver>) -> Self {
        let capacity = resolver.settings().history_size;
        Self {
            facade,
            model_info: None,
            resolver,
            history: Arc::new(Mutex::new(InteractionHistory::new(capacity))),
            defaults: RwLock::new(GenerationParams::default()),
        }
    }

    pub fn with_history_size(mut self, capacity: usize) -> Self {
        self.history = Arc::new(Mutex::new(InteractionHistory::new(capacity)));
        self
    }

    pub fn with_model_info(mut self, info: Option<ModelDescriptor>) -> Self {
        self.model_info = info;
        self
    }

    pub fn with_default_params(self, params: GenerationParams) -> Self {
        self.set_default_params(params);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.facade.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.facade.model_name()
    }

    pub fn model_info(&self) -> Option<&ModelDescriptor> {
        self.model_info.as_ref()
    }

    /// Merge into this client's defaults; keys set here override earlier ones
    pub fn set_default_params(&self, params: GenerationParams) {
        let mut defaults = self
            .defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *defaults = defaults.overlay(&params);
    }

    pub fn default_params(&self) -> GenerationParams {
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Static sources < client defaults < per-call params
    pub fn effective_config(&self, call: &GenerationParams) -> EffectiveConfig {
        let layered = self.default_params().overlay(call);
        self.resolver.resolve(&layered)
    }

    pub async fn generate(&self, prompt: &str) -> Response {
        self.send(Request::prompt(prompt)).await
    }

    pub async fn chat(&self, messages: Vec<Message>) -> Response {
        self.send(Request::messages(messages)).await
    }

    /// Run one request. Always yields a response; the interaction is
    /// recorded (errors included) unless `save_to_history` is off.
    pub async fn send(&self, request: Request) -> Response {
        let response = match request.input.validate() {
            Ok(()) => {
                let messages = self.build_messages(&request);
                let config = self.effective_config(&request.params);
                log::debug!(
                    "{}/{}: {} messages",
                    self.provider_name(),
                    self.model_name(),
                    messages.len()
                );
                self.facade.chat(&messages, &config).await
            }
            Err(e) => {
                log::warn!("Rejected request: {}", e);
                Response::failure(self.provider_name(), self.model_name(), &e)
            }
        };

        if request.save_to_history {
            lock(&self.history).record(Interaction::new(request.input, response.clone()));
        }
        response
    }

    pub async fn generate_stream(&self, prompt: &str) -> TextStream {
        self.send_stream(Request::prompt(prompt)).await
    }

    pub async fn chat_stream(&self, messages: Vec<Message>) -> TextStream {
        self.send_stream(Request::messages(messages)).await
    }

    /// Streaming variant of [`Client::send`].
    ///
    /// One interaction is recorded once the stream has been polled to its
    /// end. A stream dropped early records nothing.
    pub async fn send_stream(&self, request: Request) -> TextStream {
        let fragments = match request.input.validate() {
            Ok(()) => {
                let messages = self.build_messages(&request);
                let config = self.effective_config(&request.params);
                self.facade.chat_stream(&messages, &config).await
            }
            Err(e) => {
                let error = ResponseError::from(&e);
                stream::once(async move { Err(error) }).boxed()
            }
        };

        let provider = self.provider_name().to_string();
        let model = self.model_name().to_string();
        let history = Arc::clone(&self.history);
        let Request {
            input,
            save_to_history,
            ..
        } = request;

        let recorded = async_stream::stream! {
            let mut fragments = fragments;
            let mut content = String::new();
            let mut error: Option<ResponseError> = None;

            while let Some(item) = fragments.next().await {
                match &item {
                    Ok(fragment) => content.push_str(fragment),
                    Err(e) => {
                        if error.is_none() {
                            error = Some(e.clone());
                        }
                    }
                }
                yield item;
            }

            if save_to_history {
                let response = match error {
                    Some(e) => Response::failure(&provider, &model, e),
                    None => Response::success(&provider, &model, Completion::new(content)),
                };
                lock(&history).record(Interaction::new(input, response));
            }
        };
        recorded.boxed()
    }

    /// Chat with the last `shot_count` interactions as context, oldest
    /// first. Uses whatever is available when history is shorter.
    pub async fn multi_shot_generate(&self, prompt: &str, shot_count: usize) -> Response {
        if Input::Prompt(prompt.to_string()).validate().is_err() {
            return self.generate(prompt).await;
        }
        let mut messages = lock(&self.history).as_messages(Some(shot_count));
        messages.push(Message::user(prompt));
        self.send(Request::messages(messages)).await
    }

    /// Last `n` interactions, oldest first; all when `n` is `None`
    pub fn get_history(&self, n: Option<usize>) -> Vec<Interaction> {
        lock(&self.history).recent(n)
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    pub fn history_is_empty(&self) -> bool {
        lock(&self.history).is_empty()
    }

    pub fn history_capacity(&self) -> usize {
        lock(&self.history).capacity()
    }

    // Leading system messages stay first; history goes right after them
    fn build_messages(&self, request: &Request) -> Vec<Message> {
        let mut messages = request.input.to_messages();
        if request.use_history {
            let prior = lock(&self.history).as_messages(request.history_depth);
            let at = messages
                .iter()
                .take_while(|m| m.role == Role::System)
                .count();
            messages.splice(at..at, prior);
        }
        messages
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("provider", &self.provider_name())
            .field("model", &self.model_name())
            .field("history_len", &self.history_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::{FacadeOptions, ProviderAdapter};
    use crate::providers::MockAdapter;
    use crate::providers::mock::MOCK_MODEL;

    fn client_on(adapter: &MockAdapter) -> Client {
        let facade = adapter
            .create_facade(MOCK_MODEL, &FacadeOptions::default())
            .unwrap();
        Client::new(facade, Arc::new(ConfigResolver::default()))
    }

    fn client() -> Client {
        client_on(&MockAdapter::standalone())
    }

    #[tokio::test]
    async fn test_generate_records_one_interaction() {
        let client = client();
        let response = client.generate("ping").await;

        assert!(response.is_ok());
        assert!(response.content().contains("ping"));
        assert_eq!(client.history_len(), 1);
        assert_eq!(client.get_history(None)[0].response(), &response);
    }

    #[tokio::test]
    async fn test_failures_are_recorded() {
        let adapter = MockAdapter::standalone().always_fails("backend down");
        let client = client_on(&adapter);

        for _ in 0..2 {
            let response = client.generate("same").await;
            assert_eq!(response.error().unwrap().message, "backend down");
        }
        assert_eq!(client.history_len(), 2);

        let invalid = client.generate("   ").await;
        assert_eq!(invalid.error().unwrap().kind, ErrorKind::Validation);
        assert_eq!(client.history_len(), 3);
    }

    #[tokio::test]
    async fn test_without_saving_leaves_history_alone() {
        let client = client();
        client.send(Request::prompt("quiet").without_saving()).await;
        assert!(client.history_is_empty());
    }

    #[tokio::test]
    async fn test_multi_shot_uses_available_history() {
        let client = client();
        client.generate("first").await;

        let response = client.multi_shot_generate("second", 5).await;
        assert!(response.is_ok());
        // one prior pair plus the new prompt
        assert_eq!(response.metadata()["messages_count"], 3);
        assert_eq!(client.history_len(), 2);
    }

    #[tokio::test]
    async fn test_use_history_prepends_after_system() {
        let client = client();
        client.generate("a").await;
        client.generate("b").await;

        let request = Request::messages(vec![Message::system("sys"), Message::user("c")])
            .with_history(Some(1));
        let messages = client.build_messages(&request);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[0], "sys");
        assert_eq!(contents[1], "b");
        assert_eq!(messages.len(), 4);
        assert_eq!(contents[3], "c");
    }

    #[tokio::test]
    async fn test_default_params_layering() {
        let client = client();
        client.set_default_params(GenerationParams::new().with_temperature(0.25));
        client.set_default_params(GenerationParams::new().with_max_tokens(10));

        let defaults = client.default_params();
        assert_eq!(defaults.temperature, Some(0.25));
        assert_eq!(defaults.max_tokens, Some(10));

        let response = client.generate("x").await;
        assert_eq!(response.metadata()["temperature"], 0.25);

        let request = Request::prompt("x").with_params(GenerationParams::new().with_temperature(0.5));
        let response = client.send(request).await;
        assert_eq!(response.metadata()["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_stream_records_only_when_exhausted() {
        let client = client();

        let mut partial = client.generate_stream("one two three").await;
        assert!(partial.next().await.is_some());
        drop(partial);
        assert!(client.history_is_empty());

        let fragments: Vec<String> = client
            .generate_stream("one two three")
            .await
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(client.history_len(), 1);
        assert_eq!(
            client.get_history(None)[0].response().content(),
            fragments.concat()
        );
    }

    #[tokio::test]
    async fn test_history_capacity_and_clear() {
        let client = client().with_history_size(2);
        for prompt in ["A", "B", "C"] {
            client.generate(prompt).await;
        }
        let prompts: Vec<_> = client
            .get_history(None)
            .iter()
            .map(|i| i.input().user_text().to_string())
            .collect();
        assert_eq!(prompts, vec!["B", "C"]);
        assert_eq!(client.history_capacity(), 2);

        client.clear_history();
        assert!(client.history_is_empty());
    }

    #[tokio::test]
    async fn test_multi_shot_rejects_blank_prompt() {
        let client = client();
        client.generate("first").await;

        let response = client.multi_shot_generate("  ", 3).await;
        assert_eq!(response.error().unwrap().kind, ErrorKind::Validation);
        assert!(response.content().is_empty());
        assert_eq!(client.history_len(), 2);
    }

    #[tokio::test]
    async fn test_empty_answer_is_recorded_as_failure() {
        let adapter = MockAdapter::standalone();
        let options = FacadeOptions {
            response_template: Some(String::new()),
            ..Default::default()
        };
        let facade = adapter.create_facade(MOCK_MODEL, &options).unwrap();
        let client = Client::new(facade, Arc::new(ConfigResolver::default()));

        let response = client.generate("ping").await;
        assert_eq!(response.error().unwrap().kind, ErrorKind::BackendRequest);
        assert!(response.content().is_empty());

        let fragments: Vec<_> = client.generate_stream("ping").await.collect().await;
        assert!(fragments.last().unwrap().is_err());

        let history = client.get_history(None);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|i| i.response().error().is_some()));
    }
}
