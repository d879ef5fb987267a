//! Per-model response facade
//!
//! A facade is bound to one provider/model pair. Variants only implement
//! [`ResponseFacade::complete`] (and optionally [`ResponseFacade::open_stream`]);
//! the provided methods turn every backend failure into an error-bearing
//! [`Response`] or stream item so nothing raw escapes to the caller.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::{LlmError, ResponseError, Result};
use crate::params::EffectiveConfig;
use crate::request::Message;
use crate::response::{Completion, Response};

/// Raw fragment stream produced by a backend
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Normalized fragment stream handed to callers
pub type TextStream = BoxStream<'static, std::result::Result<String, ResponseError>>;

#[async_trait]
pub trait ResponseFacade: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Run one completion against the backend
    async fn complete(&self, messages: &[Message], config: &EffectiveConfig)
    -> Result<Completion>;

    /// Open a fragment stream. Backends without native streaming get the
    /// whole completion as a single fragment.
    async fn open_stream(
        &self,
        messages: &[Message],
        config: &EffectiveConfig,
    ) -> Result<FragmentStream> {
        let completion = self.complete(messages, config).await?;
        Ok(stream::once(async move { Ok(completion.content) }).boxed())
    }

    async fn generate(&self, prompt: &str, config: &EffectiveConfig) -> Response {
        let messages = [Message::user(prompt)];
        self.chat(&messages, config).await
    }

    async fn generate_stream(&self, prompt: &str, config: &EffectiveConfig) -> TextStream {
        let messages = [Message::user(prompt)];
        self.chat_stream(&messages, config).await
    }

    async fn chat(&self, messages: &[Message], config: &EffectiveConfig) -> Response {
        let result = match validate(messages) {
            Ok(()) => self.complete(messages, config).await,
            Err(e) => Err(e),
        }
        .and_then(|completion| {
            if completion.content.is_empty() {
                Err(empty_response(self.provider_name()))
            } else {
                Ok(completion)
            }
        });
        match result {
            Ok(completion) => {
                Response::success(self.provider_name(), self.model_name(), completion)
            }
            Err(e) => {
                log::error!(
                    "{}/{} request failed: {}",
                    self.provider_name(),
                    self.model_name(),
                    e
                );
                Response::failure(self.provider_name(), self.model_name(), &e)
            }
        }
    }

    async fn chat_stream(&self, messages: &[Message], config: &EffectiveConfig) -> TextStream {
        let opened = match validate(messages) {
            Ok(()) => self.open_stream(messages, config).await,
            Err(e) => Err(e),
        };
        match opened {
            Ok(fragments) => {
                let provider = self.provider_name().to_string();
                async_stream::stream! {
                    let mut fragments = fragments;
                    let mut produced = false;
                    while let Some(item) = fragments.next().await {
                        match item {
                            Ok(fragment) => {
                                produced |= !fragment.is_empty();
                                yield Ok(fragment);
                            }
                            Err(e) => {
                                produced = true;
                                yield Err(ResponseError::from(&e));
                            }
                        }
                    }
                    if !produced {
                        yield Err(ResponseError::from(&empty_response(&provider)));
                    }
                }
                .boxed()
            }
            Err(e) => {
                log::error!(
                    "{}/{} stream failed to open: {}",
                    self.provider_name(),
                    self.model_name(),
                    e
                );
                let error = ResponseError::from(&e);
                stream::once(async move { Err(error) }).boxed()
            }
        }
    }
}

fn validate(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(LlmError::Validation("no prompt or messages given".into()));
    }
    Ok(())
}

fn empty_response(provider: &str) -> LlmError {
    LlmError::backend(provider, "empty response")
}
