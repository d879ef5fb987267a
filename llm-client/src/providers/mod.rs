//! LLM provider implementations

mod anthropic;
mod bedrock;
mod claude_cli;
mod google;
mod http;
pub mod mock;
mod openai_compatible;

pub use anthropic::{AnthropicAdapter, AnthropicFacade};
pub use bedrock::{BedrockAdapter, BedrockFacade};
pub use claude_cli::{ClaudeCliAdapter, ClaudeCliFacade};
pub use google::{GoogleAdapter, GoogleFacade};
pub use mock::{MockAdapter, MockFacade};
pub use openai_compatible::{OpenAICompatibleAdapter, OpenAICompatibleFacade, Preset};

use std::sync::Arc;

use crate::error::{LlmError, Result};
use crate::provider::{ProviderAdapter, ProviderConstructor, ProviderContext};
use crate::registry::ProviderRegistry;

/// Supported provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    Anthropic,
    OpenAI,
    Together,
    Grok,
    OpenRouter,
    Cerebras,
    HuggingFace,
    Google,
    Bedrock,
    ClaudeCli,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 11] = [
        Self::Mock,
        Self::Anthropic,
        Self::OpenAI,
        Self::Together,
        Self::Grok,
        Self::OpenRouter,
        Self::Cerebras,
        Self::HuggingFace,
        Self::Google,
        Self::Bedrock,
        Self::ClaudeCli,
    ];

    /// Canonical registry name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::Together => "together",
            Self::Grok => "grok",
            Self::OpenRouter => "openrouter",
            Self::Cerebras => "cerebras",
            Self::HuggingFace => "huggingface",
            Self::Google => "google",
            Self::Bedrock => "bedrock",
            Self::ClaudeCli => "claude-cli",
        }
    }

    /// Parse provider kind from string
    pub fn from_name(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            "together" | "togetherai" => Ok(Self::Together),
            "grok" | "xai" => Ok(Self::Grok),
            "openrouter" => Ok(Self::OpenRouter),
            "cerebras" => Ok(Self::Cerebras),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "google" | "gemini" | "vertex" => Ok(Self::Google),
            "bedrock" | "aws" => Ok(Self::Bedrock),
            "claude-cli" | "claude_cli" | "claudecli" => Ok(Self::ClaudeCli),
            _ => Err(LlmError::ProviderNotRegistered {
                name: s.to_string(),
                available: Self::ALL.iter().map(|k| k.name().to_string()).collect(),
            }),
        }
    }

    /// Get the environment variable name for this provider's primary credential
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Self::Mock | Self::ClaudeCli => None,
            Self::Anthropic => Some(anthropic::API_KEY_ENV),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Together => Some("TOGETHER_API_KEY"),
            Self::Grok => Some("GROK_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Cerebras => Some("CEREBRAS_API_KEY"),
            Self::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            Self::Google => Some(google::API_KEY_ENV),
            Self::Bedrock => Some(bedrock::BEARER_TOKEN_ENV),
        }
    }

    /// Build an adapter of this kind
    pub fn build(&self, ctx: &ProviderContext) -> Arc<dyn ProviderAdapter> {
        match self {
            Self::Mock => Arc::new(MockAdapter::new(ctx)),
            Self::Anthropic => Arc::new(AnthropicAdapter::new(ctx)),
            Self::OpenAI => Arc::new(OpenAICompatibleAdapter::new(ctx, &openai_compatible::OPENAI)),
            Self::Together => {
                Arc::new(OpenAICompatibleAdapter::new(ctx, &openai_compatible::TOGETHER))
            }
            Self::Grok => Arc::new(OpenAICompatibleAdapter::new(ctx, &openai_compatible::GROK)),
            Self::OpenRouter => {
                Arc::new(OpenAICompatibleAdapter::new(ctx, &openai_compatible::OPENROUTER))
            }
            Self::Cerebras => {
                Arc::new(OpenAICompatibleAdapter::new(ctx, &openai_compatible::CEREBRAS))
            }
            Self::HuggingFace => {
                Arc::new(OpenAICompatibleAdapter::new(ctx, &openai_compatible::HUGGINGFACE))
            }
            Self::Google => Arc::new(GoogleAdapter::new(ctx)),
            Self::Bedrock => Arc::new(BedrockAdapter::new(ctx)),
            Self::ClaudeCli => Arc::new(ClaudeCliAdapter::new(ctx)),
        }
    }

    pub fn constructor(self) -> ProviderConstructor {
        Arc::new(move |ctx: &ProviderContext| -> Result<Arc<dyn ProviderAdapter>> {
            Ok(self.build(ctx))
        })
    }
}

/// Registry key for `name`: built-in aliases map to their canonical
/// name, anything else is just lowercased
pub fn canonical_name(name: &str) -> String {
    match ProviderKind::from_name(name) {
        Ok(kind) => kind.name().to_string(),
        Err(_) => name.to_lowercase(),
    }
}

/// Register every built-in provider under its canonical name
pub fn register_builtin(registry: &ProviderRegistry) {
    for kind in ProviderKind::ALL {
        registry.register_provider(kind.name(), kind.constructor());
    }
}

#[cfg(test)]
pub(crate) fn test_context(name: &str, env: &[(&str, &str)]) -> ProviderContext {
    use crate::catalog::ModelsConfig;
    use crate::config::{ConfigResolver, SourceMap};

    let environment = SourceMap::from_pairs(env.iter().copied());
    let resolver = ConfigResolver::new(ModelsConfig::default(), SourceMap::default(), environment)
        .unwrap();
    ProviderContext::new(name, crate::provider::Credentials::none(), Arc::new(resolver))
}
