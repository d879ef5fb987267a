//! Provider-agnostic LLM client library
//!
//! One interface over several backends:
//! - Mock (deterministic, offline)
//! - Anthropic API (direct)
//! - OpenAI-compatible APIs (OpenAI, Together, Grok, OpenRouter, Cerebras, Hugging Face)
//! - Google Gemini (API key or Vertex AI)
//! - AWS Bedrock (Converse API)
//! - Claude CLI (subprocess)
//!
//! Start from [`LlmSystem`], which loads configuration, registers every
//! built-in provider and hands out cached [`Client`]s.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod facade;
pub mod history;
pub mod params;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod request;
pub mod response;
pub mod system;

pub use catalog::{ModelDescriptor, ModelsConfig, ProviderDescriptor};
pub use client::Client;
pub use config::{ClientSettings, ConfigResolver, SourceMap};
pub use error::{ErrorKind, LlmError, ResponseError, Result};
pub use facade::{ResponseFacade, TextStream};
pub use history::{Interaction, InteractionHistory};
pub use params::{EffectiveConfig, GenerationParams};
pub use provider::{Credentials, FacadeOptions, ProviderAdapter, ProviderConstructor, ProviderContext};
pub use providers::{MockAdapter, ProviderKind};
pub use registry::{ClientOptions, ClientRegistry, ProviderRegistry};
pub use request::{Input, Message, Request, Role};
pub use response::{Response, TokenUsage};
pub use system::{LlmSystem, ProviderInfo};
