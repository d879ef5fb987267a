use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{BuiltinModel, ModelDescriptor, ProviderDescriptor};
use crate::config::ConfigResolver;
use crate::error::{LlmError, Result};
use crate::facade::ResponseFacade;

/// Opaque credential material passed explicitly by the caller.
///
/// `api_key` covers bearer-style keys; `extra` holds anything else a backend
/// needs (region, project, access token, CLI path).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl Credentials {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.extra.is_empty()
    }

    /// Stable short digest used as a cache key; never reveals the secret
    pub fn fingerprint(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_deref().unwrap_or_default());
        for (key, value) in &self.extra {
            hasher.update([0u8]);
            hasher.update(key);
            hasher.update([0u8]);
            hasher.update(value);
        }
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-facade options. Keys not listed here are not accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacadeOptions {
    /// Override the backend endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Mock only: content template with a `{prompt}` placeholder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
}

/// Everything a provider constructor gets to build an adapter
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub name: String,
    pub credentials: Credentials,
    pub descriptor: Option<ProviderDescriptor>,
    /// Models configured for this provider in the catalog
    pub models: Vec<ModelDescriptor>,
    pub resolver: Arc<ConfigResolver>,
}

impl ProviderContext {
    pub fn new(name: &str, credentials: Credentials, resolver: Arc<ConfigResolver>) -> Self {
        let catalog = resolver.catalog();
        Self {
            name: name.to_lowercase(),
            credentials,
            descriptor: catalog.provider(name).cloned(),
            models: catalog.models_for(name),
            resolver,
        }
    }

    /// Credential or option lookup: explicit credentials, provider options,
    /// then environment and properties file
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.credentials
            .extra
            .get(key)
            .cloned()
            .or_else(|| {
                self.descriptor
                    .as_ref()
                    .and_then(|d| d.options.get(key).cloned())
            })
            .or_else(|| self.resolver.lookup(key).map(str::to_string))
    }

    /// API key: explicit, then the descriptor's env var (or `fallback_env`)
    pub fn api_key(&self, fallback_env: &str) -> Option<String> {
        if let Some(key) = &self.credentials.api_key {
            return Some(key.clone());
        }
        let env_var = self
            .descriptor
            .as_ref()
            .and_then(|d| d.api_key_env.clone())
            .unwrap_or_else(|| fallback_env.to_string());
        self.resolver.lookup(&env_var).map(str::to_string)
    }

    pub fn base_url(&self) -> Option<String> {
        self.descriptor.as_ref().and_then(|d| d.base_url.clone())
    }

    /// The catalog's models when configured, else the adapter's built-ins
    pub fn model_set(&self, builtin: &[BuiltinModel]) -> Vec<ModelDescriptor> {
        if !self.models.is_empty() {
            return self.models.clone();
        }
        builtin.iter().map(|m| m.describe(&self.name)).collect()
    }
}

/// Backend adapter: knows its models and builds per-model facades
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn models(&self) -> &[ModelDescriptor];

    fn list_models(&self) -> Vec<String> {
        self.models().iter().map(|m| m.name.clone()).collect()
    }

    fn model_info(&self, model: &str) -> Option<ModelDescriptor> {
        self.models().iter().find(|m| m.name == model).cloned()
    }

    fn supports_model(&self, model: &str) -> bool {
        self.models().iter().any(|m| m.name == model)
    }

    /// Whether the credential material this backend needs is present.
    /// Never fails and never touches the network.
    fn validate_credentials(&self) -> bool;

    /// Build a facade for `model`; `UnknownModel` if not offered
    fn create_facade(
        &self,
        model: &str,
        options: &FacadeOptions,
    ) -> Result<Arc<dyn ResponseFacade>>;

    fn unknown_model(&self, model: &str) -> LlmError {
        LlmError::UnknownModel {
            provider: self.name().to_string(),
            model: model.to_string(),
            available: self.list_models(),
        }
    }
}

/// Builds an adapter from its context. Registered per provider name.
///
/// Runs while the owning [`ProviderRegistry`](crate::ProviderRegistry) is
/// locked, so it must not call back into that registry; everything it
/// needs arrives through the context.
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderContext) -> Result<Arc<dyn ProviderAdapter>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelsConfig;
    use crate::config::SourceMap;

    fn resolver(doc: &str, env: &[(&str, &str)]) -> Arc<ConfigResolver> {
        let catalog = ModelsConfig::from_json(doc).unwrap();
        let environment = SourceMap::from_pairs(env.iter().copied());
        Arc::new(ConfigResolver::new(catalog, SourceMap::default(), environment).unwrap())
    }

    #[test]
    fn test_fingerprint_is_stable_and_hides_secret() {
        let a = Credentials::api_key("sk-secret");
        let b = Credentials::api_key("sk-secret");
        let c = Credentials::api_key("sk-other");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert!(!format!("{:?}", a).contains("sk-secret"));
        assert_eq!(Credentials::none().fingerprint(), "none");
    }

    #[test]
    fn test_api_key_lookup_order() {
        let resolver = resolver(
            r#"{"providers": {"anthropic": {"api_key_env": "CLAUDE_KEY"}}}"#,
            &[("CLAUDE_KEY", "from-env"), ("ANTHROPIC_API_KEY", "ignored")],
        );

        let ctx = ProviderContext::new("anthropic", Credentials::none(), resolver.clone());
        assert_eq!(ctx.api_key("ANTHROPIC_API_KEY").as_deref(), Some("from-env"));

        let ctx = ProviderContext::new("anthropic", Credentials::api_key("explicit"), resolver);
        assert_eq!(ctx.api_key("ANTHROPIC_API_KEY").as_deref(), Some("explicit"));
    }

    #[test]
    fn test_lookup_prefers_explicit_then_options() {
        let resolver = resolver(
            r#"{"providers": {"bedrock": {"options": {"region": "eu-west-1"}}}}"#,
            &[("region", "env-region")],
        );
        let ctx = ProviderContext::new("bedrock", Credentials::none(), resolver.clone());
        assert_eq!(ctx.lookup("region").as_deref(), Some("eu-west-1"));

        let ctx = ProviderContext::new(
            "bedrock",
            Credentials::none().with("region", "us-west-2"),
            resolver,
        );
        assert_eq!(ctx.lookup("region").as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_model_set_prefers_catalog() {
        const BUILTIN: [BuiltinModel; 1] = [BuiltinModel::new("b-1", 1000, 100, 1.0, 2.0)];

        let ctx = ProviderContext::new("x", Credentials::none(), resolver("{}", &[]));
        assert_eq!(ctx.model_set(&BUILTIN)[0].name, "b-1");

        let ctx = ProviderContext::new(
            "x",
            Credentials::none(),
            resolver(r#"{"providers": {"x": {"models": ["c-1"]}}}"#, &[]),
        );
        let names: Vec<_> = ctx.model_set(&BUILTIN).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["c-1"]);
    }
}
