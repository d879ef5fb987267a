//! One-call bootstrap: configuration, provider registry and client registry

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::ModelDescriptor;
use crate::client::Client;
use crate::config::ConfigResolver;
use crate::error::Result;
use crate::provider::Credentials;
use crate::providers::{ProviderKind, canonical_name};
use crate::registry::{ClientOptions, ClientRegistry, ProviderRegistry};

/// Status of one registered provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub enabled: bool,
    pub credentials_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    pub models: Vec<String>,
}

/// Everything needed to create clients, built once at startup
pub struct LlmSystem {
    resolver: Arc<ConfigResolver>,
    providers: Arc<ProviderRegistry>,
    clients: ClientRegistry,
}

impl LlmSystem {
    /// Load configuration from `config_dir` and the process environment,
    /// then register every built-in provider
    pub fn initialize(config_dir: &Path) -> Result<Self> {
        log::info!("Initializing from {}", config_dir.display());
        Ok(Self::from_resolver(ConfigResolver::load(config_dir)?))
    }

    /// [`LlmSystem::initialize`] on `$LLM_CONFIG_DIR` or the default directory
    pub fn from_default_dir() -> Result<Self> {
        Self::initialize(&ConfigResolver::default_config_dir()?)
    }

    pub fn from_resolver(resolver: ConfigResolver) -> Self {
        let resolver = Arc::new(resolver);
        let providers = Arc::new(ProviderRegistry::with_builtin(Arc::clone(&resolver)));
        let clients = ClientRegistry::new(Arc::clone(&providers));
        Self {
            resolver,
            providers,
            clients,
        }
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn client_registry(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Cached client; `None` picks the configured default
    pub fn create_client(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        options: &ClientOptions,
    ) -> Result<Arc<Client>> {
        self.clients.get_client(provider, model, options)
    }

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .registered_providers()
            .iter()
            .filter_map(|name| match self.provider_info(name) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::warn!("Skipping provider {}: {}", name, e);
                    None
                }
            })
            .collect()
    }

    pub fn provider_info(&self, name: &str) -> Result<ProviderInfo> {
        let adapter = self.providers.get_provider(name, &Credentials::none())?;
        let name = canonical_name(name);
        let name = name.as_str();
        let credential_env = match self.resolver.catalog().provider(name) {
            Some(descriptor) if descriptor.requires_api_key => Some(descriptor.api_key_env()),
            Some(_) => None,
            None => ProviderKind::from_name(name)
                .ok()
                .and_then(|kind| kind.env_var())
                .map(str::to_string),
        };
        Ok(ProviderInfo {
            name: adapter.name().to_string(),
            enabled: self.providers.is_enabled(name),
            credentials_valid: adapter.validate_credentials(),
            credential_env,
            models: adapter.list_models(),
        })
    }

    /// Models of one provider, or of every registered provider
    pub fn list_models(&self, provider: Option<&str>) -> Result<Vec<ModelDescriptor>> {
        let names = match provider {
            Some(name) => vec![name.to_string()],
            None => self.providers.registered_providers(),
        };
        let mut models = Vec::new();
        for name in names {
            let adapter = self.providers.get_provider(&name, &Credentials::none())?;
            models.extend(adapter.models().iter().cloned());
        }
        Ok(models)
    }

    /// Descriptor by model name: the models document first, then every
    /// provider's model set
    pub fn model_info(&self, name: &str) -> Option<ModelDescriptor> {
        if let Some(model) = self.resolver.catalog().model(name) {
            return Some(model.clone());
        }
        self.list_models(None)
            .ok()?
            .into_iter()
            .find(|model| model.name == name)
    }
}
