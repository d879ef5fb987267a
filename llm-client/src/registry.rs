//! Provider and client registries
//!
//! Both are plain values with an explicit lifecycle: build them once (see
//! [`crate::LlmSystem`]) and share them through `Arc`. Each registry
//! serializes its mutations behind a single mutex, and construction runs
//! while that lock is held, so no caller ever observes a half-built entry.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::Client;
use crate::config::ConfigResolver;
use crate::error::{LlmError, Result};
use crate::params::GenerationParams;
use crate::provider::{Credentials, FacadeOptions, ProviderAdapter, ProviderConstructor, ProviderContext};
use crate::providers::canonical_name;
use crate::providers::mock::{MOCK_MODEL, MOCK_PROVIDER};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ProviderState {
    constructors: BTreeMap<String, ProviderConstructor>,
    // (provider, credentials fingerprint) -> adapter
    adapters: HashMap<(String, String), Arc<dyn ProviderAdapter>>,
}

/// Name -> constructor table with a per-credentials adapter cache
pub struct ProviderRegistry {
    resolver: Arc<ConfigResolver>,
    state: Mutex<ProviderState>,
}

impl ProviderRegistry {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        Self {
            resolver,
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// A registry with every built-in provider registered
    pub fn with_builtin(resolver: Arc<ConfigResolver>) -> Self {
        let registry = Self::new(resolver);
        crate::providers::register_builtin(&registry);
        registry
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// Register `constructor` under `name` (case-insensitive, built-in
    /// aliases included). Replaces any previous registration and drops
    /// adapters it already built.
    pub fn register_provider(&self, name: &str, constructor: ProviderConstructor) {
        let name = canonical_name(name);
        let mut state = guard(&self.state);
        if state.constructors.insert(name.clone(), constructor).is_some() {
            log::info!("Re-registered provider {}", name);
            state.adapters.retain(|(provider, _), _| provider != &name);
        } else {
            log::debug!("Registered provider {}", name);
        }
    }

    /// The adapter for `name` with `credentials`, built on first use
    pub fn get_provider(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let name = canonical_name(name);
        let key = (name.clone(), credentials.fingerprint());
        let mut state = guard(&self.state);

        if let Some(adapter) = state.adapters.get(&key) {
            return Ok(Arc::clone(adapter));
        }

        let Some(constructor) = state.constructors.get(&name).cloned() else {
            return Err(LlmError::ProviderNotRegistered {
                name,
                available: state.constructors.keys().cloned().collect(),
            });
        };

        let ctx = ProviderContext::new(&name, credentials.clone(), Arc::clone(&self.resolver));
        let adapter = constructor(&ctx)?;
        log::info!("Created provider {} ({} models)", name, adapter.models().len());
        state.adapters.insert(key, Arc::clone(&adapter));
        Ok(adapter)
    }

    pub fn registered_providers(&self) -> Vec<String> {
        guard(&self.state).constructors.keys().cloned().collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        guard(&self.state)
            .constructors
            .contains_key(&canonical_name(name))
    }

    /// Disabled in the models document; unknown providers count as enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.resolver
            .catalog()
            .provider(&canonical_name(name))
            .is_none_or(|descriptor| descriptor.enabled)
    }

    /// Drop cached adapters for `name`, or all of them
    pub fn clear_cache(&self, name: Option<&str>) {
        let mut state = guard(&self.state);
        match name {
            Some(name) => {
                let name = canonical_name(name);
                state.adapters.retain(|(provider, _), _| provider != &name);
            }
            None => state.adapters.clear(),
        }
    }
}

/// Per-client overrides. Part of the client cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientOptions {
    #[serde(skip)]
    pub credentials: Credentials,
    pub history_size: Option<usize>,
    pub params: GenerationParams,
    pub facade: FacadeOptions,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = Some(size);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_facade_options(mut self, facade: FacadeOptions) -> Self {
        self.facade = facade;
        self
    }

    /// Stable digest of every option; credentials enter only through
    /// their own fingerprint
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.credentials.fingerprint());
        hasher.update(serde_json::to_string(self).unwrap_or_default());
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Client cache keyed by provider, model and options
pub struct ClientRegistry {
    providers: Arc<ProviderRegistry>,
    clients: Mutex<HashMap<(String, String, String), Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Shared client for `(provider, model, options)`. Identical keys return
    /// the same instance, history included.
    pub fn get_client(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        options: &ClientOptions,
    ) -> Result<Arc<Client>> {
        let settings = self.providers.resolver().settings();
        let provider = canonical_name(provider.unwrap_or(&settings.default_provider));
        let model = match model {
            Some(model) => Some(model.to_string()),
            None => self.default_model(&provider, &options.credentials),
        };
        let key = (
            provider.clone(),
            model.clone().unwrap_or_default(),
            options.fingerprint(),
        );

        let mut clients = guard(&self.clients);
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(self.create_client(Some(&provider), model.as_deref(), options)?);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Build a new, uncached client.
    ///
    /// A missing model resolves to the configured default model when the
    /// provider is the default provider, else to the provider's first model.
    pub fn create_client(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        options: &ClientOptions,
    ) -> Result<Client> {
        let resolver = self.providers.resolver();
        let settings = resolver.settings();
        let provider = canonical_name(provider.unwrap_or(&settings.default_provider));

        let (adapter, model) = match self.usable_adapter(&provider, &options.credentials) {
            Ok(adapter) => {
                let model = match model {
                    Some(model) => model.to_string(),
                    None => self
                        .default_model(&provider, &options.credentials)
                        .unwrap_or_else(|| settings.default_model.clone()),
                };
                (adapter, model)
            }
            Err(e) if settings.fallback_to_mock && is_fallback_error(&e) => {
                log::warn!("{}; falling back to {}/{}", e, MOCK_PROVIDER, MOCK_MODEL);
                let adapter = self
                    .providers
                    .get_provider(MOCK_PROVIDER, &Credentials::none())
                    .map_err(|_| e)?;
                (adapter, MOCK_MODEL.to_string())
            }
            Err(e) => return Err(e),
        };

        let facade = adapter.create_facade(&model, &options.facade)?;
        let history_size = options.history_size.unwrap_or(settings.history_size);
        log::info!("Created client {}/{}", adapter.name(), model);

        Ok(Client::new(facade, Arc::clone(resolver))
            .with_history_size(history_size)
            .with_model_info(adapter.model_info(&model))
            .with_default_params(options.params.clone()))
    }

    pub fn clear_cache(&self) {
        guard(&self.clients).clear();
    }

    pub fn cached_clients(&self) -> usize {
        guard(&self.clients).len()
    }

    // Configured default model for the default provider, else the
    // provider's first model
    fn default_model(&self, provider: &str, credentials: &Credentials) -> Option<String> {
        let settings = self.providers.resolver().settings();
        if provider == canonical_name(&settings.default_provider) {
            return Some(settings.default_model.clone());
        }
        self.providers
            .get_provider(provider, credentials)
            .ok()?
            .list_models()
            .into_iter()
            .next()
    }

    // Registered, enabled and holding valid credentials
    fn usable_adapter(
        &self,
        provider: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        if self.providers.is_registered(provider) && !self.providers.is_enabled(provider) {
            return Err(LlmError::Credential {
                provider: provider.to_string(),
                message: "provider is disabled in configuration".into(),
            });
        }
        let adapter = self.providers.get_provider(provider, credentials)?;
        if !adapter.validate_credentials() {
            return Err(LlmError::Credential {
                provider: provider.to_string(),
                message: "required credentials are missing or invalid".into(),
            });
        }
        Ok(adapter)
    }
}

fn is_fallback_error(error: &LlmError) -> bool {
    matches!(
        error,
        LlmError::ProviderNotRegistered { .. } | LlmError::Credential { .. }
    )
}
