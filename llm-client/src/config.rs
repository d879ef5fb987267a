//! Layered configuration resolution
//!
//! Precedence, lowest first: system defaults, configuration files (models
//! document, then the properties file), process environment, per-call
//! parameters. Merging is per key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::catalog::ModelsConfig;
use crate::error::{LlmError, Result};
use crate::params::{EffectiveConfig, GenerationParams};

pub const MODELS_CONFIG_JSON: &str = "models_config.json";
pub const MODELS_CONFIG_TOML: &str = "models_config.toml";
pub const PROPERTIES_FILE: &str = "application.properties";

/// Prefix shared by every env/properties key the resolver reads
pub const KEY_PREFIX: &str = "LLM_";

pub const DEFAULT_PROVIDER: &str = "mock";
pub const DEFAULT_MODEL: &str = "mock-model";
pub const DEFAULT_HISTORY_SIZE: usize = 50;

const SYSTEM_TEMPERATURE: f32 = 0.7;
const SYSTEM_MAX_TOKENS: u32 = 1024;

// Keys below are settings, not generation parameters
const SETTING_KEYS: [&str; 4] = [
    "default_provider",
    "default_model",
    "history_size",
    "fallback_to_mock",
];

/// Snapshot of a flat textual source: the environment or a properties file
#[derive(Clone, Default, PartialEq)]
pub struct SourceMap {
    values: BTreeMap<String, String>,
}

// Values may hold credentials, so only keys are printed
impl std::fmt::Debug for SourceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl SourceMap {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Capture the process environment once
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Parse `key=value` / `key: value` lines; `#` and `!` start comments
    pub fn parse_properties(content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let split = line.find(['=', ':']);
            if let Some(idx) = split {
                let key = line[..idx].trim();
                let value = line[idx + 1..].trim();
                if !key.is_empty() {
                    values.insert(key.to_string(), value.to_string());
                }
            }
        }
        Self { values }
    }

    pub fn load_properties(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse_properties(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Entries under [`KEY_PREFIX`], keyed by their lowercased suffix
    fn prefixed(&self) -> impl Iterator<Item = (String, &str)> {
        self.values.iter().filter_map(|(key, value)| {
            key.strip_prefix(KEY_PREFIX)
                .map(|suffix| (suffix.to_lowercase(), value.as_str()))
        })
    }
}

/// Client construction settings resolved with the same precedence rules
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub default_provider: String,
    pub default_model: String,
    pub history_size: usize,
    /// Build clients on the mock provider when the requested one cannot be
    /// resolved or its credentials do not validate
    pub fallback_to_mock: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_provider: DEFAULT_PROVIDER.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            history_size: DEFAULT_HISTORY_SIZE,
            fallback_to_mock: false,
        }
    }
}

/// Resolves effective parameters from static sources plus per-call values.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    catalog: ModelsConfig,
    properties: SourceMap,
    environment: SourceMap,
    // system < file < env, pre-merged
    base_params: GenerationParams,
    settings: ClientSettings,
}

impl ConfigResolver {
    pub fn new(catalog: ModelsConfig, properties: SourceMap, environment: SourceMap) -> Result<Self> {
        let file_params = catalog
            .defaults
            .params
            .overlay(&params_from(&properties, "properties")?);
        let env_params = params_from(&environment, "environment")?;
        let base_params = Self::system_defaults()
            .overlay(&file_params)
            .overlay(&env_params);

        let settings = resolve_settings(&catalog, &properties, &environment)?;

        Ok(Self {
            catalog,
            properties,
            environment,
            base_params,
            settings,
        })
    }

    /// Load files from `config_dir` and capture the process environment.
    ///
    /// Missing files are not an error; their layer is simply empty.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let json_path = config_dir.join(MODELS_CONFIG_JSON);
        let toml_path = config_dir.join(MODELS_CONFIG_TOML);
        let catalog = if json_path.exists() {
            ModelsConfig::load(&json_path)?
        } else if toml_path.exists() {
            ModelsConfig::load(&toml_path)?
        } else {
            log::warn!("Models config not found in {}", config_dir.display());
            ModelsConfig::default()
        };

        let properties_path = config_dir.join(PROPERTIES_FILE);
        let properties = if properties_path.exists() {
            log::info!("Loaded properties from {}", properties_path.display());
            SourceMap::load_properties(&properties_path)?
        } else {
            log::warn!("Properties file not found: {}", properties_path.display());
            SourceMap::default()
        };

        Self::new(catalog, properties, SourceMap::from_env())
    }

    /// `$LLM_CONFIG_DIR`, else `~/.config/llm-client`
    pub fn default_config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("LLM_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let home =
            std::env::var("HOME").map_err(|_| LlmError::ConfigError("HOME not set".into()))?;
        Ok(PathBuf::from(home).join(".config/llm-client"))
    }

    pub fn system_defaults() -> GenerationParams {
        GenerationParams::new()
            .with_temperature(SYSTEM_TEMPERATURE)
            .with_max_tokens(SYSTEM_MAX_TOKENS)
    }

    /// Effective parameters for one request. `call` holds everything
    /// supplied at call time and wins over every static source.
    pub fn resolve(&self, call: &GenerationParams) -> EffectiveConfig {
        EffectiveConfig::new(self.base_params.overlay(call))
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &ModelsConfig {
        &self.catalog
    }

    /// Raw lookup for credential material: environment, then properties
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.environment
            .get(key)
            .or_else(|| self.properties.get(key))
            .filter(|value| !value.is_empty())
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self {
            catalog: ModelsConfig::default(),
            properties: SourceMap::default(),
            environment: SourceMap::default(),
            base_params: Self::system_defaults(),
            settings: ClientSettings::default(),
        }
    }
}

fn params_from(source: &SourceMap, label: &str) -> Result<GenerationParams> {
    let mut params = GenerationParams::new();
    for (key, value) in source.prefixed() {
        if SETTING_KEYS.contains(&key.as_str()) {
            continue;
        }
        if !params.set_from_str(&key, value)? {
            log::debug!("Ignoring unknown {} key {}{}", label, KEY_PREFIX, key.to_uppercase());
        }
    }
    Ok(params)
}

fn resolve_settings(
    catalog: &ModelsConfig,
    properties: &SourceMap,
    environment: &SourceMap,
) -> Result<ClientSettings> {
    let defaults = ClientSettings::default();
    // env over properties for one key
    let text = |key: &str| {
        let key = format!("{}{}", KEY_PREFIX, key.to_uppercase());
        environment
            .get(&key)
            .or_else(|| properties.get(&key))
            .map(str::to_string)
    };

    let default_provider = text("default_provider")
        .or_else(|| catalog.defaults.provider.clone())
        .unwrap_or(defaults.default_provider)
        .to_lowercase();
    let default_model = text("default_model")
        .or_else(|| catalog.defaults.model.clone())
        .unwrap_or(defaults.default_model);

    let history_size = match text("history_size") {
        Some(raw) => raw.trim().parse().map_err(|_| {
            LlmError::ConfigError(format!("Invalid value for history_size: '{}'", raw))
        })?,
        None => catalog.defaults.history_size.unwrap_or(defaults.history_size),
    };

    let fallback_to_mock = match text("fallback_to_mock") {
        Some(raw) => parse_bool(&raw).ok_or_else(|| {
            LlmError::ConfigError(format!("Invalid value for fallback_to_mock: '{}'", raw))
        })?,
        None => catalog.fallback_to_mock.unwrap_or(defaults.fallback_to_mock),
    };

    Ok(ClientSettings {
        default_provider,
        default_model,
        history_size,
        fallback_to_mock,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_params(params: GenerationParams) -> ModelsConfig {
        let mut catalog = ModelsConfig::default();
        catalog.defaults.params = params;
        catalog
    }

    #[test]
    fn test_file_value_survives_when_not_overridden() {
        let catalog = catalog_with_params(GenerationParams::new().with_top_p(0.8));
        let resolver =
            ConfigResolver::new(catalog, SourceMap::default(), SourceMap::default()).unwrap();

        let effective = resolver.resolve(&GenerationParams::new());
        assert_eq!(effective.params().top_p, Some(0.8));
    }

    #[test]
    fn test_call_overrides_file_value() {
        let catalog = catalog_with_params(GenerationParams::new().with_top_p(0.8));
        let resolver =
            ConfigResolver::new(catalog, SourceMap::default(), SourceMap::default()).unwrap();

        let effective = resolver.resolve(&GenerationParams::new().with_top_p(0.1));
        assert_eq!(effective.params().top_p, Some(0.1));
    }

    #[test]
    fn test_precedence_is_per_key() {
        let catalog = catalog_with_params(
            GenerationParams::new()
                .with_temperature(0.1)
                .with_max_tokens(100)
                .with_top_k(5),
        );
        let properties = SourceMap::parse_properties("LLM_MAX_TOKENS = 200\nLLM_TOP_P: 0.5\n");
        let environment = SourceMap::from_pairs([("LLM_MAX_TOKENS", "300"), ("LLM_TOP_K", "7")]);
        let resolver = ConfigResolver::new(catalog, properties, environment).unwrap();

        let effective = resolver.resolve(&GenerationParams::new().with_top_k(9));
        let params = effective.params();
        assert_eq!(params.temperature, Some(0.1)); // file over system
        assert_eq!(params.max_tokens, Some(300)); // env over properties over document
        assert_eq!(params.top_p, Some(0.5)); // properties only
        assert_eq!(params.top_k, Some(9)); // call over env
        assert_eq!(params.presence_penalty, None); // undefined everywhere
        assert!(effective.get("presence_penalty").is_none());
    }

    #[test]
    fn test_system_defaults_apply_without_sources() {
        let resolver = ConfigResolver::default();
        let effective = resolver.resolve(&GenerationParams::new());
        assert_eq!(effective.params().temperature, Some(0.7));
        assert_eq!(effective.params().max_tokens, Some(1024));
        assert_eq!(effective.to_map().len(), 2);
    }

    #[test]
    fn test_malformed_env_value_is_rejected() {
        let environment = SourceMap::from_pairs([("LLM_TEMPERATURE", "warm")]);
        let result = ConfigResolver::new(ModelsConfig::default(), SourceMap::default(), environment);
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let environment = SourceMap::from_pairs([("LLM_SEED", "42"), ("PATH", "/bin")]);
        let resolver =
            ConfigResolver::new(ModelsConfig::default(), SourceMap::default(), environment)
                .unwrap();
        assert_eq!(resolver.resolve(&GenerationParams::new()).to_map().len(), 2);
    }

    #[test]
    fn test_settings_precedence() {
        let mut catalog = ModelsConfig::default();
        catalog.defaults.provider = Some("anthropic".into());
        catalog.defaults.model = Some("claude-3-haiku-20240307".into());
        catalog.fallback_to_mock = Some(false);

        let properties = SourceMap::parse_properties("LLM_FALLBACK_TO_MOCK=yes\nLLM_HISTORY_SIZE=5");
        let environment = SourceMap::from_pairs([("LLM_DEFAULT_PROVIDER", "Together")]);
        let resolver = ConfigResolver::new(catalog, properties, environment).unwrap();

        let settings = resolver.settings();
        assert_eq!(settings.default_provider, "together");
        assert_eq!(settings.default_model, "claude-3-haiku-20240307");
        assert_eq!(settings.history_size, 5);
        assert!(settings.fallback_to_mock);
    }

    #[test]
    fn test_invalid_fallback_flag() {
        let environment = SourceMap::from_pairs([("LLM_FALLBACK_TO_MOCK", "maybe")]);
        assert!(
            ConfigResolver::new(ModelsConfig::default(), SourceMap::default(), environment)
                .is_err()
        );
    }

    #[test]
    fn test_lookup_prefers_environment() {
        let properties = SourceMap::parse_properties(
            "# keys\n! legacy comment\nANTHROPIC_API_KEY=from-file\nGROK_API_KEY=grok-file",
        );
        let environment = SourceMap::from_pairs([("ANTHROPIC_API_KEY", "from-env")]);
        let resolver =
            ConfigResolver::new(ModelsConfig::default(), properties, environment).unwrap();

        assert_eq!(resolver.lookup("ANTHROPIC_API_KEY"), Some("from-env"));
        assert_eq!(resolver.lookup("GROK_API_KEY"), Some("grok-file"));
        assert_eq!(resolver.lookup("OPENAI_API_KEY"), None);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MODELS_CONFIG_JSON),
            r#"{"defaults": {"params": {"temperature": 0.25}}, "fallback_to_mock": true}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(PROPERTIES_FILE), "LLM_TOP_K=3\n").unwrap();

        let resolver = ConfigResolver::load(dir.path()).unwrap();
        let params = resolver.resolve(&GenerationParams::new());
        assert!(resolver.settings().fallback_to_mock);
        assert_eq!(params.params().top_k, Some(3));
    }

    #[test]
    fn test_load_from_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ConfigResolver::load(dir.path()).unwrap();
        assert_eq!(resolver.settings().default_provider, DEFAULT_PROVIDER);
    }
}
