//! Static provider and model descriptors
//!
//! Loaded once from the models document (`models_config.json` or
//! `models_config.toml`) and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::params::GenerationParams;
use crate::response::TokenUsage;

/// Descriptor of one backend provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Filled from the map key when loaded
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub requires_api_key: bool,

    /// Environment variable holding the API key (default `<NAME>_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "api_key_var")]
    pub api_key_env: Option<String>,

    /// Model names offered, in display order
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "api_base")]
    pub base_url: Option<String>,

    /// Free-form provider options (region, project, ...)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| default_api_key_env(&self.name))
    }
}

/// `anthropic` -> `ANTHROPIC_API_KEY`, `claude-cli` -> `CLAUDE_CLI_API_KEY`
pub fn default_api_key_env(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Descriptor of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default)]
    pub provider: String,

    /// Filled from the map key when loaded
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "max_tokens")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "cost_per_1m_input")]
    pub cost_per_million_input_tokens: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "cost_per_1m_output")]
    pub cost_per_million_output_tokens: Option<f64>,

    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelDescriptor {
    pub fn named(provider: &str, name: &str) -> Self {
        Self {
            provider: provider.to_string(),
            name: name.to_string(),
            context_window: None,
            max_output_tokens: None,
            cost_per_million_input_tokens: None,
            cost_per_million_output_tokens: None,
            capabilities: Vec::new(),
        }
    }

    /// Estimated cost in USD, when pricing is known
    pub fn estimate_cost(&self, usage: &TokenUsage) -> Option<f64> {
        let input = self.cost_per_million_input_tokens?;
        let output = self.cost_per_million_output_tokens?;
        Some(
            (usage.input_tokens as f64 * input + usage.output_tokens as f64 * output)
                / 1_000_000.0,
        )
    }
}

/// Compact built-in model entry shipped with an adapter
#[derive(Debug, Clone, Copy)]
pub struct BuiltinModel {
    pub name: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub cost_in: f64,
    pub cost_out: f64,
}

impl BuiltinModel {
    pub const fn new(
        name: &'static str,
        context_window: u32,
        max_output_tokens: u32,
        cost_in: f64,
        cost_out: f64,
    ) -> Self {
        Self {
            name,
            context_window,
            max_output_tokens,
            cost_in,
            cost_out,
        }
    }

    pub fn describe(&self, provider: &str) -> ModelDescriptor {
        ModelDescriptor {
            provider: provider.to_string(),
            name: self.name.to_string(),
            context_window: Some(self.context_window),
            max_output_tokens: Some(self.max_output_tokens),
            cost_per_million_input_tokens: Some(self.cost_in),
            cost_per_million_output_tokens: Some(self.cost_out),
            capabilities: vec!["chat".to_string(), "stream".to_string()],
        }
    }
}

/// `defaults` section of the models document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_size: Option<usize>,

    #[serde(default, skip_serializing_if = "GenerationParams::is_empty")]
    pub params: GenerationParams,
}

/// The models document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub defaults: DefaultsSection,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderDescriptor>,

    #[serde(default)]
    pub models: BTreeMap<String, ModelDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to_mock: Option<bool>,
}

impl ModelsConfig {
    /// Load from a `.json` or `.toml` file, chosen by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ModelsConfig = serde_json::from_str(content)?;
        Ok(config.normalized())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ModelsConfig = toml::from_str(content)?;
        Ok(config.normalized())
    }

    /// Lowercase provider keys and fill descriptor names from their keys
    fn normalized(self) -> Self {
        let providers = self
            .providers
            .into_iter()
            .map(|(key, mut descriptor)| {
                let key = key.to_lowercase();
                descriptor.name = key.clone();
                (key, descriptor)
            })
            .collect();

        let models = self
            .models
            .into_iter()
            .map(|(key, mut descriptor)| {
                descriptor.name = key.clone();
                descriptor.provider = descriptor.provider.to_lowercase();
                (key, descriptor)
            })
            .collect();

        Self {
            providers,
            models,
            ..self
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(&name.to_lowercase())
    }

    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    /// Every model configured for `provider`.
    ///
    /// Names listed on the provider descriptor come first, in their listed
    /// order; models only present in the `models` section follow.
    pub fn models_for(&self, provider: &str) -> Vec<ModelDescriptor> {
        let provider = provider.to_lowercase();
        let mut result: Vec<ModelDescriptor> = Vec::new();

        if let Some(descriptor) = self.providers.get(&provider) {
            for name in &descriptor.models {
                let model = self
                    .models
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| ModelDescriptor::named(&provider, name));
                result.push(ModelDescriptor {
                    provider: provider.clone(),
                    ..model
                });
            }
        }

        for model in self.models.values() {
            if model.provider == provider && !result.iter().any(|m| m.name == model.name) {
                result.push(model.clone());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "defaults": {"provider": "anthropic", "model": "claude-3-haiku-20240307",
                     "params": {"temperature": 0.4, "maxTokens": 256}},
        "fallback_to_mock": true,
        "providers": {
            "Anthropic": {"api_key_env": "MY_CLAUDE_KEY",
                          "models": ["claude-3-haiku-20240307", "claude-3-opus-20240229"]},
            "mock": {"requires_api_key": false}
        },
        "models": {
            "claude-3-haiku-20240307": {"provider": "anthropic", "context_window": 200000,
                                         "cost_per_1m_input": 0.25, "cost_per_1m_output": 1.25},
            "claude-extra": {"provider": "anthropic"}
        }
    }"#;

    #[test]
    fn test_parse_models_document() {
        let config = ModelsConfig::from_json(DOC).unwrap();
        assert_eq!(config.defaults.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.defaults.params.max_tokens, Some(256));
        assert_eq!(config.fallback_to_mock, Some(true));

        let anthropic = config.provider("ANTHROPIC").unwrap();
        assert_eq!(anthropic.name, "anthropic");
        assert_eq!(anthropic.api_key_env(), "MY_CLAUDE_KEY");
        assert!(anthropic.enabled);

        let mock = config.provider("mock").unwrap();
        assert!(!mock.requires_api_key);
        assert_eq!(mock.api_key_env(), "MOCK_API_KEY");
    }

    #[test]
    fn test_models_for_keeps_listed_order() {
        let config = ModelsConfig::from_json(DOC).unwrap();
        let names: Vec<_> = config
            .models_for("anthropic")
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "claude-3-haiku-20240307",
                "claude-3-opus-20240229",
                "claude-extra"
            ]
        );
        assert!(config.models_for("google").is_empty());
    }

    #[test]
    fn test_estimate_cost() {
        let config = ModelsConfig::from_json(DOC).unwrap();
        let haiku = config.model("claude-3-haiku-20240307").unwrap();
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 2_000_000,
        };
        assert_eq!(haiku.estimate_cost(&usage), Some(2.75));
        assert_eq!(
            config.model("claude-extra").unwrap().estimate_cost(&usage),
            None
        );
    }

    #[test]
    fn test_load_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models_config.toml");
        std::fs::write(
            &path,
            r#"
fallback_to_mock = false

[defaults]
provider = "mock"
model = "mock-model"

[providers.mock]
requires_api_key = false
models = ["mock-model"]
"#,
        )
        .unwrap();

        let config = ModelsConfig::load(&path).unwrap();
        assert_eq!(config.defaults.model.as_deref(), Some("mock-model"));
        assert_eq!(config.models_for("mock")[0].name, "mock-model");
    }

    #[test]
    fn test_default_api_key_env() {
        assert_eq!(default_api_key_env("claude-cli"), "CLAUDE_CLI_API_KEY");
        assert_eq!(default_api_key_env("together"), "TOGETHER_API_KEY");
    }
}
