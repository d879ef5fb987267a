//! Generation parameters and their resolved form

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LlmError, Result};

/// The closed set of generation parameters understood by every facade.
///
/// Every field is optional: `None` means "not set at this layer" and lets a
/// lower-precedence source supply the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "maxTokens")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "topP")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "topK")]
    pub top_k: Option<u32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "stopSequences"
    )]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "frequencyPenalty"
    )]
    pub frequency_penalty: Option<f32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "presencePenalty"
    )]
    pub presence_penalty: Option<f32>,
}

impl GenerationParams {
    /// Recognized parameter names, in canonical snake_case
    pub const KEYS: [&'static str; 7] = [
        "temperature",
        "max_tokens",
        "top_p",
        "top_k",
        "stop_sequences",
        "frequency_penalty",
        "presence_penalty",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences = Some(stops.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn with_presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Field-wise overlay: every key set in `higher` wins, the rest is kept.
    pub fn overlay(&self, higher: &GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: higher.temperature.or(self.temperature),
            max_tokens: higher.max_tokens.or(self.max_tokens),
            top_p: higher.top_p.or(self.top_p),
            top_k: higher.top_k.or(self.top_k),
            stop_sequences: higher
                .stop_sequences
                .clone()
                .or_else(|| self.stop_sequences.clone()),
            frequency_penalty: higher.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: higher.presence_penalty.or(self.presence_penalty),
        }
    }

    /// Set one parameter from its textual form (env var or properties file).
    ///
    /// Returns `Ok(false)` when `key` is not a recognized parameter.
    pub fn set_from_str(&mut self, key: &str, raw: &str) -> Result<bool> {
        let raw = raw.trim();
        match key {
            "temperature" => self.temperature = Some(parse(key, raw)?),
            "max_tokens" => self.max_tokens = Some(parse(key, raw)?),
            "top_p" => self.top_p = Some(parse(key, raw)?),
            "top_k" => self.top_k = Some(parse(key, raw)?),
            "stop_sequences" => {
                self.stop_sequences = Some(
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect(),
                )
            }
            "frequency_penalty" => self.frequency_penalty = Some(parse(key, raw)?),
            "presence_penalty" => self.presence_penalty = Some(parse(key, raw)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| LlmError::ConfigError(format!("Invalid value for {}: '{}'", key, raw)))
}

/// The parameter set that applies to one request after precedence
/// resolution. Provenance is gone; unset keys stay unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveConfig {
    params: GenerationParams,
}

impl EffectiveConfig {
    pub fn new(params: GenerationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Look a parameter up by name
    pub fn get(&self, key: &str) -> Option<Value> {
        self.to_map().remove(key)
    }

    /// Flat name -> value mapping of every defined parameter
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.params) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_is_field_wise() {
        let low = GenerationParams::new()
            .with_temperature(0.2)
            .with_max_tokens(100);
        let high = GenerationParams::new().with_max_tokens(500).with_top_k(40);

        let merged = low.overlay(&high);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.max_tokens, Some(500));
        assert_eq!(merged.top_k, Some(40));
        assert_eq!(merged.top_p, None);
    }

    #[test]
    fn test_set_from_str() {
        let mut params = GenerationParams::new();
        assert!(params.set_from_str("temperature", " 0.3 ").unwrap());
        assert!(params.set_from_str("stop_sequences", "END, STOP,").unwrap());
        assert!(!params.set_from_str("seed", "42").unwrap());
        assert!(params.set_from_str("max_tokens", "lots").is_err());

        assert_eq!(params.temperature, Some(0.3));
        assert_eq!(
            params.stop_sequences,
            Some(vec!["END".to_string(), "STOP".to_string()])
        );
    }

    #[test]
    fn test_camel_case_aliases_and_unknown_keys() {
        let params: GenerationParams =
            serde_json::from_str(r#"{"maxTokens": 64, "topP": 0.9}"#).unwrap();
        assert_eq!(params.max_tokens, Some(64));
        assert_eq!(params.top_p, Some(0.9));

        let rejected = serde_json::from_str::<GenerationParams>(r#"{"seed": 1}"#);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_effective_config_omits_unset_keys() {
        let config = EffectiveConfig::new(GenerationParams::new().with_max_tokens(10));
        let map = config.to_map();
        assert_eq!(map.len(), 1);
        assert_eq!(config.get("max_tokens"), Some(Value::from(10)));
        assert_eq!(config.get("temperature"), None);
    }
}
