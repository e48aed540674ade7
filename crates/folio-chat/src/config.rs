//! Chat configuration.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::device::DeviceHints;
use crate::loader::FallbackPolicy;
use crate::paths::default_data_dir;
use crate::prompt::PersonaProfile;
use crate::runtime::GenerationParams;
use crate::tier::{ModelTier, TierCatalog};

/// Configuration for a chat session.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Tier to start with. `None` defers to the stored preference, then the
    /// device heuristic.
    pub tier: Option<ModelTier>,
    /// Which load failures fall back to a smaller tier
    pub fallback_policy: FallbackPolicy,
    /// Device string passed to the runtime (default: cpu)
    pub device: String,
    /// Memory hint in GB, overrides platform detection
    pub device_memory_gb: Option<f64>,
    /// Sampling parameters
    pub generation: GenerationParams,
    /// Abort generations that run longer than this
    pub generation_timeout: Option<Duration>,
    /// Who the assistant speaks for
    pub persona: PersonaProfile,
    /// Tier to model mapping
    pub catalog: TierCatalog,
    /// Where preferences are stored
    pub data_dir: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            tier: None,
            fallback_policy: FallbackPolicy::default(),
            device: "cpu".to_string(),
            device_memory_gb: None,
            generation: GenerationParams::default(),
            generation_timeout: None,
            persona: PersonaProfile::default(),
            catalog: TierCatalog::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl ChatConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Unparseable values are ignored
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(tier) = parsed(&lookup, "FOLIO_MODEL_TIER") {
            config.tier = Some(tier);
        }
        if let Some(policy) = parsed(&lookup, "FOLIO_FALLBACK_POLICY") {
            config.fallback_policy = policy;
        }
        if let Some(device) = lookup("FOLIO_DEVICE").filter(|d| !d.trim().is_empty()) {
            config.device = device.trim().to_string();
        }
        config.device_memory_gb = parsed(&lookup, "FOLIO_DEVICE_MEMORY_GB");

        if let Some(temperature) = parsed(&lookup, "FOLIO_TEMPERATURE") {
            config.generation.temperature = temperature;
        }
        if let Some(max_new_tokens) = parsed(&lookup, "FOLIO_MAX_NEW_TOKENS") {
            config.generation.max_new_tokens = max_new_tokens;
        }
        if let Some(top_k) = parsed(&lookup, "FOLIO_TOP_K") {
            config.generation.top_k = top_k;
        }
        if let Some(penalty) = parsed(&lookup, "FOLIO_REPETITION_PENALTY") {
            config.generation.repetition_penalty = penalty;
        }
        if let Some(do_sample) = lookup("FOLIO_DO_SAMPLE") {
            config.generation.do_sample = do_sample == "1" || do_sample.to_lowercase() == "true";
        }
        config.generation_timeout = parsed::<u64>(&lookup, "FOLIO_GENERATION_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        if let Some(name) = lookup("FOLIO_PERSONA_NAME") {
            config.persona.name = name.clone();
            config.persona.full_name = name;
        }
        if let Some(full_name) = lookup("FOLIO_PERSONA_FULL_NAME") {
            config.persona.full_name = full_name;
        }

        for (tier, key) in [
            (ModelTier::Small, "FOLIO_MODEL_SMALL"),
            (ModelTier::Medium, "FOLIO_MODEL_MEDIUM"),
            (ModelTier::Large, "FOLIO_MODEL_LARGE"),
        ] {
            if let Some(model_id) = lookup(key).filter(|id| !id.trim().is_empty()) {
                config.catalog = config.catalog.with_model_id(tier, model_id.trim());
            }
        }

        if let Some(dir) = lookup("FOLIO_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config
    }

    /// Hints for the device heuristic.
    pub fn device_hints(&self) -> DeviceHints {
        DeviceHints {
            memory_gb: self.device_memory_gb,
            ..DeviceHints::default()
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder::default()
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: '{}'", key, raw);
            None
        }
    }
}

/// Builder for chat configuration.
#[derive(Debug, Default)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn tier(mut self, tier: ModelTier) -> Self {
        self.config.tier = Some(tier);
        self
    }

    pub fn fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.config.fallback_policy = policy;
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = device.into();
        self
    }

    pub fn device_memory_gb(mut self, memory_gb: f64) -> Self {
        self.config.device_memory_gb = Some(memory_gb);
        self
    }

    pub fn generation(mut self, params: GenerationParams) -> Self {
        self.config.generation = params;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = Some(timeout);
        self
    }

    pub fn persona(mut self, persona: PersonaProfile) -> Self {
        self.config.persona = persona;
        self
    }

    pub fn catalog(mut self, catalog: TierCatalog) -> Self {
        self.config.catalog = catalog;
        self
    }

    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn build(self) -> ChatConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ChatConfig::from_lookup(|_| None);
        assert_eq!(config.tier, None);
        assert_eq!(config.fallback_policy, FallbackPolicy::DemoteTopTier);
        assert_eq!(config.device, "cpu");
        assert_eq!(config.generation, GenerationParams::default());
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    fn test_env_overrides() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("FOLIO_MODEL_TIER", "large"),
            ("FOLIO_FALLBACK_POLICY", "memory-only"),
            ("FOLIO_DEVICE_MEMORY_GB", "8"),
            ("FOLIO_MAX_NEW_TOKENS", "256"),
            ("FOLIO_DO_SAMPLE", "true"),
            ("FOLIO_GENERATION_TIMEOUT_SECS", "30"),
            ("FOLIO_PERSONA_NAME", "Sam"),
            ("FOLIO_PERSONA_FULL_NAME", "Sam Rivera"),
            ("FOLIO_MODEL_SMALL", "org/tiny-chat"),
            ("FOLIO_DATA_DIR", "/tmp/folio-test"),
        ]));

        assert_eq!(config.tier, Some(ModelTier::Large));
        assert_eq!(config.fallback_policy, FallbackPolicy::MemoryOnly);
        assert_eq!(config.device_memory_gb, Some(8.0));
        assert_eq!(config.generation.max_new_tokens, 256);
        assert!(config.generation.do_sample);
        assert_eq!(config.generation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.persona.name, "Sam");
        assert_eq!(config.persona.full_name, "Sam Rivera");
        assert_eq!(config.catalog.spec(ModelTier::Small).model_id, "org/tiny-chat");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/folio-test"));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("FOLIO_MODEL_TIER", "gigantic"),
            ("FOLIO_TOP_K", "many"),
            ("FOLIO_GENERATION_TIMEOUT_SECS", "0"),
        ]));
        assert_eq!(config.tier, None);
        assert_eq!(config.generation.top_k, GenerationParams::default().top_k);
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    fn test_builder() {
        let config = ChatConfig::builder()
            .tier(ModelTier::Small)
            .device("webgpu")
            .device_memory_gb(2.0)
            .build();
        assert_eq!(config.tier, Some(ModelTier::Small));
        assert_eq!(config.device, "webgpu");
        assert_eq!(config.device_hints().memory_gb, Some(2.0));
    }
}
