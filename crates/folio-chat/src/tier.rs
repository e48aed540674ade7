//! Model tiers and the catalog mapping each tier to a concrete model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A model configuration, ordered from most compatible to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

/// Error returned when a tier name cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown model tier '{0}' (expected small, medium or large)")]
pub struct ParseTierError(String);

impl ModelTier {
    /// All tiers, smallest first.
    pub const ALL: [ModelTier; 3] = [ModelTier::Small, ModelTier::Medium, ModelTier::Large];

    pub fn smallest() -> Self {
        ModelTier::Small
    }

    pub fn largest() -> Self {
        ModelTier::Large
    }

    pub fn is_largest(self) -> bool {
        self == Self::largest()
    }

    /// The tier to fall back to after this one, if any.
    pub fn next_smaller(self) -> Option<Self> {
        match self {
            ModelTier::Large => Some(ModelTier::Medium),
            ModelTier::Medium => Some(ModelTier::Small),
            ModelTier::Small => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::Large => "large",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(ModelTier::Small),
            "medium" => Ok(ModelTier::Medium),
            "large" => Ok(ModelTier::Large),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

/// What to request from the runtime for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Model repository id passed to the runtime.
    pub model_id: String,
    /// Numeric precision requested from the runtime.
    pub dtype: String,
    /// Approximate memory footprint in GB. Informational only.
    pub memory_gb: f64,
    /// Minimum logical cores before the device heuristic picks this tier.
    pub min_cores: usize,
    /// Human-readable description.
    pub description: String,
}

impl TierSpec {
    fn new(model_id: &str, dtype: &str, memory_gb: f64, min_cores: usize, description: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            dtype: dtype.to_string(),
            memory_gb,
            min_cores,
            description: description.to_string(),
        }
    }
}

/// Tier-to-model mapping used by the loader and the device heuristic.
#[derive(Debug, Clone, PartialEq)]
pub struct TierCatalog {
    small: TierSpec,
    medium: TierSpec,
    large: TierSpec,
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self {
            small: TierSpec::new(
                "HuggingFaceTB/SmolLM2-135M-Instruct",
                "q4",
                0.5,
                1,
                "SmolLM2 135M (fastest, runs almost anywhere)",
            ),
            medium: TierSpec::new(
                "HuggingFaceTB/SmolLM2-360M-Instruct",
                "q4",
                1.0,
                2,
                "SmolLM2 360M (balanced)",
            ),
            large: TierSpec::new(
                "HuggingFaceTB/SmolLM2-1.7B-Instruct",
                "q4f16",
                4.0,
                4,
                "SmolLM2 1.7B (best answers, needs a capable device)",
            ),
        }
    }
}

impl TierCatalog {
    pub fn spec(&self, tier: ModelTier) -> &TierSpec {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Medium => &self.medium,
            ModelTier::Large => &self.large,
        }
    }

    fn spec_mut(&mut self, tier: ModelTier) -> &mut TierSpec {
        match tier {
            ModelTier::Small => &mut self.small,
            ModelTier::Medium => &mut self.medium,
            ModelTier::Large => &mut self.large,
        }
    }

    /// Override the model id requested for a tier.
    pub fn with_model_id(mut self, tier: ModelTier, model_id: impl Into<String>) -> Self {
        self.spec_mut(tier).model_id = model_id.into();
        self
    }

    /// Override the dtype requested for a tier.
    pub fn with_dtype(mut self, tier: ModelTier, dtype: impl Into<String>) -> Self {
        self.spec_mut(tier).dtype = dtype.into();
        self
    }

    /// Iterate tiers with their specs, smallest first.
    pub fn iter(&self) -> impl Iterator<Item = (ModelTier, &TierSpec)> {
        ModelTier::ALL.into_iter().map(move |tier| (tier, self.spec(tier)))
    }
}
