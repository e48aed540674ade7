//! Offline evaluation of model tiers against curated question sets.
//!
//! Cases come from `golden.jsonl`, `adversarial.jsonl` and `ood.jsonl` in an
//! evaluation directory. Each selected tier is loaded directly, answers every
//! case with greedy decoding, and is scored lexically (exact match, token F1,
//! keyword coverage), for length and for refusal behavior. Aggregates are
//! checked against [`EvalThresholds`] and written as a report directory.

mod dataset;
mod metrics;
mod report;
mod runner;
mod summary;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::tier::ModelTier;

pub use dataset::{
    deterministic_sample, load_curated_sets, parse_jsonl, EvalCase, ExpectedBehavior, CURATED_SETS,
};
pub use metrics::{
    exact_match, extract_required_keywords, is_refusal_response, keyword_coverage, normalize_text,
    response_length_compliant, score_case, token_f1, tokenize, CaseScores, ScoringLimits,
    STOP_WORDS,
};
pub use report::{write_report, EvalReport};
pub use runner::{select_cases, Evaluator, TierEvaluation};
pub use summary::{
    failure_reasons, summarize, CaseResult, EvalThresholds, FailureReason, ModelSummary,
    SummaryMetrics, ThresholdCheck,
};

/// Seed used when none is given.
pub const DEFAULT_SEED: u64 = 42;

/// Evaluation errors.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not load the {tier} tier: {source}")]
    Load {
        tier: ModelTier,
        #[source]
        source: RuntimeError,
    },
}

/// How many cases to draw from each curated set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalSuite {
    /// A quick sample of every set.
    #[default]
    Smoke,
    /// Every case.
    Full,
}

impl EvalSuite {
    /// Per-set sample size. Zero means no limit.
    pub fn per_set_limit(self) -> usize {
        match self {
            EvalSuite::Smoke => 10,
            EvalSuite::Full => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvalSuite::Smoke => "smoke",
            EvalSuite::Full => "full",
        }
    }
}

impl fmt::Display for EvalSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvalSuite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smoke" => Ok(EvalSuite::Smoke),
            "full" => Ok(EvalSuite::Full),
            other => Err(format!("unknown suite '{}' (expected smoke or full)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_parsing() {
        assert_eq!("Smoke".parse::<EvalSuite>().unwrap(), EvalSuite::Smoke);
        assert_eq!("full".parse::<EvalSuite>().unwrap().per_set_limit(), 0);
        assert!("nightly".parse::<EvalSuite>().is_err());
        assert_eq!(EvalSuite::default().to_string(), "smoke");
    }

    #[test]
    fn test_load_error_names_tier() {
        let error = EvalError::Load {
            tier: ModelTier::Large,
            source: RuntimeError::new("Out of memory"),
        };
        assert_eq!(error.to_string(), "could not load the large tier: Out of memory");
    }
}
