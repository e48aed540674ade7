//! Model loading with tier fallback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::protocol::WorkerEvent;
use crate::runtime::{GenerationHandle, LoadOptions, LoadProgress, ModelRuntime, RuntimeError};
use crate::tier::{ModelTier, TierCatalog};

/// Which load failures demote to the next smaller tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Memory failures demote on every tier, and the largest tier is demoted
    /// on any failure.
    #[default]
    DemoteTopTier,
    /// Only memory failures demote.
    MemoryOnly,
}

impl FallbackPolicy {
    /// Whether a failed load of `tier` should be retried one tier down.
    pub fn should_demote(self, tier: ModelTier, error: &RuntimeError) -> bool {
        if error.is_memory_pressure() {
            return true;
        }
        self == FallbackPolicy::DemoteTopTier && tier.is_largest()
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPolicy::DemoteTopTier => f.write_str("demote-top-tier"),
            FallbackPolicy::MemoryOnly => f.write_str("memory-only"),
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demote-top-tier" => Ok(FallbackPolicy::DemoteTopTier),
            "memory-only" => Ok(FallbackPolicy::MemoryOnly),
            other => Err(format!("unknown fallback policy '{}'", other)),
        }
    }
}

/// Result of a fallback load sequence.
pub enum LoadOutcome {
    Loaded {
        tier: ModelTier,
        handle: Box<dyn GenerationHandle>,
        attempts: usize,
    },
    Failed {
        /// The last tier attempted.
        tier: ModelTier,
        attempts: usize,
        error: RuntimeError,
    },
}

impl LoadOutcome {
    pub fn attempts(&self) -> usize {
        match self {
            LoadOutcome::Loaded { attempts, .. } | LoadOutcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn tier(&self) -> ModelTier {
        match self {
            LoadOutcome::Loaded { tier, .. } | LoadOutcome::Failed { tier, .. } => *tier,
        }
    }
}

impl fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded { tier, attempts, .. } => f
                .debug_struct("Loaded")
                .field("tier", tier)
                .field("attempts", attempts)
                .finish_non_exhaustive(),
            LoadOutcome::Failed {
                tier,
                attempts,
                error,
            } => f
                .debug_struct("Failed")
                .field("tier", tier)
                .field("attempts", attempts)
                .field("error", error)
                .finish(),
        }
    }
}

/// Loads a model, stepping down through smaller tiers on recoverable failures.
pub struct FallbackLoader {
    runtime: Arc<dyn ModelRuntime>,
    catalog: TierCatalog,
    policy: FallbackPolicy,
    device: String,
}

impl FallbackLoader {
    pub fn new(runtime: Arc<dyn ModelRuntime>, catalog: TierCatalog) -> Self {
        Self {
            runtime,
            catalog,
            policy: FallbackPolicy::default(),
            device: "cpu".to_string(),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Load `requested`, or the first smaller tier that loads.
    ///
    /// Emits `initiate` before each attempt, `load` for each progress report
    /// and `fallback-model` before moving down a tier. Each attempt uses a
    /// strictly smaller tier than the last, so this makes at most one attempt
    /// per tier.
    pub async fn load_with_fallback(
        &self,
        requested: ModelTier,
        emit: &(dyn Fn(WorkerEvent) + Send + Sync),
    ) -> LoadOutcome {
        let max_attempts = ModelTier::ALL.len();
        let mut current = requested;
        let mut attempts = 0;
        let mut last_error = RuntimeError::new("no load attempted");

        while attempts < max_attempts {
            attempts += 1;
            let spec = self.catalog.spec(current);
            info!(
                "Loading {} tier model '{}' ({}) attempt {}/{}",
                current, spec.model_id, spec.dtype, attempts, max_attempts
            );
            emit(WorkerEvent::Initiate {
                message: format!("Loading {} ({} tier, {})", spec.model_id, current, spec.dtype),
            });

            let options = LoadOptions {
                dtype: spec.dtype.clone(),
                device: self.device.clone(),
            };
            let progress = |update: LoadProgress| {
                emit(WorkerEvent::Load {
                    message: update.message,
                    progress: Some(update.percent),
                });
            };

            let error = match self.runtime.load(&spec.model_id, &options, &progress).await {
                Ok(handle) => {
                    info!("Loaded {} tier model '{}'", current, spec.model_id);
                    return LoadOutcome::Loaded {
                        tier: current,
                        handle,
                        attempts,
                    };
                }
                Err(error) => error,
            };

            warn!("Failed to load {} tier model: {}", current, error);

            if !self.policy.should_demote(current, &error) {
                debug!("Failure is not recoverable by falling back ({})", self.policy);
                return LoadOutcome::Failed {
                    tier: current,
                    attempts,
                    error,
                };
            }

            let Some(next) = current.next_smaller() else {
                debug!("No tier smaller than {} to fall back to", current);
                return LoadOutcome::Failed {
                    tier: current,
                    attempts,
                    error,
                };
            };

            emit(WorkerEvent::FallbackModel {
                fallback_model: next,
                message: format!("Could not load the {} model, trying {} instead", current, next),
            });
            current = next;
            last_error = error;
        }

        LoadOutcome::Failed {
            tier: current,
            attempts,
            error: last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRuntime;
    use std::sync::Mutex;

    async fn run(
        runtime: Arc<ScriptedRuntime>,
        policy: FallbackPolicy,
        requested: ModelTier,
    ) -> (LoadOutcome, Vec<WorkerEvent>) {
        let events = Mutex::new(Vec::new());
        let loader = FallbackLoader::new(runtime, TierCatalog::default()).with_policy(policy);
        let emit = |event: WorkerEvent| events.lock().unwrap().push(event);
        let outcome = loader.load_with_fallback(requested, &emit).await;
        (outcome, events.into_inner().unwrap())
    }

    fn fallbacks(events: &[WorkerEvent]) -> Vec<ModelTier> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::FallbackModel { fallback_model, .. } => Some(*fallback_model),
                _ => None,
            })
            .collect()
    }

    fn tiers_requested(runtime: &ScriptedRuntime) -> Vec<ModelTier> {
        let catalog = TierCatalog::default();
        runtime
            .requested_models()
            .iter()
            .map(|id| {
                catalog
                    .iter()
                    .find(|(_, spec)| &spec.model_id == id)
                    .map(|(tier, _)| tier)
                    .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_memory_failures_fall_back_to_small() {
        let runtime = Arc::new(ScriptedRuntime::with_load_results(vec![
            Err("Out of memory"),
            Err("failed allocation of 512MB"),
            Ok(()),
        ]));
        let (outcome, events) =
            run(runtime.clone(), FallbackPolicy::DemoteTopTier, ModelTier::Large).await;

        assert!(matches!(outcome, LoadOutcome::Loaded { tier: ModelTier::Small, attempts: 3, .. }));
        assert_eq!(fallbacks(&events), vec![ModelTier::Medium, ModelTier::Small]);
        assert_eq!(
            tiers_requested(&runtime),
            vec![ModelTier::Large, ModelTier::Medium, ModelTier::Small]
        );
    }

    #[tokio::test]
    async fn test_success_on_first_attempt_emits_no_fallback() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let (outcome, events) = run(runtime, FallbackPolicy::DemoteTopTier, ModelTier::Medium).await;

        assert!(matches!(outcome, LoadOutcome::Loaded { tier: ModelTier::Medium, attempts: 1, .. }));
        assert!(fallbacks(&events).is_empty());
        assert!(matches!(events.first(), Some(WorkerEvent::Initiate { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Load { progress: Some(_), .. })));
    }

    #[tokio::test]
    async fn test_network_error_below_top_tier_stops_immediately() {
        let runtime = Arc::new(ScriptedRuntime::with_load_results(vec![Err(
            "network error: failed to fetch",
        )]));
        let (outcome, events) =
            run(runtime.clone(), FallbackPolicy::DemoteTopTier, ModelTier::Medium).await;

        assert!(matches!(outcome, LoadOutcome::Failed { tier: ModelTier::Medium, attempts: 1, .. }));
        assert!(fallbacks(&events).is_empty());
        assert_eq!(runtime.requested_models().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_on_top_tier_demotes_once() {
        let runtime = Arc::new(ScriptedRuntime::with_load_results(vec![
            Err("network error: failed to fetch"),
            Err("network error: failed to fetch"),
        ]));
        let (outcome, events) =
            run(runtime.clone(), FallbackPolicy::DemoteTopTier, ModelTier::Large).await;

        assert!(matches!(outcome, LoadOutcome::Failed { tier: ModelTier::Medium, attempts: 2, .. }));
        assert_eq!(fallbacks(&events), vec![ModelTier::Medium]);
    }

    #[tokio::test]
    async fn test_memory_only_policy_does_not_demote_top_tier_on_network_error() {
        let runtime = Arc::new(ScriptedRuntime::with_load_results(vec![Err(
            "network error: failed to fetch",
        )]));
        let (outcome, events) =
            run(runtime.clone(), FallbackPolicy::MemoryOnly, ModelTier::Large).await;

        assert!(matches!(outcome, LoadOutcome::Failed { tier: ModelTier::Large, attempts: 1, .. }));
        assert!(fallbacks(&events).is_empty());
    }

    #[tokio::test]
    async fn test_every_tier_failing_terminates_within_tier_count() {
        for policy in [FallbackPolicy::DemoteTopTier, FallbackPolicy::MemoryOnly] {
            let runtime = Arc::new(ScriptedRuntime::with_load_results(vec![
                Err("out of memory"),
                Err("out of memory"),
                Err("out of memory"),
                Err("out of memory"),
            ]));
            let (outcome, events) = run(runtime.clone(), policy, ModelTier::Large).await;

            assert!(outcome.attempts() <= ModelTier::ALL.len());
            assert!(matches!(outcome, LoadOutcome::Failed { tier: ModelTier::Small, .. }));
            let requested = tiers_requested(&runtime);
            assert!(requested.windows(2).all(|w| w[1] < w[0]));
            assert_eq!(fallbacks(&events), vec![ModelTier::Medium, ModelTier::Small]);
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("memory-only".parse(), Ok(FallbackPolicy::MemoryOnly));
        assert_eq!("Demote-Top-Tier".parse(), Ok(FallbackPolicy::DemoteTopTier));
        assert!("sometimes".parse::<FallbackPolicy>().is_err());
    }
}
