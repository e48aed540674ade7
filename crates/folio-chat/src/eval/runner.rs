//! Runs evaluation cases against one model tier at a time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::dataset::{deterministic_sample, EvalCase};
use super::metrics::{score_case, ScoringLimits};
use super::summary::{failure_reasons, summarize, CaseResult, EvalThresholds, ModelSummary};
use super::EvalError;
use crate::config::ChatConfig;
use crate::prompt::build_messages;
use crate::runtime::{GenerationParams, LoadOptions, ModelRuntime};
use crate::tier::{ModelTier, TierCatalog};

/// The outcome of one tier over all cases.
#[derive(Debug, Clone)]
pub struct TierEvaluation {
    pub summary: ModelSummary,
    pub results: Vec<CaseResult>,
}

/// Sample each set with its own seed (`seed + position`), in name order.
///
/// Returns the selected cases and how many came from each set.
pub fn select_cases(
    sets: &BTreeMap<String, Vec<EvalCase>>,
    per_set_limit: usize,
    seed: u64,
) -> (Vec<EvalCase>, BTreeMap<String, usize>) {
    let mut selected = Vec::new();
    let mut counts = BTreeMap::new();

    for (offset, (name, cases)) in sets.iter().enumerate() {
        let sampled = deterministic_sample(cases, per_set_limit, seed.wrapping_add(offset as u64));
        counts.insert(name.clone(), sampled.len());
        selected.extend(sampled);
    }

    (selected, counts)
}

/// Loads a tier directly, without fallback, and scores every case.
pub struct Evaluator {
    runtime: Arc<dyn ModelRuntime>,
    catalog: TierCatalog,
    device: String,
    system_prompt: String,
    params: GenerationParams,
    limits: ScoringLimits,
    thresholds: EvalThresholds,
}

impl Evaluator {
    /// Generation always decodes greedily so runs are comparable.
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: &ChatConfig) -> Self {
        let limits = ScoringLimits {
            max_sentences: config.persona.max_answer_sentences.max(1) as usize,
            ..ScoringLimits::default()
        };
        Self {
            runtime,
            catalog: config.catalog.clone(),
            device: config.device.clone(),
            system_prompt: config.persona.system_prompt(),
            params: GenerationParams {
                do_sample: false,
                ..config.generation.clone()
            },
            limits,
            thresholds: EvalThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: EvalThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_limits(mut self, limits: ScoringLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn thresholds(&self) -> &EvalThresholds {
        &self.thresholds
    }

    /// Evaluate `cases` on `tier`. `on_case` receives `(done, total)`.
    ///
    /// A failed load is an error. A failed generation scores as an empty
    /// response.
    pub async fn evaluate_tier(
        &self,
        tier: ModelTier,
        cases: &[EvalCase],
        mut on_case: impl FnMut(usize, usize),
    ) -> Result<TierEvaluation, EvalError> {
        let spec = self.catalog.spec(tier);
        let options = LoadOptions {
            dtype: spec.dtype.clone(),
            device: self.device.clone(),
        };
        info!("Evaluating {} tier ({}) on {} cases", tier, spec.model_id, cases.len());

        let mut handle = self
            .runtime
            .load(&spec.model_id, &options, &|progress| {
                debug!("Loading {}: {:.0}% {}", tier, progress.percent, progress.message)
            })
            .await
            .map_err(|source| EvalError::Load { tier, source })?;

        let mut results = Vec::with_capacity(cases.len());
        for (index, case) in cases.iter().enumerate() {
            let messages = build_messages(&self.system_prompt, &case.question);
            let mut fragments = 0usize;
            let mut count = |_: &str| fragments += 1;

            let started = Instant::now();
            let generated = handle.generate(&messages, &self.params, &mut count).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let response = match generated {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!("Generation failed for {}: {}", case.key(), e);
                    String::new()
                }
            };

            let metrics = score_case(case, &response, &self.limits);
            let failure_reasons = failure_reasons(case, &response, &metrics, &self.thresholds);
            results.push(CaseResult {
                case: case.clone(),
                response,
                latency_ms,
                generated_tokens: fragments,
                metrics,
                failure_reasons,
            });
            on_case(index + 1, cases.len());
        }

        let summary = summarize(tier, &spec.model_id, &results, &self.thresholds);
        Ok(TierEvaluation { summary, results })
    }
}
