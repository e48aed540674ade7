//! Evaluation reports on disk.
//!
//! Each run gets its own timestamped directory holding `metrics.json`,
//! `failures.jsonl` and a human-readable `summary.md`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::runner::TierEvaluation;
use super::summary::{CaseResult, ModelSummary};
use super::EvalError;
use crate::tier::ModelTier;

/// Contents of `metrics.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub suite: String,
    pub generated_at: String,
    pub seed: u64,
    pub overall_threshold_passed: bool,
    pub case_counts: BTreeMap<String, usize>,
    pub total_cases: usize,
    /// Keyed by tier name.
    pub models: BTreeMap<String, ModelSummary>,
    /// Metric deltas against `compare_to`, keyed by tier name.
    #[serde(default)]
    pub comparison: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub compare_to: Option<String>,
}

impl EvalReport {
    pub fn new(
        suite: impl Into<String>,
        seed: u64,
        case_counts: BTreeMap<String, usize>,
        evaluations: &[TierEvaluation],
    ) -> Self {
        let models: BTreeMap<String, ModelSummary> = evaluations
            .iter()
            .map(|evaluation| (evaluation.summary.tier.to_string(), evaluation.summary.clone()))
            .collect();

        Self {
            suite: suite.into(),
            generated_at: Utc::now().to_rfc3339(),
            seed,
            overall_threshold_passed: models.values().all(|summary| summary.threshold_passed),
            total_cases: case_counts.values().sum(),
            case_counts,
            models,
            comparison: BTreeMap::new(),
            compare_to: None,
        }
    }

    /// Fill `comparison` with current minus baseline for every shared metric.
    pub fn compare_with(&mut self, baseline_dir: &Path) -> Result<(), EvalError> {
        let Some(baseline) = load_baseline(baseline_dir)? else {
            return Ok(());
        };

        for (tier, summary) in &self.models {
            let Some(previous) = baseline.get(tier) else {
                continue;
            };
            let deltas: BTreeMap<String, f64> = summary
                .metrics
                .named()
                .into_iter()
                .filter_map(|(name, current)| {
                    previous
                        .get(name)
                        .and_then(Value::as_f64)
                        .map(|before| (name.to_string(), current - before))
                })
                .collect();
            if !deltas.is_empty() {
                self.comparison.insert(tier.clone(), deltas);
            }
        }

        self.compare_to = Some(baseline_dir.display().to_string());
        Ok(())
    }

    /// Markdown overview of the run.
    pub fn to_markdown(&self, report_dir: &Path) -> String {
        let status = |passed: bool| if passed { "PASS" } else { "FAIL" };
        let mut md = String::new();

        let _ = writeln!(md, "# Evaluation Summary\n");
        let _ = writeln!(md, "- Suite: `{}`", self.suite);
        let _ = writeln!(md, "- Generated at: `{}`", self.generated_at);
        let _ = writeln!(md, "- Seed: `{}`", self.seed);
        let _ = writeln!(md, "- Report directory: `{}`", report_dir.display());
        let _ = writeln!(
            md,
            "- Overall threshold status: `{}`\n",
            status(self.overall_threshold_passed)
        );

        let _ = writeln!(md, "## Case Coverage\n");
        for (dataset, count) in &self.case_counts {
            let _ = writeln!(md, "- `{}`: {} cases", dataset, count);
        }

        let _ = writeln!(md, "\n## Model Metrics\n");
        let _ = writeln!(
            md,
            "| tier | model | cases | exact | token_f1 | keyword | refusal | behavior | p95 ms | tok/s | failures | thresholds |"
        );
        let _ = writeln!(md, "|---|---|---:|---:|---:|---:|---:|---:|---:|---:|---:|---|");
        for (tier, summary) in &self.models {
            let m = &summary.metrics;
            let _ = writeln!(
                md,
                "| {} | `{}` | {} | {:.3} | {:.3} | {:.3} | {:.3} | {:.3} | {:.1} | {:.2} | {} | {} |",
                tier,
                summary.model_id,
                summary.total_cases,
                m.exact_match_rate,
                m.token_f1,
                m.keyword_coverage,
                m.refusal_accuracy,
                m.behavior_accuracy,
                m.p95_latency_ms,
                m.tokens_per_second,
                summary.failure_count,
                status(summary.threshold_passed)
            );
        }

        let _ = writeln!(md, "\n## Threshold Checks");
        for (tier, summary) in &self.models {
            let _ = writeln!(md, "\n### {}\n", tier);
            for check in &summary.threshold_checks {
                let _ = writeln!(
                    md,
                    "- {}: `{}` {} `{:.3}` (actual `{:.3}`)",
                    status(check.passed),
                    check.metric,
                    check.comparator,
                    check.expected,
                    check.actual
                );
            }
        }

        if !self.comparison.is_empty() {
            let _ = writeln!(md, "\n## Comparison\n");
            if let Some(compare_to) = &self.compare_to {
                let _ = writeln!(md, "- Compared to: `{}`", compare_to);
            }
            for (tier, deltas) in &self.comparison {
                let _ = writeln!(md, "\n### {} deltas\n", tier);
                for (metric, delta) in deltas {
                    let _ = writeln!(md, "- `{}`: `{:+.4}`", metric, delta);
                }
            }
        }

        md
    }
}

/// A failing case as written to `failures.jsonl`.
#[derive(Serialize)]
struct FailureRow<'a> {
    tier: ModelTier,
    model_id: &'a str,
    #[serde(flatten)]
    result: &'a CaseResult,
}

/// Write the report into a new timestamped directory under `base_dir`.
pub fn write_report(
    base_dir: &Path,
    report: &EvalReport,
    evaluations: &[TierEvaluation],
) -> Result<PathBuf, EvalError> {
    let report_dir = base_dir.join(Utc::now().format("%Y-%m-%dT%H%M%SZ").to_string());
    std::fs::create_dir_all(&report_dir)?;

    std::fs::write(
        report_dir.join("metrics.json"),
        serde_json::to_string_pretty(report)?,
    )?;

    let mut failures = std::fs::File::create(report_dir.join("failures.jsonl"))?;
    for evaluation in evaluations {
        for result in evaluation.results.iter().filter(|result| !result.passed()) {
            let row = FailureRow {
                tier: evaluation.summary.tier,
                model_id: &evaluation.summary.model_id,
                result,
            };
            writeln!(failures, "{}", serde_json::to_string(&row)?)?;
        }
    }

    std::fs::write(report_dir.join("summary.md"), report.to_markdown(&report_dir))?;
    info!("Evaluation report written to {}", report_dir.display());
    Ok(report_dir)
}

/// Per-tier metrics of an earlier report, or `None` when it is missing or
/// unreadable.
fn load_baseline(
    dir: &Path,
) -> Result<Option<BTreeMap<String, serde_json::Map<String, Value>>>, EvalError> {
    let path = dir.join("metrics.json");
    if !path.exists() {
        warn!("No baseline metrics at {}", path.display());
        return Ok(None);
    }

    let payload: Value = match serde_json::from_str(&std::fs::read_to_string(&path)?) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Could not parse baseline metrics at {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let models = payload
        .get("models")
        .and_then(Value::as_object)
        .map(|models| {
            models
                .iter()
                .filter_map(|(tier, model)| {
                    let metrics = model.get("metrics")?.as_object()?;
                    Some((tier.clone(), metrics.clone()))
                })
                .collect()
        });
    Ok(models)
}
