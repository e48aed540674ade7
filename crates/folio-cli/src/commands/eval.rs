//! Eval command - score model tiers against the curated question sets.

use folio_chat::eval::{
    load_curated_sets, select_cases, write_report, EvalReport, EvalSuite, EvalThresholds,
    Evaluator, TierEvaluation,
};
use folio_chat::{paths, ChatConfig, ModelTier};
use folio_local_ai::LocalServerRuntime;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

/// Options for one evaluation run.
pub(crate) struct EvalOptions {
    pub tiers: Vec<ModelTier>,
    pub suite: EvalSuite,
    pub limit: Option<usize>,
    pub seed: u64,
    pub eval_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub thresholds: Option<PathBuf>,
    pub compare_to: Option<PathBuf>,
    pub fail_on_threshold: bool,
}

pub(crate) async fn run(options: EvalOptions) -> miette::Result<()> {
    let config = ChatConfig::from_env();
    let eval_dir = options
        .eval_dir
        .unwrap_or_else(|| paths::eval_sets_dir(&config.data_dir));
    let report_base = options
        .report_dir
        .unwrap_or_else(|| paths::eval_reports_dir(&config.data_dir));

    let thresholds = match &options.thresholds {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                miette::miette!("Failed to read thresholds {}: {}", path.display(), e)
            })?;
            serde_json::from_str::<EvalThresholds>(&content)
                .map_err(|e| miette::miette!("Invalid thresholds {}: {}", path.display(), e))?
        }
        None => EvalThresholds::default(),
    };

    let sets = load_curated_sets(&eval_dir).map_err(|e| miette::miette!("{}", e))?;
    let per_set_limit = options.limit.unwrap_or_else(|| options.suite.per_set_limit());
    let (cases, counts) = select_cases(&sets, per_set_limit, options.seed);
    if cases.is_empty() {
        return Err(miette::miette!(
            "No evaluation cases found. Add golden.jsonl, adversarial.jsonl or ood.jsonl to {}",
            eval_dir.display()
        ));
    }

    let tiers = if options.tiers.is_empty() {
        ModelTier::ALL.to_vec()
    } else {
        options.tiers
    };

    println!("Suite:  {}", options.suite);
    println!("Seed:   {}", options.seed);
    println!("Cases:  {}", cases.len());
    for (set, count) in &counts {
        println!("  {:<12} {}", set, count);
    }
    println!();

    let runtime = Arc::new(LocalServerRuntime::from_env());
    let evaluator = Evaluator::new(runtime, &config).with_thresholds(thresholds);

    let mut evaluations: Vec<TierEvaluation> = Vec::new();
    for tier in tiers {
        let bar = ProgressBar::new(cases.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(tier.to_string());

        let result = evaluator
            .evaluate_tier(tier, &cases, |done, _| bar.set_position(done as u64))
            .await;
        bar.finish_and_clear();

        match result {
            Ok(evaluation) => evaluations.push(evaluation),
            Err(e) => eprintln!("Skipping {} tier: {}", tier, e),
        }
    }

    if evaluations.is_empty() {
        return Err(miette::miette!("No tier could be evaluated"));
    }

    let mut report = EvalReport::new(options.suite.as_str(), options.seed, counts, &evaluations);
    if let Some(baseline) = &options.compare_to {
        report
            .compare_with(baseline)
            .map_err(|e| miette::miette!("Failed to compare with {}: {}", baseline.display(), e))?;
    }
    let report_dir = write_report(&report_base, &report, &evaluations)
        .map_err(|e| miette::miette!("Failed to write report: {}", e))?;

    print_table(&evaluations);
    println!();
    println!("Report: {}", report_dir.display());
    println!(
        "Overall thresholds: {}",
        if report.overall_threshold_passed { "PASS" } else { "FAIL" }
    );

    if options.fail_on_threshold && !report.overall_threshold_passed {
        return Err(miette::miette!("Evaluation thresholds failed"));
    }
    Ok(())
}

fn print_table(evaluations: &[TierEvaluation]) {
    println!(
        "{:<8} {:>6} {:>7} {:>8} {:>8} {:>8} {:>9} {:>9} {:>8}  {}",
        "TIER", "CASES", "EXACT", "F1", "KEYWORD", "REFUSAL", "BEHAVIOR", "P95 MS", "FAILED", "STATUS"
    );
    for evaluation in evaluations {
        let summary = &evaluation.summary;
        let m = &summary.metrics;
        println!(
            "{:<8} {:>6} {:>7.3} {:>8.3} {:>8.3} {:>8.3} {:>9.3} {:>9.1} {:>8}  {}",
            summary.tier,
            summary.total_cases,
            m.exact_match_rate,
            m.token_f1,
            m.keyword_coverage,
            m.refusal_accuracy,
            m.behavior_accuracy,
            m.p95_latency_ms,
            summary.failure_count,
            if summary.threshold_passed { "PASS" } else { "FAIL" }
        );
        for check in summary.threshold_checks.iter().filter(|check| !check.passed) {
            println!(
                "         {} {} {:.3} (actual {:.3})",
                check.metric, check.comparator, check.expected, check.actual
            );
        }
    }
}
