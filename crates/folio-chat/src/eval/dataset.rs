//! Curated evaluation sets stored as JSON lines.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use super::EvalError;

/// Curated sets, loaded from `<name>.jsonl`.
pub const CURATED_SETS: [&str; 3] = ["golden", "adversarial", "ood"];

/// What a correct answer does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedBehavior {
    #[default]
    Answer,
    Refuse,
}

/// One question with its reference answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalCase {
    pub id: String,
    pub dataset: String,
    pub category: String,
    pub question: String,
    pub reference_answer: String,
    pub expected_behavior: ExpectedBehavior,
    pub tags: Vec<String>,
}

impl EvalCase {
    /// Unique across datasets.
    pub fn key(&self) -> String {
        format!("{}:{}", self.dataset, self.id)
    }
}

/// Parse one curated set. Bad lines are skipped with a warning.
pub fn parse_jsonl(content: &str, dataset: &str) -> Vec<EvalCase> {
    let mut cases = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Invalid JSON in {} line {}: {}", dataset, line_number, e);
                continue;
            }
        };
        let Some(record) = record.as_object() else {
            warn!("Skipping non-object record in {} line {}", dataset, line_number);
            continue;
        };

        let text = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let question = text("question");
        if question.is_empty() {
            warn!("Missing question in {} line {}", dataset, line_number);
            continue;
        }

        let id = Some(text("id"))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-{}", dataset, line_number));
        let category = Some(text("category"))
            .filter(|category| !category.is_empty())
            .unwrap_or_else(|| "general".to_string());
        let expected_behavior = if text("expected_behavior").eq_ignore_ascii_case("refuse") {
            ExpectedBehavior::Refuse
        } else {
            ExpectedBehavior::Answer
        };
        let tags = record
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        cases.push(EvalCase {
            id,
            dataset: dataset.to_string(),
            category,
            question,
            reference_answer: text("reference_answer"),
            expected_behavior,
            tags,
        });
    }

    cases
}

/// Load every curated set in `dir`. A missing file is an empty set.
pub fn load_curated_sets(dir: &Path) -> Result<BTreeMap<String, Vec<EvalCase>>, EvalError> {
    let mut sets = BTreeMap::new();

    for name in CURATED_SETS {
        let path = dir.join(format!("{}.jsonl", name));
        let cases = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            parse_jsonl(&content, name)
        } else {
            debug!("No {} set at {}", name, path.display());
            Vec::new()
        };
        sets.insert(name.to_string(), cases);
    }

    Ok(sets)
}

/// Up to `limit` items picked by a seeded shuffle, kept in original order.
///
/// A `limit` of zero keeps everything.
pub fn deterministic_sample<T: Clone>(items: &[T], limit: usize, seed: u64) -> Vec<T> {
    if limit == 0 || items.len() <= limit {
        return items.to_vec();
    }

    let mut indices: Vec<usize> = (0..items.len()).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut selected = indices[..limit].to_vec();
    selected.sort_unstable();
    selected.into_iter().map(|index| items[index].clone()).collect()
}
