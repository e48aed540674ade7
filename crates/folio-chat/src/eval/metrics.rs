//! Lexical answer-quality metrics.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::dataset::{EvalCase, ExpectedBehavior};

/// Words never inferred as required keywords.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with",
];

/// Phrases treated as a refusal even without configured markers.
const REFUSAL_PATTERNS: &[&str] = &[
    "not enough information",
    "cannot determine",
    "outside the scope",
    "do not know",
    "don t know",
    "can t answer",
];

/// Keywords inferred per case.
const MAX_KEYWORDS: usize = 6;

/// Per-case scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseScores {
    pub exact_match: f64,
    pub token_f1: f64,
    pub keyword_coverage: f64,
    pub response_length_compliant: bool,
    pub is_refusal: bool,
    pub behavior_correct: bool,
}

/// Length limits and refusal markers used when scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringLimits {
    pub max_sentences: usize,
    pub max_words: usize,
    pub refusal_markers: Vec<String>,
}

impl Default for ScoringLimits {
    fn default() -> Self {
        Self {
            max_sentences: 3,
            max_words: 60,
            refusal_markers: vec![
                "I don't have that information".to_string(),
                "I can only answer questions about".to_string(),
            ],
        }
    }
}

/// Lowercase, keep ASCII letters and digits, collapse everything else to
/// single spaces.
pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// 1.0 when both texts normalize to the same string.
pub fn exact_match(reference: &str, prediction: &str) -> f64 {
    if normalize_text(reference) == normalize_text(prediction) {
        1.0
    } else {
        0.0
    }
}

/// Token-level F1 over multiset overlap.
pub fn token_f1(reference: &str, prediction: &str) -> f64 {
    let reference = tokenize(reference);
    let prediction = tokenize(prediction);

    if reference.is_empty() && prediction.is_empty() {
        return 1.0;
    }
    if reference.is_empty() || prediction.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &reference {
        *counts.entry(token.as_str()).or_default() += 1;
    }
    let mut overlap = 0usize;
    for token in &prediction {
        if let Some(count) = counts.get_mut(token.as_str()) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }
    if overlap == 0 {
        return 0.0;
    }

    let precision = overlap as f64 / prediction.len() as f64;
    let recall = overlap as f64 / reference.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Keywords a good answer should mention.
///
/// `kw:` tags win. Without them, content words of four or more letters are
/// taken from the reference answer.
pub fn extract_required_keywords(
    reference_answer: &str,
    tags: &[String],
    max_keywords: usize,
) -> Vec<String> {
    let tagged: Vec<String> = tags
        .iter()
        .filter_map(|tag| {
            let tag = tag.to_lowercase();
            tag.strip_prefix("kw:").map(|keyword| keyword.trim().to_string())
        })
        .filter(|keyword| !keyword.is_empty())
        .collect();

    let candidates = if tagged.is_empty() {
        tokenize(reference_answer)
            .into_iter()
            .filter(|token| {
                token.len() >= 4
                    && !STOP_WORDS.contains(&token.as_str())
                    && !token.chars().all(|c| c.is_ascii_digit())
            })
            .collect()
    } else {
        tagged
    };

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|keyword| seen.insert(keyword.clone()))
        .take(max_keywords)
        .collect()
}

/// Fraction of `keywords` found in `response`.
pub fn keyword_coverage(response: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 1.0;
    }
    let response = normalize_text(response);
    if response.is_empty() {
        return 0.0;
    }

    let matched = keywords
        .iter()
        .map(|keyword| normalize_text(keyword))
        .filter(|keyword| !keyword.is_empty() && response.contains(keyword.as_str()))
        .count();
    matched as f64 / keywords.len() as f64
}

/// Whether `text` is non-empty and within both limits.
pub fn response_length_compliant(text: &str, max_sentences: usize, max_words: usize) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    if text.split_whitespace().count() > max_words {
        return false;
    }
    count_sentences(text) <= max_sentences
}

/// Heuristic refusal detector. An empty answer counts as a refusal.
pub fn is_refusal_response(response: &str, markers: &[String]) -> bool {
    let response = normalize_text(response);
    if response.is_empty() {
        return true;
    }

    let marked = markers.iter().any(|marker| {
        let marker = normalize_text(marker);
        !marker.is_empty() && response.contains(marker.as_str())
    });
    marked
        || REFUSAL_PATTERNS
            .iter()
            .any(|pattern| response.contains(pattern))
}

/// Score one response against its case.
pub fn score_case(case: &EvalCase, response: &str, limits: &ScoringLimits) -> CaseScores {
    let has_reference = !case.reference_answer.is_empty();
    let keywords = extract_required_keywords(&case.reference_answer, &case.tags, MAX_KEYWORDS);
    let is_refusal = is_refusal_response(response, &limits.refusal_markers);

    CaseScores {
        exact_match: if has_reference {
            exact_match(&case.reference_answer, response)
        } else {
            0.0
        },
        token_f1: if has_reference {
            token_f1(&case.reference_answer, response)
        } else {
            0.0
        },
        keyword_coverage: keyword_coverage(response, &keywords),
        response_length_compliant: response_length_compliant(
            response,
            limits.max_sentences,
            limits.max_words,
        ),
        is_refusal,
        behavior_correct: match case.expected_behavior {
            ExpectedBehavior::Refuse => is_refusal,
            ExpectedBehavior::Answer => !is_refusal,
        },
    }
}

/// Sentences are the non-empty runs between `.`, `!` and `?`. At least one.
fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|chunk| !chunk.trim().is_empty())
        .count()
        .max(1)
}
