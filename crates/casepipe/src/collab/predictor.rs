use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CollabError;
use crate::db::artifact_repo::HistoricalPrediction;

pub const LIKELY_TO_WIN: &str = "Likely to Win";
pub const LIKELY_TO_LOSE: &str = "Likely to Lose";

/// Fewer prior predictions than this and history is ignored.
const MIN_HISTORY_ROWS: usize = 20;
const MIN_SIMILAR_SAMPLES: usize = 5;
const TOP_SAMPLES: usize = 25;
const HISTORY_TEXT_CHARS: usize = 4000;
const KEYWORD_WEIGHT: f64 = 0.12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub outcome: String,
    pub win_probability: f64,
    pub confidence: f64,
    pub key_factors: Vec<String>,
    pub source: String,
    pub model_version: String,
}

impl Prediction {
    pub fn is_win(&self) -> bool {
        self.outcome == LIKELY_TO_WIN
    }
}

pub trait Predictor: Send + Sync {
    /// Predicts the outcome of `text`, optionally informed by earlier
    /// predictions for other cases.
    fn predict(
        &self,
        text: &str,
        history: &[HistoricalPrediction],
    ) -> Result<Prediction, CollabError>;

    fn model_version(&self) -> &str;
}

static RE_POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(granted|allowed|benefit|compensation|acquitted)\b").unwrap()
});
static RE_NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(dismissed|rejected|proved|convicted|insufficient)\b").unwrap()
});
static RE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-zA-Z]{3,}").unwrap());

fn tokens(text: &str) -> HashSet<String> {
    RE_TOKEN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    inter as f64 / union.max(1) as f64
}

/// Outcome keyword polarity, optionally blended with the labels of the
/// most similar earlier cases.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordPredictor;

impl KeywordPredictor {
    pub const MODEL_VERSION: &'static str = "keyword-v1";

    fn baseline(&self, text: &str) -> Prediction {
        let clean = text.to_lowercase();
        let positive = RE_POSITIVE.find_iter(&clean).count() as f64;
        let negative = RE_NEGATIVE.find_iter(&clean).count() as f64;
        let probability = (0.5 + (positive - negative) * KEYWORD_WEIGHT).clamp(0.01, 0.99);

        Prediction {
            outcome: if probability > 0.5 {
                LIKELY_TO_WIN
            } else {
                LIKELY_TO_LOSE
            }
            .to_string(),
            win_probability: probability,
            confidence: probability,
            key_factors: vec![
                "Keyword polarity from legal outcome terms".to_string(),
                "Baseline text classification probability".to_string(),
            ],
            source: "baseline".to_string(),
            model_version: Self::MODEL_VERSION.to_string(),
        }
    }

    /// Label and confidence voted by the most similar history rows, or
    /// `None` when history is too sparse to trust.
    fn historical_vote(text: &str, history: &[HistoricalPrediction]) -> Option<(String, f64)> {
        if history.len() < MIN_HISTORY_ROWS {
            return None;
        }
        let query = tokens(text);
        if query.is_empty() {
            return None;
        }

        let mut samples: Vec<(f64, &str, f64)> = history
            .iter()
            .filter(|row| !row.outcome.is_empty() && !row.text.is_empty())
            .filter_map(|row| {
                let head: String = row.text.chars().take(HISTORY_TEXT_CHARS).collect();
                let other = tokens(&head);
                if query.is_disjoint(&other) {
                    return None;
                }
                Some((jaccard(&query, &other), row.outcome.as_str(), row.confidence))
            })
            .collect();
        if samples.len() < MIN_SIMILAR_SAMPLES {
            return None;
        }
        samples.sort_by(|a, b| b.0.total_cmp(&a.0));
        samples.truncate(TOP_SAMPLES);

        // insertion order breaks ties
        let mut label_scores: Vec<(&str, f64)> = Vec::new();
        for (sim, label, conf) in samples {
            let weight = sim * (0.5 + conf / 2.0);
            match label_scores.iter_mut().find(|(l, _)| *l == label) {
                Some((_, score)) => *score += weight,
                None => label_scores.push((label, weight)),
            }
        }

        let total: f64 = label_scores.iter().map(|(_, s)| s).sum();
        let mut best: Option<(&str, f64)> = None;
        for (label, score) in &label_scores {
            if best.map(|(_, s)| *score > s).unwrap_or(true) {
                best = Some((*label, *score));
            }
        }
        let (label, score) = best?;
        let total = if total > 0.0 { total } else { 1.0 };
        Some((label.to_string(), (score / total).clamp(0.5, 0.95)))
    }
}

impl Predictor for KeywordPredictor {
    fn predict(
        &self,
        text: &str,
        history: &[HistoricalPrediction],
    ) -> Result<Prediction, CollabError> {
        let base = self.baseline(text);
        let Some((label, hist_conf)) = Self::historical_vote(text, history) else {
            return Ok(base);
        };

        let confidence = if label != base.outcome {
            (hist_conf + base.confidence) / 2.0
        } else {
            hist_conf.max(base.confidence)
        };
        Ok(Prediction {
            outcome: label,
            confidence,
            key_factors: vec![
                "Past similar judgment outcomes".to_string(),
                "Token overlap similarity with historical cases".to_string(),
                "Baseline classifier score".to_string(),
            ],
            source: "historical+baseline".to_string(),
            ..base
        })
    }

    fn model_version(&self) -> &str {
        Self::MODEL_VERSION
    }
}
