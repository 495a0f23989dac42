use crate::anomaly::scorer::SignalExtractor;
use crate::anomaly::SignalKind;
use crate::config::DetectorConfig;
use crate::dataset::RecordBatch;
use crate::error::ExtractorError;
use fancy_regex::Regex;
use rayon::prelude::*;
use std::sync::LazyLock;

const NORMAL_PENALTY: f64 = 0.3;
const TERSE_BONUS: f64 = 0.2;
const DETAILED_BONUS: f64 = 0.3;
const EMPHASIS_BONUS: f64 = 0.2;
const TERSE_LEN: usize = 20;
const DETAILED_LEN: usize = 200;

/// Repeated exclamation marks or a run of capitals, read as alarmed language
static EMPHASIS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!{2,}|[A-Z]{5,}").expect("valid emphasis pattern"));

/// Keyword-based scorer over the interpretation and description texts.
///
/// Weighted keywords add up, routine phrasing subtracts a flat penalty, and
/// unusually short or long interpretations are themselves suspicious.
#[derive(Debug, Clone)]
pub struct TextSignalExtractor {
    /// Lower-cased keyword to weight, in table order
    keywords: Vec<(String, f64)>,
    normal_indicators: Vec<String>,
}

impl TextSignalExtractor {
    pub fn new(keywords: Vec<(String, f64)>, normal_indicators: Vec<String>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|(k, w)| (k.to_lowercase(), w))
                .collect(),
            normal_indicators: normal_indicators
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config
                .anomaly_keywords
                .iter()
                .map(|(k, &w)| (k.clone(), w))
                .collect(),
            config.normal_indicators.clone(),
        )
    }

    /// Score one record's texts
    pub fn score_text(&self, interpretation: &str, description: &str) -> f64 {
        let interp_lower = interpretation.to_lowercase();
        let desc_lower = description.to_lowercase();

        // One penalty no matter how many routine phrases match
        let normal_penalty = if self
            .normal_indicators
            .iter()
            .any(|phrase| interp_lower.contains(phrase.as_str()))
        {
            NORMAL_PENALTY
        } else {
            0.0
        };

        // Each table keyword counts once, even if it appears in both texts
        let keyword_sum: f64 = self
            .keywords
            .iter()
            .filter(|(k, _)| interp_lower.contains(k.as_str()) || desc_lower.contains(k.as_str()))
            .map(|(_, w)| w)
            .sum();

        let length = interp_lower.chars().count();
        let length_adj = if length < TERSE_LEN {
            TERSE_BONUS
        } else if length > DETAILED_LEN {
            DETAILED_BONUS
        } else {
            0.0
        };

        // Matched on the original casing so capital runs survive
        let emphasis = EMPHASIS_PATTERN.is_match(interpretation).unwrap_or(false);
        let pattern_bonus = if emphasis { EMPHASIS_BONUS } else { 0.0 };

        (keyword_sum + length_adj + pattern_bonus - normal_penalty).clamp(0.0, 1.0)
    }
}

impl SignalExtractor for TextSignalExtractor {
    fn kind(&self) -> SignalKind {
        SignalKind::Text
    }

    fn extract(&self, batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError> {
        profiling::function_scope!();
        let scores: Vec<f64> = batch
            .records()
            .par_iter()
            .map(|r| self.score_text(r.interpretation_text(), r.description_text()))
            .collect();

        tracing::info!(
            "Text anomalies detected: {}",
            scores.iter().filter(|&&s| s > 0.3).count()
        );
        Ok(scores)
    }
}
