pub mod embedding;
pub mod explain;
pub mod isolation;
pub mod keyword;
pub mod rarity;
pub mod scorer;
pub mod statistical;

use crate::config::DetectorConfig;
use crate::dataset::RecordBatch;
use crate::error::ExtractorError;
use embedding::EmbeddingOutlierExtractor;
use keyword::TextSignalExtractor;
use rarity::MetadataRarityExtractor;
use scorer::{run_extractor, SignalOutcome};
use serde::{Deserialize, Serialize};
use statistical::StatisticalOutlierExtractor;
use std::fmt;

/// The four independent anomaly signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Embedding,
    Text,
    Metadata,
    Statistical,
}

impl SignalKind {
    /// Fixed order, also the order explanation reasons are emitted in
    pub const ALL: [Self; 4] = [
        Self::Embedding,
        Self::Text,
        Self::Metadata,
        Self::Statistical,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Text => "text",
            Self::Metadata => "metadata",
            Self::Statistical => "statistical",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalize scores to the 0-1 range.
///
/// A batch without spread carries no ranking information and maps to zeros.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max_score - min_score;

    if !range.is_finite() || range.abs() < 1e-12 {
        return vec![0.0; scores.len()];
    }

    scores
        .iter()
        .map(|&s| ((s - min_score) / range).clamp(0.0, 1.0))
        .collect()
}

/// Percentile with linear interpolation between closest ranks, `q` in [0, 100]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Component scores for a whole batch, one outcome per signal
#[derive(Debug, Clone)]
pub struct SignalScores {
    pub embedding: SignalOutcome,
    pub text: SignalOutcome,
    pub metadata: SignalOutcome,
    pub statistical: SignalOutcome,
}

impl SignalScores {
    pub const fn get(&self, kind: SignalKind) -> &SignalOutcome {
        match kind {
            SignalKind::Embedding => &self.embedding,
            SignalKind::Text => &self.text,
            SignalKind::Metadata => &self.metadata,
            SignalKind::Statistical => &self.statistical,
        }
    }

    /// Signals that fell back to zeros during this run
    pub fn degradations(&self) -> Vec<(SignalKind, ExtractorError)> {
        SignalKind::ALL
            .iter()
            .filter_map(|&kind| {
                self.get(kind)
                    .degradation
                    .clone()
                    .map(|error| (kind, error))
            })
            .collect()
    }
}

/// The default set of signal extractors built from one configuration
pub struct SignalSuite {
    embedding: EmbeddingOutlierExtractor,
    text: TextSignalExtractor,
    metadata: MetadataRarityExtractor,
    statistical: StatisticalOutlierExtractor,
}

impl SignalSuite {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            embedding: EmbeddingOutlierExtractor::from_config(config),
            text: TextSignalExtractor::from_config(config),
            metadata: MetadataRarityExtractor::from_config(config),
            statistical: StatisticalOutlierExtractor,
        }
    }

    /// Run all four extractors in parallel and wait for every one of them
    pub fn run(&self, batch: &RecordBatch) -> SignalScores {
        profiling::function_scope!();
        let ((embedding, text), (metadata, statistical)) = rayon::join(
            || {
                rayon::join(
                    || run_extractor(&self.embedding, batch),
                    || run_extractor(&self.text, batch),
                )
            },
            || {
                rayon::join(
                    || run_extractor(&self.metadata, batch),
                    || run_extractor(&self.statistical, batch),
                )
            },
        );

        SignalScores {
            embedding,
            text,
            metadata,
            statistical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spreads_to_unit_range() {
        let normalized = min_max_normalize(&[2.0, 4.0, 3.0]);
        assert_eq!(normalized, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_normalize_flat_scores_are_zero() {
        assert_eq!(min_max_normalize(&[0.3, 0.3]), vec![0.0, 0.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 100.0) - 4.0).abs() < 1e-12);
        assert!((percentile(&values, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&[1.0, 2.0], 90.0) - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(SignalKind::Statistical.to_string(), "statistical");
        assert_eq!(
            serde_json::to_string(&SignalKind::Embedding).unwrap(),
            "\"embedding\""
        );
    }
}
