use crate::anomaly::isolation::{IsolationForest, StandardScaler};
use crate::anomaly::percentile;
use crate::anomaly::scorer::SignalExtractor;
use crate::anomaly::SignalKind;
use crate::config::DetectorConfig;
use crate::dataset::RecordBatch;
use crate::error::ExtractorError;

/// Guards the min-max inversion against a vanishing score range
const RANGE_EPSILON: f64 = 1e-8;

/// Isolation-forest outliers in the semantic embedding space
#[derive(Debug, Clone)]
pub struct EmbeddingOutlierExtractor {
    contamination: f64,
    n_estimators: usize,
    max_samples: usize,
    seed: u64,
}

impl EmbeddingOutlierExtractor {
    pub const fn new(
        contamination: f64,
        n_estimators: usize,
        max_samples: usize,
        seed: u64,
    ) -> Self {
        Self {
            contamination,
            n_estimators,
            max_samples,
            seed,
        }
    }

    pub const fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.contamination,
            config.n_estimators,
            config.max_samples,
            config.random_seed,
        )
    }

    /// Invert decision scores into [0, 1] and keep only the top contamination share
    fn gate(&self, raw: &[f64]) -> Vec<f64> {
        let max_raw = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_raw = raw.iter().copied().fold(f64::INFINITY, f64::min);
        if (max_raw - min_raw).abs() < 1e-12 {
            return vec![0.0; raw.len()];
        }

        let normalized: Vec<f64> = raw
            .iter()
            .map(|&r| (max_raw - r) / (max_raw - min_raw + RANGE_EPSILON))
            .collect();
        let threshold = percentile(&normalized, (1.0 - self.contamination) * 100.0);

        normalized
            .into_iter()
            .map(|s| if s > threshold { s } else { 0.0 })
            .collect()
    }
}

impl SignalExtractor for EmbeddingOutlierExtractor {
    fn kind(&self) -> SignalKind {
        SignalKind::Embedding
    }

    fn extract(&self, batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError> {
        profiling::function_scope!();
        let vectors = batch.embeddings().view();

        if vectors.nrows() < 2 {
            tracing::debug!("Skipping embedding outliers for a batch of {}", vectors.nrows());
            return Ok(vec![0.0; vectors.nrows()]);
        }
        if let Some(((row, column), _)) = vectors.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ExtractorError::NonFiniteInput { row, column });
        }

        let scaled = StandardScaler::fit_transform(vectors);
        let mut forest = IsolationForest::new(
            self.n_estimators,
            self.max_samples,
            self.contamination,
            self.seed,
        );
        forest.fit(scaled.view())?;
        let raw = forest.decision_function(scaled.view()).to_vec();

        let scores = self.gate(&raw);
        tracing::info!(
            "Embedding anomalies detected: {}",
            scores.iter().filter(|&&s| s > 0.0).count()
        );
        Ok(scores)
    }
}
