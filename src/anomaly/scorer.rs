use crate::anomaly::{min_max_normalize, SignalKind};
use crate::config::ScoreWeights;
use crate::dataset::RecordBatch;
use crate::error::ExtractorError;

/// Trait for the independent anomaly signals
pub trait SignalExtractor: Send + Sync {
    fn kind(&self) -> SignalKind;

    /// Score every record in the batch.
    /// Returns one score per record in [0.0, 1.0] where higher = more anomalous
    fn extract(&self, batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError>;
}

/// Result of running a single extractor over a batch
#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome {
    pub kind: SignalKind,
    /// Always one finite value in [0, 1] per record
    pub scores: Vec<f64>,
    /// Set when the extractor failed and `scores` is the all-zero fallback
    pub degradation: Option<ExtractorError>,
}

impl SignalOutcome {
    fn degraded(kind: SignalKind, len: usize, error: ExtractorError) -> Self {
        Self {
            kind,
            scores: vec![0.0; len],
            degradation: Some(error),
        }
    }

    pub const fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }
}

fn sanitize(scores: Vec<f64>, expected: usize) -> Result<Vec<f64>, ExtractorError> {
    if scores.len() != expected {
        return Err(ExtractorError::ScoreCountMismatch {
            expected,
            actual: scores.len(),
        });
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(ExtractorError::NonFiniteScore { index });
    }
    Ok(scores.into_iter().map(|s| s.clamp(0.0, 1.0)).collect())
}

/// Run an extractor, turning any failure into an all-zero degraded outcome
pub fn run_extractor(extractor: &dyn SignalExtractor, batch: &RecordBatch) -> SignalOutcome {
    profiling::function_scope!();
    let kind = extractor.kind();
    let start = std::time::Instant::now();

    match extractor
        .extract(batch)
        .and_then(|scores| sanitize(scores, batch.len()))
    {
        Ok(scores) => {
            tracing::debug!(
                "{kind} signal scored {} records in {:?}",
                scores.len(),
                start.elapsed()
            );
            SignalOutcome {
                kind,
                scores,
                degradation: None,
            }
        }
        Err(error) => {
            tracing::warn!("{kind} signal degraded to zero scores: {error}");
            SignalOutcome::degraded(kind, batch.len(), error)
        }
    }
}

/// Blends the four component scores into one calibrated score per record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreCombiner {
    weights: ScoreWeights,
    /// Convexity applied before normalization; values above 1.0 push
    /// mid-range scores down and separate the high tail
    exponent: f64,
}

impl ScoreCombiner {
    pub const fn new(weights: ScoreWeights, exponent: f64) -> Self {
        Self { weights, exponent }
    }

    /// Weighted sum of one record's component scores, before calibration
    pub fn blend(&self, embedding: f64, text: f64, metadata: f64, statistical: f64) -> f64 {
        self.weights.embedding * embedding
            + self.weights.text * text
            + self.weights.metadata * metadata
            + self.weights.statistical * statistical
    }

    fn calibrate(&self, blended: f64) -> f64 {
        blended.max(0.0).powf(self.exponent)
    }

    /// Combine aligned component vectors and min-max normalize the batch.
    ///
    /// If every record ends up with the same calibrated score the result is
    /// all zeros.
    pub fn combine(
        &self,
        embedding: &[f64],
        text: &[f64],
        metadata: &[f64],
        statistical: &[f64],
    ) -> Vec<f64> {
        profiling::function_scope!();
        let calibrated: Vec<f64> = embedding
            .iter()
            .zip(text)
            .zip(metadata)
            .zip(statistical)
            .map(|(((&e, &t), &m), &s)| self.calibrate(self.blend(e, t, m, s)))
            .collect();

        min_max_normalize(&calibrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{EmbeddingMatrix, Record};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct FixedExtractor(Vec<f64>);

    impl SignalExtractor for FixedExtractor {
        fn kind(&self) -> SignalKind {
            SignalKind::Text
        }

        fn extract(&self, _batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    impl SignalExtractor for FailingExtractor {
        fn kind(&self) -> SignalKind {
            SignalKind::Embedding
        }

        fn extract(&self, _batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError> {
            Err(ExtractorError::Degenerate("nothing to fit".to_string()))
        }
    }

    fn batch(n: usize) -> RecordBatch {
        let records = (0..n).map(|i| Record::new(format!("r{i}"))).collect();
        let emb = EmbeddingMatrix::from_rows(vec![vec![0.0; 2]; n]).unwrap();
        RecordBatch::new(records, emb, None).unwrap()
    }

    #[test]
    fn test_failing_extractor_degrades_to_zeros() {
        let outcome = run_extractor(&FailingExtractor, &batch(3));
        assert!(outcome.is_degraded());
        assert_eq!(outcome.scores, vec![0.0; 3]);
        assert_eq!(outcome.kind, SignalKind::Embedding);
    }

    #[test]
    fn test_wrong_length_is_degradation() {
        let outcome = run_extractor(&FixedExtractor(vec![0.5]), &batch(2));
        assert_eq!(
            outcome.degradation,
            Some(ExtractorError::ScoreCountMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(outcome.scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_nan_is_degradation_and_out_of_range_is_clamped() {
        let outcome = run_extractor(&FixedExtractor(vec![0.2, f64::NAN]), &batch(2));
        assert_eq!(
            outcome.degradation,
            Some(ExtractorError::NonFiniteScore { index: 1 })
        );

        let outcome = run_extractor(&FixedExtractor(vec![1.7, -0.3]), &batch(2));
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.scores, vec![1.0, 0.0]);
    }

    #[test]
    fn test_combined_scores_stay_in_unit_range() {
        let combiner = ScoreCombiner::new(ScoreWeights::default(), 1.2);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..50 {
            let n = rng.gen_range(1..40);
            let mut vector = || (0..n).map(|_| rng.gen_range(0.0..=1.0)).collect::<Vec<f64>>();
            let (e, t, m, s) = (vector(), vector(), vector(), vector());
            let combined = combiner.combine(&e, &t, &m, &s);

            assert_eq!(combined.len(), n);
            assert!(combined.iter().all(|c| c.is_finite() && (0.0..=1.0).contains(c)));
        }
    }

    #[test]
    fn test_blend_is_monotonic_in_each_component() {
        let combiner = ScoreCombiner::new(ScoreWeights::default(), 1.2);
        let base = [0.2, 0.4, 0.1, 0.3];
        let before = combiner.calibrate(combiner.blend(base[0], base[1], base[2], base[3]));

        for component in 0..4 {
            let mut raised = base;
            raised[component] += 0.25;
            let after =
                combiner.calibrate(combiner.blend(raised[0], raised[1], raised[2], raised[3]));
            assert!(after >= before, "raising component {component} lowered the score");
        }
    }

    #[test]
    fn test_identical_scores_normalize_to_zero() {
        let combiner = ScoreCombiner::new(ScoreWeights::default(), 1.2);
        let same = vec![0.5; 4];
        assert_eq!(combiner.combine(&same, &same, &same, &same), vec![0.0; 4]);
    }

    #[test]
    fn test_highest_blend_normalizes_to_one() {
        let combiner = ScoreCombiner::new(ScoreWeights::default(), 1.2);
        let combined = combiner.combine(
            &[0.0, 0.9, 0.1],
            &[0.0, 0.8, 0.1],
            &[0.0, 1.0, 0.0],
            &[0.0, 0.0, 0.0],
        );
        assert!(combined[0].abs() < 1e-12);
        assert!((combined[1] - 1.0).abs() < 1e-12);
        assert!(combined[2] > 0.0 && combined[2] < 1.0);
    }
}
