use crate::anomaly::scorer::SignalExtractor;
use crate::anomaly::SignalKind;
use crate::dataset::RecordBatch;
use crate::error::ExtractorError;
use indexmap::IndexMap;

const EXTREME_Z: f64 = 3.0;
const STRONG_Z: f64 = 2.0;
const EXTREME_BONUS: f64 = 0.3;
const STRONG_BONUS: f64 = 0.2;

/// Mean and sample standard deviation of one numeric field
#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldMoments {
    mean: f64,
    std: f64,
}

impl FieldMoments {
    /// `None` for fewer than two values or a field without spread
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();
        (std.is_finite() && std > f64::EPSILON).then_some(Self { mean, std })
    }

    fn z_score(&self, value: f64) -> f64 {
        ((value - self.mean) / self.std).abs()
    }
}

/// Z-score outliers over whatever numeric measurements the records carry
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalOutlierExtractor;

impl StatisticalOutlierExtractor {
    fn bonus(z: f64) -> f64 {
        if z > EXTREME_Z {
            EXTREME_BONUS
        } else if z > STRONG_Z {
            STRONG_BONUS
        } else {
            0.0
        }
    }
}

impl SignalExtractor for StatisticalOutlierExtractor {
    fn kind(&self) -> SignalKind {
        SignalKind::Statistical
    }

    fn extract(&self, batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError> {
        profiling::function_scope!();
        let records = batch.records();

        let mut columns: IndexMap<&str, Vec<f64>> = IndexMap::new();
        for record in records {
            for (name, value) in record.numeric_fields() {
                columns.entry(name).or_default().push(value);
            }
        }
        if columns.is_empty() {
            tracing::info!("No numerical features found for statistical analysis");
            return Ok(vec![0.0; records.len()]);
        }

        let moments: IndexMap<&str, FieldMoments> = columns
            .iter()
            .filter_map(|(&name, values)| FieldMoments::from_values(values).map(|m| (name, m)))
            .collect();

        let scores: Vec<f64> = records
            .iter()
            .map(|record| {
                record
                    .numeric_fields()
                    .filter_map(|(name, value)| moments.get(name).map(|m| m.z_score(value)))
                    .map(Self::bonus)
                    .sum::<f64>()
                    .min(1.0)
            })
            .collect();

        tracing::info!(
            "Statistical anomalies detected: {}",
            scores.iter().filter(|&&s| s > 0.2).count()
        );
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{EmbeddingMatrix, Record};

    fn batch(records: Vec<Record>) -> RecordBatch {
        let n = records.len();
        let emb = EmbeddingMatrix::from_rows(vec![vec![0.0; 2]; n]).unwrap();
        RecordBatch::new(records, emb, None).unwrap()
    }

    fn with_tokens(id: &str, tokens: f64) -> Record {
        let mut r = Record::new(id);
        r.total_tokens = Some(tokens);
        r
    }

    #[test]
    fn test_no_numeric_fields_scores_zero() {
        let scores = StatisticalOutlierExtractor
            .extract(&batch(vec![Record::new("a"), Record::new("b")]))
            .unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_extreme_value_is_flagged() {
        let mut records: Vec<Record> = (0..20)
            .map(|i| with_tokens(&format!("r{i}"), 1000.0 + f64::from(i % 5)))
            .collect();
        records.push(with_tokens("big", 5000.0));

        let scores = StatisticalOutlierExtractor.extract(&batch(records)).unwrap();
        assert!((scores[20] - 0.3).abs() < 1e-12);
        assert!(scores[..20].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_two_sigma_tier() {
        // one high value among eight alternating ones lands just above 2 sigma
        let values = [-1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 3.5];
        let moments = FieldMoments::from_values(&values).unwrap();
        let z = moments.z_score(3.5);
        assert!(z > 2.0 && z <= 3.0, "z = {z}");
        assert!((StatisticalOutlierExtractor::bonus(z) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_constant_or_single_value_fields_are_skipped() {
        assert_eq!(FieldMoments::from_values(&[4.0]), None);
        assert_eq!(FieldMoments::from_values(&[4.0, 4.0, 4.0]), None);

        let scores = StatisticalOutlierExtractor
            .extract(&batch(vec![with_tokens("a", 7.0), with_tokens("b", 7.0)]))
            .unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_sample_standard_deviation() {
        let moments = FieldMoments::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((moments.mean - 5.0).abs() < 1e-12);
        assert!((moments.std - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }
}
