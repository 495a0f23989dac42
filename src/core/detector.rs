// DashCrab - GPL-3.0-or-later
// This file is part of DashCrab.
//
// Copyright (C) 2025 Daniel Freiermuth
//
// DashCrab is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DashCrab is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with DashCrab.  If not, see <https://www.gnu.org/licenses/>.

use crate::anomaly::explain::{AnomalyExplanation, ExplanationGenerator, ANOMALY_THRESHOLD};
use crate::anomaly::scorer::ScoreCombiner;
use crate::anomaly::{SignalKind, SignalSuite};
use crate::config::DetectorConfig;
use crate::core::anomaly_store::{AnomalyStore, RankedAnomaly, StatisticsReport};
use crate::core::artifact::AnomalyArtifact;
use crate::dataset::RecordBatch;
use crate::error::{DetectorError, ExtractorError, Result};
use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one detection run
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    /// One final score per record, in batch order
    pub final_scores: Vec<f64>,
    /// Signals that fell back to zeros, with the reason
    pub degradations: Vec<(SignalKind, ExtractorError)>,
    /// Records with a final score above the anomaly threshold
    pub flagged: usize,
    pub mean: f64,
    pub max: f64,
}

impl DetectionReport {
    fn new(final_scores: Vec<f64>, degradations: Vec<(SignalKind, ExtractorError)>) -> Self {
        let flagged = final_scores.iter().filter(|&&s| s > ANOMALY_THRESHOLD).count();
        let mean = if final_scores.is_empty() {
            0.0
        } else {
            final_scores.iter().sum::<f64>() / final_scores.len() as f64
        };
        let max = final_scores.iter().copied().fold(0.0, f64::max);
        Self {
            final_scores,
            degradations,
            flagged,
            mean,
            max,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Multi-signal anomaly detector.
///
/// Lifecycle: `new`, then `detect` or `load`, then queries. Queries made
/// before the detector is fitted fail with [`DetectorError::NotFitted`].
#[derive(Debug)]
pub struct Detector {
    config: ArcSwap<DetectorConfig>,
    store: AnomalyStore,
    fitted: AtomicBool,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            store: AnomalyStore::new(),
            fitted: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> Arc<DetectorConfig> {
        self.config.load_full()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.load(Ordering::Acquire)
    }

    fn ensure_fitted(&self) -> Result<()> {
        if self.is_fitted() {
            Ok(())
        } else {
            Err(DetectorError::NotFitted)
        }
    }

    /// Score every record in `batch` and replace the stored explanations.
    ///
    /// Extractor failures do not abort the run; they show up in the report's
    /// `degradations`.
    pub fn detect(&self, batch: &RecordBatch) -> Result<DetectionReport> {
        profiling::function_scope!();
        let config = self.config();
        if let Some(expected) = config.embedding_dimension {
            let dim = batch.embeddings().dim();
            if dim != expected {
                return Err(DetectorError::InputShape(format!(
                    "embedding dimension is {dim}, expected {expected}"
                )));
            }
        }

        tracing::info!("Starting multi-signal anomaly detection on {} records", batch.len());
        let start = std::time::Instant::now();

        let signals = SignalSuite::from_config(&config).run(batch);
        let combiner = ScoreCombiner::new(config.weights, config.calibration_exponent);
        let final_scores = combiner.combine(
            &signals.embedding.scores,
            &signals.text.scores,
            &signals.metadata.scores,
            &signals.statistical.scores,
        );

        let explanations = ExplanationGenerator::from_config(&config).explain_batch(
            batch,
            &signals,
            &final_scores,
        );
        self.store.record(explanations);
        self.fitted.store(true, Ordering::Release);

        let report = DetectionReport::new(final_scores, signals.degradations());
        tracing::info!(
            "Anomaly detection completed in {:?}: {} high, mean {:.3}, max {:.3}",
            start.elapsed(),
            report.flagged,
            report.mean,
            report.max
        );
        if report.is_degraded() {
            tracing::warn!("{} signal(s) degraded during this run", report.degradations.len());
        }
        Ok(report)
    }

    /// Ranked anomalies with `final_score >= threshold`
    pub fn top_anomalies(&self, limit: usize, threshold: f64) -> Result<Vec<RankedAnomaly>> {
        self.ensure_fitted()?;
        Ok(self.store.top(limit, threshold))
    }

    /// `Ok(None)` for an unknown id
    pub fn explanation(&self, video_id: &str) -> Result<Option<AnomalyExplanation>> {
        self.ensure_fitted()?;
        Ok(self.store.get(video_id))
    }

    pub fn statistics(&self) -> Result<StatisticsReport> {
        self.ensure_fitted()?;
        Ok(self.store.statistics())
    }

    /// Save explanations and the producing configuration to `path`
    pub fn persist(&self, path: &Path) -> Result<()> {
        self.ensure_fitted()?;
        let explanations = self
            .store
            .snapshot()
            .map(|map| map.as_ref().clone())
            .unwrap_or_default();
        AnomalyArtifact::new(explanations, self.is_fitted(), &self.config()).save(path)
    }

    /// Restore a previously persisted run. On failure nothing changes.
    pub fn load(&self, path: &Path) -> Result<()> {
        let artifact = AnomalyArtifact::load(path)?;

        if let Some(stored) = artifact.config {
            let mut config = self.config().as_ref().clone();
            config.contamination = stored.contamination;
            config.weights = stored.weights();
            self.config.store(Arc::new(config));
        } else {
            tracing::debug!("{} carries no config, keeping the current one", path.display());
        }

        let count = artifact.explanations.len();
        self.store.record(artifact.explanations);
        self.fitted.store(artifact.fitted, Ordering::Release);

        tracing::info!("Anomaly results loaded from {} ({count} explanations)", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::explain::Severity;
    use crate::dataset::{EmbeddingMatrix, Record};

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            n_estimators: 50,
            ..DetectorConfig::default()
        }
    }

    fn three_record_batch() -> RecordBatch {
        let mut accident = Record::new("A");
        accident.main_event = Some("accident-collision".to_string());
        accident.weather_conditions = Some("rain".to_string());
        accident.interpretation = Some("A collision at the junction ahead of us".to_string());

        let quiet = |id: &str| {
            let mut r = Record::new(id);
            r.main_event = Some("lane-change".to_string());
            r.weather_conditions = Some("clear".to_string());
            r.interpretation = Some("routine drive on a clear day".to_string());
            r
        };

        let embeddings = EmbeddingMatrix::from_rows(vec![
            vec![4.0, -3.0, 5.0],
            vec![0.1, 0.2, 0.1],
            vec![0.2, 0.1, 0.1],
        ])
        .unwrap();
        RecordBatch::new(vec![accident, quiet("B"), quiet("C")], embeddings, None).unwrap()
    }

    #[test]
    fn test_queries_before_fit_fail() {
        let detector = Detector::new(small_config()).unwrap();
        assert!(!detector.is_fitted());
        assert!(matches!(detector.top_anomalies(5, 0.0), Err(DetectorError::NotFitted)));
        assert!(matches!(detector.explanation("A"), Err(DetectorError::NotFitted)));
        assert!(matches!(detector.statistics(), Err(DetectorError::NotFitted)));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            detector.persist(&dir.path().join("out.json")),
            Err(DetectorError::NotFitted)
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = DetectorConfig {
            contamination: 1.5,
            ..DetectorConfig::default()
        };
        assert!(matches!(Detector::new(config), Err(DetectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_accident_in_rain_is_high_severity() {
        let detector = Detector::new(small_config()).unwrap();
        let report = detector.detect(&three_record_batch()).unwrap();

        assert_eq!(report.final_scores.len(), 3);
        assert!(!report.is_degraded());
        assert!(report.final_scores.iter().all(|s| (0.0..=1.0).contains(s)));

        let a = detector.explanation("A").unwrap().unwrap();
        assert!((a.component_scores.metadata - 0.8).abs() < 1e-9);
        assert!((a.final_score - 1.0).abs() < 1e-12);
        assert_eq!(a.severity, Severity::High);
        assert!(a.is_anomaly);
        assert!(a
            .reasons
            .contains(&"Event type indicates accident or collision".to_string()));
        assert!(a
            .reasons
            .contains(&"Adverse weather conditions: rain".to_string()));

        let top = detector.top_anomalies(1, 0.0).unwrap();
        assert_eq!(top[0].video_id, "A");
        assert!(detector.explanation("missing").unwrap().is_none());
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = Detector::new(small_config()).unwrap();
        let batch = three_record_batch();
        let first = detector.detect(&batch).unwrap();
        let second = detector.detect(&batch).unwrap();
        assert_eq!(first.final_scores, second.final_scores);
        assert_eq!(detector.statistics().unwrap().summary().unwrap().total, 3);
    }

    #[test]
    fn test_dimension_mismatch_fails_before_scoring() {
        let config = DetectorConfig {
            embedding_dimension: Some(8),
            ..small_config()
        };
        let detector = Detector::new(config).unwrap();
        assert!(matches!(
            detector.detect(&three_record_batch()),
            Err(DetectorError::InputShape(_))
        ));
        assert!(!detector.is_fitted());
    }

    #[test]
    fn test_non_finite_embedding_degrades_but_completes() {
        let records = (0..4).map(|i| Record::new(format!("r{i}"))).collect();
        let mut rows = vec![vec![0.5, 0.5]; 4];
        rows[1][0] = f64::NAN;
        let batch =
            RecordBatch::new(records, EmbeddingMatrix::from_rows(rows).unwrap(), None).unwrap();

        let detector = Detector::new(small_config()).unwrap();
        let report = detector.detect(&batch).unwrap();
        assert_eq!(report.degradations.len(), 1);
        assert_eq!(report.degradations[0].0, SignalKind::Embedding);
        assert!(report.final_scores.iter().all(|s| s.is_finite()));
        assert!(detector.is_fitted());
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomalies.json");

        let detector = Detector::new(small_config()).unwrap();
        detector.detect(&three_record_batch()).unwrap();
        detector.persist(&path).unwrap();

        let restored = Detector::new(DetectorConfig::default()).unwrap();
        restored.load(&path).unwrap();
        assert!(restored.is_fitted());
        for id in ["A", "B", "C"] {
            assert_eq!(
                restored.explanation(id).unwrap(),
                detector.explanation(id).unwrap()
            );
        }
        assert_eq!(
            restored.top_anomalies(3, 0.0).unwrap(),
            detector.top_anomalies(3, 0.0).unwrap()
        );
    }

    #[test]
    fn test_load_adopts_stored_weights_and_contamination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomalies.json");

        let config = DetectorConfig {
            contamination: 0.2,
            ..small_config()
        };
        let detector = Detector::new(config.clone()).unwrap();
        detector.detect(&three_record_batch()).unwrap();
        detector.persist(&path).unwrap();

        let restored = Detector::new(DetectorConfig::default()).unwrap();
        restored.load(&path).unwrap();
        assert!((restored.config().contamination - 0.2).abs() < f64::EPSILON);
        assert_eq!(restored.config().weights, config.weights);
    }

    #[test]
    fn test_load_without_stored_config_keeps_current_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{
                "anomaly_explanations": {
                    "A": {
                        "final_score": 0.9,
                        "severity": "High",
                        "component_scores": {
                            "embedding": 0.5,
                            "text": 0.5,
                            "metadata": 0.8,
                            "statistical": 0.0
                        },
                        "reasons": ["Event type indicates accident or collision"],
                        "is_anomaly": true,
                        "confidence": 0.3333333333333333
                    }
                },
                "fitted": true
            }"#,
        )
        .unwrap();

        let config = DetectorConfig {
            contamination: 0.25,
            ..small_config()
        };
        let detector = Detector::new(config.clone()).unwrap();
        detector.load(&path).unwrap();

        assert!(detector.is_fitted());
        assert_eq!(*detector.config(), config);
        let top = detector.top_anomalies(5, 0.0).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].video_id, "A");
    }

    #[test]
    fn test_failed_load_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "not json").unwrap();

        let detector = Detector::new(small_config()).unwrap();
        detector.detect(&three_record_batch()).unwrap();
        let before = detector.top_anomalies(3, 0.0).unwrap();

        assert!(matches!(
            detector.load(&broken),
            Err(DetectorError::Persistence { .. })
        ));
        assert_eq!(detector.top_anomalies(3, 0.0).unwrap(), before);
        assert_eq!(*detector.config(), small_config());
    }
}
