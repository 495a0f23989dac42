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

use crate::config::{DetectorConfig, ScoreWeights};
use crate::core::anomaly_store::{AnomalyStatistics, ExplanationMap};
use crate::error::{DetectorError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Current results file format version
pub const ARTIFACT_VERSION: u32 = 1;

fn default_version() -> u32 {
    ARTIFACT_VERSION
}

fn default_generated_at() -> DateTime<Local> {
    Local::now()
}

/// The configuration that produced a set of explanations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub contamination: f64,
    pub embedding_weight: f64,
    pub text_weight: f64,
    pub metadata_weight: f64,
    pub statistical_weight: f64,
}

impl ArtifactConfig {
    pub const fn from_config(config: &DetectorConfig) -> Self {
        Self {
            contamination: config.contamination,
            embedding_weight: config.weights.embedding,
            text_weight: config.weights.text,
            metadata_weight: config.weights.metadata,
            statistical_weight: config.weights.statistical,
        }
    }

    pub const fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            embedding: self.embedding_weight,
            text: self.text_weight,
            metadata: self.metadata_weight,
            statistical: self.statistical_weight,
        }
    }
}

/// Results file - everything needed to answer queries without recomputing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyArtifact {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_generated_at")]
    pub generated_at: DateTime<Local>,
    #[serde(alias = "anomaly_explanations")]
    pub explanations: ExplanationMap,
    pub fitted: bool,
    /// Absent in older files; loading then keeps the current configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactConfig>,
    /// Informational only, recomputed from `explanations` on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<AnomalyStatistics>,
}

impl AnomalyArtifact {
    pub fn new(explanations: ExplanationMap, fitted: bool, config: &DetectorConfig) -> Self {
        let statistics = AnomalyStatistics::compute(&explanations);
        Self {
            version: ARTIFACT_VERSION,
            generated_at: Local::now(),
            explanations,
            fitted,
            config: Some(ArtifactConfig::from_config(config)),
            statistics,
        }
    }

    /// Write the artifact as JSON through a temp file in the target directory,
    /// then rename it over `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        profiling::function_scope!();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| DetectorError::persistence("create directory for", path, e))?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| DetectorError::persistence("serialize", path, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| DetectorError::persistence("create temp file for", path, e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| DetectorError::persistence("write", path, e))?;
        tmp.persist(path)
            .map_err(|e| DetectorError::persistence("replace", path, e.error))?;

        tracing::info!(
            "Anomaly results saved to {} ({} explanations)",
            path.display(),
            self.explanations.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        profiling::function_scope!();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DetectorError::persistence("read", path, e))?;
        let artifact: Self = serde_json::from_str(&contents)
            .map_err(|e| DetectorError::persistence("parse", path, e))?;

        if artifact.version > ARTIFACT_VERSION {
            return Err(DetectorError::persistence(
                "load",
                path,
                format!(
                    "unsupported results version {} (newest known is {ARTIFACT_VERSION})",
                    artifact.version
                ),
            ));
        }
        if let Some(config) = &artifact.config {
            if !(config.contamination > 0.0 && config.contamination < 1.0) {
                return Err(DetectorError::persistence(
                    "load",
                    path,
                    format!("contamination {} is outside (0, 1)", config.contamination),
                ));
            }
            config
                .weights()
                .validate()
                .map_err(|e| DetectorError::persistence("load", path, e))?;
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::explain::{AnomalyExplanation, ComponentScores, Severity};

    fn sample_map() -> ExplanationMap {
        let mut map = ExplanationMap::new();
        map.insert(
            "vid-1".to_string(),
            AnomalyExplanation {
                final_score: 0.812_345_678_901_234_5,
                severity: Severity::High,
                component_scores: ComponentScores {
                    embedding: 0.1 + 0.2,
                    text: 0.35,
                    metadata: 1.0,
                    statistical: 0.0,
                },
                reasons: vec!["Event type indicates accident or collision".to_string()],
                is_anomaly: true,
                confidence: 1.0 / 3.0,
            },
        );
        map.insert(
            "vid-0".to_string(),
            AnomalyExplanation {
                final_score: 0.0,
                severity: Severity::Low,
                component_scores: ComponentScores::default(),
                reasons: Vec::new(),
                is_anomaly: false,
                confidence: 0.0,
            },
        );
        map
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("anomalies.json");
        let artifact = AnomalyArtifact::new(sample_map(), true, &DetectorConfig::default());

        artifact.save(&path).unwrap();
        let loaded = AnomalyArtifact::load(&path).unwrap();

        assert_eq!(loaded.explanations, artifact.explanations);
        assert_eq!(loaded.config, artifact.config);
        assert!(loaded.fitted);
        // insertion order survives
        let ids: Vec<_> = loaded.explanations.keys().cloned().collect();
        assert_eq!(ids, vec!["vid-1", "vid-0"]);
    }

    #[test]
    fn test_missing_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AnomalyArtifact::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(DetectorError::Persistence { .. })));
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"explanations\": {").unwrap();
        assert!(matches!(
            AnomalyArtifact::load(&path),
            Err(DetectorError::Persistence { .. })
        ));
    }

    #[test]
    fn test_minimal_artifact_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.json");
        std::fs::write(
            &path,
            r#"{
                "anomaly_explanations": {},
                "fitted": false,
                "config": {
                    "contamination": 0.1,
                    "embedding_weight": 0.4,
                    "text_weight": 0.35,
                    "metadata_weight": 0.15,
                    "statistical_weight": 0.1
                }
            }"#,
        )
        .unwrap();

        let artifact = AnomalyArtifact::load(&path).unwrap();
        assert_eq!(artifact.version, ARTIFACT_VERSION);
        assert!(artifact.explanations.is_empty());
        assert!(!artifact.fitted);
    }

    #[test]
    fn test_artifact_without_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(&path, r#"{"anomaly_explanations": {}, "fitted": true}"#).unwrap();

        let artifact = AnomalyArtifact::load(&path).unwrap();
        assert!(artifact.config.is_none());
        assert!(artifact.fitted);
    }

    #[test]
    fn test_out_of_range_stored_contamination_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let config = DetectorConfig::default();
        let mut artifact = AnomalyArtifact::new(sample_map(), true, &config);
        artifact.config = Some(ArtifactConfig {
            contamination: 1.5,
            ..ArtifactConfig::from_config(&config)
        });
        artifact.save(&path).unwrap();
        assert!(matches!(
            AnomalyArtifact::load(&path),
            Err(DetectorError::Persistence { .. })
        ));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.json");
        let mut artifact = AnomalyArtifact::new(sample_map(), true, &DetectorConfig::default());
        artifact.version = ARTIFACT_VERSION + 1;
        artifact.save(&path).unwrap();
        assert!(AnomalyArtifact::load(&path).is_err());
    }
}
