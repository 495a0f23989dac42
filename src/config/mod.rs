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

use crate::anomaly::SignalKind;
use crate::error::{DetectorError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Allowed drift of the weight sum away from 1.0 before we warn
const WEIGHT_SUM_TOLERANCE: f64 = 0.05;

/// Weights used to blend the four component scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub embedding: f64,
    pub text: f64,
    pub metadata: f64,
    pub statistical: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            embedding: 0.4,
            text: 0.35,
            metadata: 0.15,
            statistical: 0.1,
        }
    }
}

impl ScoreWeights {
    pub const fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Embedding => self.embedding,
            SignalKind::Text => self.text,
            SignalKind::Metadata => self.metadata,
            SignalKind::Statistical => self.statistical,
        }
    }

    pub fn sum(&self) -> f64 {
        SignalKind::ALL.iter().map(|&k| self.get(k)).sum()
    }

    pub fn validate(&self) -> Result<()> {
        for kind in SignalKind::ALL {
            let w = self.get(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(DetectorError::InvalidConfig(format!(
                    "{kind} weight must be a non-negative number, got {w}"
                )));
            }
        }

        let sum = self.sum();
        if sum <= 0.0 {
            return Err(DetectorError::InvalidConfig(
                "at least one signal weight must be positive".to_string(),
            ));
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            tracing::warn!("Signal weights sum to {sum:.3}, expected roughly 1.0");
        }
        Ok(())
    }
}

/// A location/event pairing that is unusual enough to score on sight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusualCombination {
    /// Substring matched against the lower-cased location
    pub location: String,
    /// Substring matched against the lower-cased main event
    pub event: String,
}

impl UnusualCombination {
    fn new(location: &str, event: &str) -> Self {
        Self {
            location: location.to_string(),
            event: event.to_string(),
        }
    }
}

/// Detector configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Expected fraction of anomalous records, in (0, 1)
    pub contamination: f64,
    /// Number of isolation trees
    pub n_estimators: usize,
    /// Rows sampled per tree (capped at the batch size)
    pub max_samples: usize,
    pub random_seed: u64,
    /// Embedding dimension every batch must have, if pinned
    pub embedding_dimension: Option<usize>,
    pub weights: ScoreWeights,
    /// Exponent applied to the blended score before normalization
    pub calibration_exponent: f64,
    /// Keyword to weight, matched as lower-case substrings
    pub anomaly_keywords: IndexMap<String, f64>,
    /// Phrases in an interpretation that mark it as routine
    pub normal_indicators: Vec<String>,
    pub adverse_weather: Vec<String>,
    pub dark_lighting: Vec<String>,
    pub unusual_combinations: Vec<UnusualCombination>,
}

fn default_keywords() -> IndexMap<String, f64> {
    [
        // Critical incidents
        ("accident", 1.0),
        ("collision", 1.0),
        ("crash", 1.0),
        ("emergency", 0.9),
        ("severe", 0.8),
        ("critical", 0.8),
        ("dangerous", 0.8),
        ("fatal", 1.0),
        // Traffic violations
        ("violation", 0.6),
        ("illegal", 0.7),
        ("wrong", 0.5),
        ("speeding", 0.6),
        ("reckless", 0.7),
        ("aggressive", 0.6),
        // Unusual behaviour
        ("unusual", 0.4),
        ("strange", 0.4),
        ("unexpected", 0.4),
        ("odd", 0.3),
        ("bizarre", 0.5),
        ("erratic", 0.6),
        // Weather and visibility
        ("visibility", 0.3),
        ("fog", 0.3),
        ("rain", 0.2),
        ("snow", 0.3),
        ("storm", 0.5),
        ("flooding", 0.7),
        // Obstructions
        ("obstruction", 0.5),
        ("debris", 0.4),
        ("obstacle", 0.4),
        ("construction", 0.2),
        ("roadwork", 0.2),
    ]
    .into_iter()
    .map(|(k, w)| (k.to_string(), w))
    .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 200,
            max_samples: 256,
            random_seed: 42,
            embedding_dimension: None,
            weights: ScoreWeights::default(),
            calibration_exponent: 1.2,
            anomaly_keywords: default_keywords(),
            normal_indicators: strings(&[
                "no anomalies observed",
                "normal driving",
                "routine",
                "typical",
                "standard",
                "usual",
                "regular",
                "common",
                "expected",
            ]),
            adverse_weather: strings(&["rain", "snow", "storm", "fog"]),
            dark_lighting: strings(&["dark", "bright-glare"]),
            unusual_combinations: vec![
                UnusualCombination::new("parking-lot", "highway"),
                UnusualCombination::new("intersection", "parking"),
                UnusualCombination::new("rural", "traffic-lights"),
            ],
        }
    }
}

impl DetectorConfig {
    /// Check every externally supplied value before the detector uses it
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "contamination must be in (0, 1), got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 {
            return Err(DetectorError::InvalidConfig(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if self.max_samples < 2 {
            return Err(DetectorError::InvalidConfig(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if self.embedding_dimension == Some(0) {
            return Err(DetectorError::InvalidConfig(
                "embedding_dimension must be positive".to_string(),
            ));
        }
        if !self.calibration_exponent.is_finite() || self.calibration_exponent <= 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "calibration_exponent must be positive, got {}",
                self.calibration_exponent
            )));
        }
        if let Some((keyword, weight)) = self
            .anomaly_keywords
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(DetectorError::InvalidConfig(format!(
                "keyword '{keyword}' has invalid weight {weight}"
            )));
        }
        self.weights.validate()
    }

    /// Get the path to the default config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dashcrab").join("detector.json"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DetectorError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| DetectorError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::info!(
            "Loaded detector config from {} ({} keywords, {} normal indicators)",
            path.display(),
            config.anomaly_keywords.len(),
            config.normal_indicators.len()
        );
        Ok(config)
    }

    /// Load the config at `path` or the default location, falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::info!("No detector config found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save config to disk as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DetectorError::persistence("create directory for", path, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DetectorError::persistence("serialize", path, e))?;
        std::fs::write(path, json).map_err(|e| DetectorError::persistence("write", path, e))?;
        tracing::info!("Saved detector config to {}", path.display());
        Ok(())
    }
}
