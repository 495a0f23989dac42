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

use crate::anomaly::explain::{AnomalyExplanation, Severity};
use crate::anomaly::percentile;
use arc_swap::ArcSwapOption;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Explanations of one detection run, keyed by video id in batch order
pub type ExplanationMap = IndexMap<String, AnomalyExplanation>;

/// One entry of a ranked anomaly listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedAnomaly {
    pub video_id: String,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Aggregate view over all stored explanations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyStatistics {
    #[serde(rename = "total_videos")]
    pub total: usize,
    #[serde(rename = "high_anomalies")]
    pub high: usize,
    #[serde(rename = "medium_anomalies")]
    pub medium: usize,
    #[serde(rename = "low_anomalies")]
    pub low: usize,
    #[serde(rename = "mean_score")]
    pub mean: f64,
    #[serde(rename = "median_score")]
    pub median: f64,
    #[serde(rename = "max_score")]
    pub max: f64,
    #[serde(rename = "min_score")]
    pub min: f64,
    /// Population standard deviation of the final scores
    #[serde(rename = "std_score")]
    pub std: f64,
    /// Share of records with `is_anomaly` set
    pub anomaly_rate: f64,
}

impl AnomalyStatistics {
    /// `None` for an empty map
    pub fn compute(explanations: &ExplanationMap) -> Option<Self> {
        if explanations.is_empty() {
            return None;
        }
        let total = explanations.len();
        let scores: Vec<f64> = explanations.values().map(|e| e.final_score).collect();
        let count = |severity| {
            explanations
                .values()
                .filter(|e| e.severity == severity)
                .count()
        };

        let n = total as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            total,
            high: count(Severity::High),
            medium: count(Severity::Medium),
            low: count(Severity::Low),
            mean,
            median: percentile(&scores, 50.0),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            std: variance.sqrt(),
            anomaly_rate: explanations.values().filter(|e| e.is_anomaly).count() as f64 / n,
        })
    }
}

/// Statistics, or an explicit marker that nothing has been scored yet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatisticsReport {
    NoData { error: String },
    Summary(AnomalyStatistics),
}

impl StatisticsReport {
    fn no_data() -> Self {
        Self::NoData {
            error: "No anomaly analysis available".to_string(),
        }
    }

    pub const fn summary(&self) -> Option<&AnomalyStatistics> {
        match self {
            Self::Summary(stats) => Some(stats),
            Self::NoData { .. } => None,
        }
    }
}

/// Holds the explanations of the latest run.
///
/// Contents are only ever replaced as a whole, so readers see either the
/// previous run or the new one, never a mix.
#[derive(Debug, Default)]
pub struct AnomalyStore {
    snapshot: ArcSwapOption<ExplanationMap>,
}

impl AnomalyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the store contents with a fully built map
    pub fn record(&self, explanations: ExplanationMap) {
        tracing::debug!("Storing {} explanations", explanations.len());
        self.snapshot.store(Some(Arc::new(explanations)));
    }

    /// The current map, shared with the store
    pub fn snapshot(&self) -> Option<Arc<ExplanationMap>> {
        self.snapshot.load_full()
    }

    pub fn get(&self, video_id: &str) -> Option<AnomalyExplanation> {
        let guard = self.snapshot.load();
        (*guard).as_ref().and_then(|map| map.get(video_id).cloned())
    }

    pub fn len(&self) -> usize {
        let guard = self.snapshot.load();
        (*guard).as_ref().map_or(0, |map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest scoring records with `final_score >= min_score`, equal scores
    /// keep batch order
    pub fn top(&self, limit: usize, min_score: f64) -> Vec<RankedAnomaly> {
        profiling::function_scope!();
        let guard = self.snapshot.load();
        let Some(map) = (*guard).as_ref() else {
            return Vec::new();
        };

        let mut ranked: Vec<(&String, &AnomalyExplanation)> = map
            .iter()
            .filter(|(_, e)| e.final_score >= min_score)
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.1.final_score.total_cmp(&a.1.final_score));

        ranked
            .into_iter()
            .take(limit)
            .map(|(id, e)| RankedAnomaly {
                video_id: id.clone(),
                score: e.final_score,
                reasons: e.reasons.clone(),
            })
            .collect()
    }

    pub fn statistics(&self) -> StatisticsReport {
        let guard = self.snapshot.load();
        (*guard)
            .as_ref()
            .and_then(|map| AnomalyStatistics::compute(map))
            .map_or_else(StatisticsReport::no_data, StatisticsReport::Summary)
    }
}
