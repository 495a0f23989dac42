use crate::anomaly::{SignalKind, SignalScores};
use crate::config::DetectorConfig;
use crate::dataset::{CategoricalField, Record, RecordBatch};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

const EMBEDDING_REASON_MIN: f64 = 0.3;
const TEXT_REASON_MIN: f64 = 0.3;
const METADATA_REASON_MIN: f64 = 0.3;
const COMBINATION_REASON_MIN: f64 = 0.5;
const STATISTICAL_REASON_MIN: f64 = 0.2;
const MAX_LISTED_KEYWORDS: usize = 3;

/// Number of reasons that corresponds to full confidence
const CONFIDENT_REASONS: f64 = 3.0;
/// Final score above which a record counts as an anomaly
pub const ANOMALY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            Self::High
        } else if score > 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        };
        f.write_str(label)
    }
}

/// Per-signal breakdown of one record's score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub embedding: f64,
    pub text: f64,
    pub metadata: f64,
    pub statistical: f64,
}

impl ComponentScores {
    pub const fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Embedding => self.embedding,
            SignalKind::Text => self.text,
            SignalKind::Metadata => self.metadata,
            SignalKind::Statistical => self.statistical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyExplanation {
    pub final_score: f64,
    pub severity: Severity,
    pub component_scores: ComponentScores,
    /// Ordered embedding, text, metadata, statistical
    pub reasons: Vec<String>,
    pub is_anomaly: bool,
    pub confidence: f64,
}

/// Turns component scores into severity, confidence and readable reasons
#[derive(Debug, Clone)]
pub struct ExplanationGenerator {
    /// Lower-cased, in keyword table order
    keywords: Vec<String>,
    adverse_weather: Vec<String>,
}

impl ExplanationGenerator {
    pub fn new(keywords: Vec<String>, adverse_weather: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            adverse_weather: adverse_weather
                .into_iter()
                .map(|w| w.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.anomaly_keywords.keys().cloned().collect(),
            config.adverse_weather.clone(),
        )
    }

    fn text_reason(&self, record: &Record, score: f64) -> String {
        let interpretation = record.interpretation_text().to_lowercase();
        let matched: Vec<&str> = self
            .keywords
            .iter()
            .filter(|k| interpretation.contains(k.as_str()))
            .take(MAX_LISTED_KEYWORDS)
            .map(String::as_str)
            .collect();

        if matched.is_empty() {
            format!("Text analysis indicates unusual content (score: {score:.3})")
        } else {
            format!("Anomaly keywords detected: {}", matched.join(", "))
        }
    }

    fn metadata_reasons(&self, record: &Record, score: f64, reasons: &mut Vec<String>) {
        let event = record
            .categorical(CategoricalField::MainEvent)
            .map(str::to_lowercase)
            .unwrap_or_default();
        if event.contains("accident") {
            reasons.push("Event type indicates accident or collision".to_string());
        }
        if event.contains("abrupt") {
            reasons.push("Event involves abrupt driving behavior".to_string());
        }

        if let Some(weather) = record.categorical(CategoricalField::WeatherConditions) {
            if self.adverse_weather.contains(&weather.to_lowercase()) {
                reasons.push(format!("Adverse weather conditions: {weather}"));
            }
        }

        if score > COMBINATION_REASON_MIN {
            reasons.push(format!(
                "Unusual metadata combination detected (score: {score:.3})"
            ));
        }
    }

    pub fn explain(
        &self,
        record: &Record,
        components: ComponentScores,
        final_score: f64,
    ) -> AnomalyExplanation {
        let mut reasons = Vec::new();

        if components.embedding > EMBEDDING_REASON_MIN {
            reasons.push(format!(
                "Embedding analysis shows high dissimilarity to normal patterns (score: {:.3})",
                components.embedding
            ));
        }
        if components.text > TEXT_REASON_MIN {
            reasons.push(self.text_reason(record, components.text));
        }
        if components.metadata > METADATA_REASON_MIN {
            self.metadata_reasons(record, components.metadata, &mut reasons);
        }
        if components.statistical > STATISTICAL_REASON_MIN {
            reasons.push(format!(
                "Statistical outlier in numerical features (score: {:.3})",
                components.statistical
            ));
        }

        let confidence = (reasons.len() as f64 / CONFIDENT_REASONS).min(1.0);
        AnomalyExplanation {
            final_score,
            severity: Severity::from_score(final_score),
            component_scores: components,
            reasons,
            is_anomaly: final_score > ANOMALY_THRESHOLD,
            confidence,
        }
    }

    /// Explain every record, keyed by video id in batch order
    pub fn explain_batch(
        &self,
        batch: &RecordBatch,
        signals: &SignalScores,
        final_scores: &[f64],
    ) -> IndexMap<String, AnomalyExplanation> {
        profiling::function_scope!();
        batch
            .records()
            .iter()
            .enumerate()
            .zip(final_scores)
            .map(|((i, record), &final_score)| {
                let components = ComponentScores {
                    embedding: signals.embedding.scores[i],
                    text: signals.text.scores[i],
                    metadata: signals.metadata.scores[i],
                    statistical: signals.statistical.scores[i],
                };
                (
                    record.video_id.clone(),
                    self.explain(record, components, final_score),
                )
            })
            .collect()
    }
}
