use crate::anomaly::scorer::SignalExtractor;
use crate::anomaly::SignalKind;
use crate::config::{DetectorConfig, UnusualCombination};
use crate::dataset::{CategoricalField, Record, RecordBatch};
use crate::error::ExtractorError;
use rayon::prelude::*;
use std::collections::HashMap;

const RARE_FREQUENCY: f64 = 0.05;
const VERY_RARE_FREQUENCY: f64 = 0.01;
const RARE_BONUS: f64 = 0.3;
const VERY_RARE_BONUS: f64 = 0.5;

const ACCIDENT_BONUS: f64 = 0.6;
const ABRUPT_BONUS: f64 = 0.4;
const WEATHER_BONUS: f64 = 0.2;
const LIGHTING_BONUS: f64 = 0.1;
const QUALITY_BONUS: f64 = 0.2;
const COMBINATION_BONUS: f64 = 0.3;

/// Empirical value frequencies of every categorical field in a batch
#[derive(Debug, Default)]
pub struct FieldFrequencies {
    /// Per field: value counts and number of records with the field present
    fields: HashMap<CategoricalField, (HashMap<String, usize>, usize)>,
}

impl FieldFrequencies {
    pub fn from_records(records: &[Record]) -> Self {
        let mut fields: HashMap<CategoricalField, (HashMap<String, usize>, usize)> =
            HashMap::new();
        for record in records {
            for field in CategoricalField::ALL {
                if let Some(value) = record.categorical(field) {
                    let (counts, present) = fields.entry(field).or_default();
                    *counts.entry(value.to_string()).or_insert(0) += 1;
                    *present += 1;
                }
            }
        }
        Self { fields }
    }

    /// Share of records (with the field present) carrying `value`
    pub fn frequency(&self, field: CategoricalField, value: &str) -> f64 {
        self.fields
            .get(&field)
            .filter(|(_, present)| *present > 0)
            .map_or(0.0, |(counts, present)| {
                counts.get(value).copied().unwrap_or(0) as f64 / *present as f64
            })
    }
}

/// Bonus for one field value; the rarest tier wins, tiers never stack
fn rarity_bonus(frequency: f64) -> f64 {
    if frequency < VERY_RARE_FREQUENCY {
        VERY_RARE_BONUS
    } else if frequency < RARE_FREQUENCY {
        RARE_BONUS
    } else {
        0.0
    }
}

/// Scores records with rare metadata values and known dangerous conditions
#[derive(Debug, Clone)]
pub struct MetadataRarityExtractor {
    adverse_weather: Vec<String>,
    dark_lighting: Vec<String>,
    unusual_combinations: Vec<UnusualCombination>,
}

impl MetadataRarityExtractor {
    pub fn new(
        adverse_weather: Vec<String>,
        dark_lighting: Vec<String>,
        unusual_combinations: Vec<UnusualCombination>,
    ) -> Self {
        let lower = |items: Vec<String>| -> Vec<String> {
            items.into_iter().map(|s| s.to_lowercase()).collect()
        };
        Self {
            adverse_weather: lower(adverse_weather),
            dark_lighting: lower(dark_lighting),
            unusual_combinations: unusual_combinations
                .into_iter()
                .map(|c| UnusualCombination {
                    location: c.location.to_lowercase(),
                    event: c.event.to_lowercase(),
                })
                .collect(),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.adverse_weather.clone(),
            config.dark_lighting.clone(),
            config.unusual_combinations.clone(),
        )
    }

    /// Frequency-independent bonuses for inherently risky metadata
    fn heuristic_bonus(&self, record: &Record) -> f64 {
        let lower = |field| {
            record
                .categorical(field)
                .map(str::to_lowercase)
                .unwrap_or_default()
        };
        let event = lower(CategoricalField::MainEvent);
        let location = lower(CategoricalField::Location);
        let weather = lower(CategoricalField::WeatherConditions);
        let light = lower(CategoricalField::LightConditions);
        let quality = lower(CategoricalField::VideoQuality);

        let mut score = 0.0;
        if event.contains("accident") {
            score += ACCIDENT_BONUS;
        }
        if event.contains("abrupt") {
            score += ABRUPT_BONUS;
        }
        if self.adverse_weather.contains(&weather) {
            score += WEATHER_BONUS;
        }
        if self.dark_lighting.contains(&light) {
            score += LIGHTING_BONUS;
        }
        if quality.contains("corrupted") || quality.contains("low") {
            score += QUALITY_BONUS;
        }
        for combo in &self.unusual_combinations {
            if location.contains(combo.location.as_str()) && event.contains(combo.event.as_str()) {
                score += COMBINATION_BONUS;
            }
        }
        score
    }

    pub fn score_record(&self, record: &Record, frequencies: &FieldFrequencies) -> f64 {
        let rarity: f64 = CategoricalField::ALL
            .iter()
            .filter_map(|&field| {
                record
                    .categorical(field)
                    .map(|value| rarity_bonus(frequencies.frequency(field, value)))
            })
            .sum();

        (rarity + self.heuristic_bonus(record)).min(1.0)
    }
}

impl SignalExtractor for MetadataRarityExtractor {
    fn kind(&self) -> SignalKind {
        SignalKind::Metadata
    }

    fn extract(&self, batch: &RecordBatch) -> Result<Vec<f64>, ExtractorError> {
        profiling::function_scope!();
        let frequencies = FieldFrequencies::from_records(batch.records());
        let scores: Vec<f64> = batch
            .records()
            .par_iter()
            .map(|r| self.score_record(r, &frequencies))
            .collect();

        tracing::info!(
            "Metadata anomalies detected: {}",
            scores.iter().filter(|&&s| s > 0.3).count()
        );
        Ok(scores)
    }
}
