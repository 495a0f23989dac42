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

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Numeric cell as exported by spreadsheets: numbers, numeric strings, or junk
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Non-numeric cells become `None` instead of failing the whole file
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_number))
}

/// Keeps only the entries that coerce to a number
fn lenient_numeric_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .flatten()
        .filter_map(|(name, value)| coerce_number(&value).map(|v| (name, v)))
        .collect())
}

/// One dashcam event as described by the annotation pipeline.
///
/// Field aliases accept the hyphenated column names of the exported dataset
/// (`main-event`, `weather-conditions`, `Input tokens count`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(alias = "video-id", alias = "id")]
    pub video_id: String,

    #[serde(default, alias = "video-title")]
    pub title: Option<String>,
    #[serde(default, alias = "description-step-by-step")]
    pub description_step_by_step: Option<String>,
    #[serde(default, alias = "general-description")]
    pub general_description: Option<String>,
    #[serde(default)]
    pub interpretation: Option<String>,

    #[serde(default, alias = "main-event")]
    pub main_event: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default, alias = "light-conditions")]
    pub light_conditions: Option<String>,
    #[serde(default, alias = "weather-conditions")]
    pub weather_conditions: Option<String>,
    #[serde(default, alias = "road-conditions")]
    pub road_conditions: Option<String>,
    #[serde(default, alias = "recording-device")]
    pub recording_device: Option<String>,
    #[serde(default, alias = "video-quality")]
    pub video_quality: Option<String>,

    #[serde(default, alias = "Input tokens count", deserialize_with = "lenient_number")]
    pub input_tokens: Option<f64>,
    #[serde(default, alias = "Output tokens count", deserialize_with = "lenient_number")]
    pub output_tokens: Option<f64>,
    #[serde(default, alias = "Total tokens count", deserialize_with = "lenient_number")]
    pub total_tokens: Option<f64>,

    /// Measurements without a dedicated field
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "lenient_numeric_map"
    )]
    pub numeric: BTreeMap<String, f64>,
}

/// Categorical metadata columns considered by the rarity analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CategoricalField {
    MainEvent,
    Location,
    Zone,
    LightConditions,
    WeatherConditions,
    RoadConditions,
    RecordingDevice,
    VideoQuality,
}

impl CategoricalField {
    pub const ALL: [Self; 8] = [
        Self::MainEvent,
        Self::Location,
        Self::Zone,
        Self::LightConditions,
        Self::WeatherConditions,
        Self::RoadConditions,
        Self::RecordingDevice,
        Self::VideoQuality,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::MainEvent => "main-event",
            Self::Location => "location",
            Self::Zone => "zone",
            Self::LightConditions => "light-conditions",
            Self::WeatherConditions => "weather-conditions",
            Self::RoadConditions => "road-conditions",
            Self::RecordingDevice => "recording-device",
            Self::VideoQuality => "video-quality",
        }
    }
}

/// Treat blank strings the same as a missing value
fn present(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl Record {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            ..Self::default()
        }
    }

    /// Value of a categorical field, `None` when missing or blank
    pub fn categorical(&self, field: CategoricalField) -> Option<&str> {
        let value = match field {
            CategoricalField::MainEvent => &self.main_event,
            CategoricalField::Location => &self.location,
            CategoricalField::Zone => &self.zone,
            CategoricalField::LightConditions => &self.light_conditions,
            CategoricalField::WeatherConditions => &self.weather_conditions,
            CategoricalField::RoadConditions => &self.road_conditions,
            CategoricalField::RecordingDevice => &self.recording_device,
            CategoricalField::VideoQuality => &self.video_quality,
        };
        present(value.as_ref())
    }

    /// Interpretation text, empty when missing
    pub fn interpretation_text(&self) -> &str {
        self.interpretation.as_deref().unwrap_or_default()
    }

    /// Step-by-step description, empty when missing
    pub fn description_text(&self) -> &str {
        self.description_step_by_step.as_deref().unwrap_or_default()
    }

    /// All finite numeric measurements on this record, keyed by field name.
    ///
    /// Non-finite values are dropped so they never reach the batch statistics.
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let known = [
            ("Input tokens count", self.input_tokens),
            ("Output tokens count", self.output_tokens),
            ("Total tokens count", self.total_tokens),
        ];
        known
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .chain(self.numeric.iter().map(|(name, &v)| (name.as_str(), v)))
            .filter(|(_, v)| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyphenated_columns_deserialize() {
        let json = r#"{
            "video_id": "v-17",
            "main-event": "accident-collision",
            "weather-conditions": "rain",
            "description-step-by-step": "car brakes hard",
            "Input tokens count": 412.0
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.video_id, "v-17");
        assert_eq!(
            record.categorical(CategoricalField::MainEvent),
            Some("accident-collision")
        );
        assert_eq!(record.description_text(), "car brakes hard");
        assert_eq!(record.input_tokens, Some(412.0));
        assert_eq!(record.interpretation_text(), "");
    }

    #[test]
    fn test_non_numeric_cells_are_dropped() {
        let json = r#"{
            "video_id": "v-3",
            "Input tokens count": "n/a",
            "Output tokens count": " 128 ",
            "Total tokens count": null,
            "numeric": {"speed_kmh": "fast", "distance_m": 12.5, "lane": true}
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.input_tokens, None);
        assert_eq!(record.output_tokens, Some(128.0));
        assert_eq!(record.total_tokens, None);
        assert_eq!(record.numeric.len(), 1);
        assert_eq!(record.numeric.get("distance_m"), Some(&12.5));
    }

    #[test]
    fn test_blank_categorical_is_missing() {
        let mut record = Record::new("a");
        record.zone = Some("   ".to_string());
        record.location = Some(" urban ".to_string());
        assert_eq!(record.categorical(CategoricalField::Zone), None);
        assert_eq!(record.categorical(CategoricalField::Location), Some("urban"));
    }

    #[test]
    fn test_numeric_fields_skip_missing_and_non_finite() {
        let mut record = Record::new("a");
        record.total_tokens = Some(900.0);
        record.numeric.insert("speed_kmh".to_string(), 54.0);
        record.numeric.insert("broken".to_string(), f64::NAN);

        let fields: Vec<_> = record.numeric_fields().collect();
        assert_eq!(
            fields,
            vec![("Total tokens count", 900.0), ("speed_kmh", 54.0)]
        );
    }
}
