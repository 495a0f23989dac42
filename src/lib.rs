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

//! Multi-signal anomaly scoring for dashcam event descriptions.
//!
//! Four independent signals (embedding outliers, anomaly keywords, metadata
//! rarity and numeric outliers) are blended into one calibrated score per
//! record, explained with human-readable reasons and kept in a queryable
//! store that can be persisted and reloaded.

pub mod anomaly;
pub mod config;
pub mod core;
pub mod dataset;
pub mod error;

pub use crate::anomaly::explain::{AnomalyExplanation, ComponentScores, Severity};
pub use crate::anomaly::SignalKind;
pub use crate::config::{DetectorConfig, ScoreWeights};
pub use crate::core::{DetectionReport, Detector, RankedAnomaly, StatisticsReport};
pub use crate::dataset::{EmbeddingMatrix, Record, RecordBatch};
pub use crate::error::{DetectorError, ExtractorError, Result};
