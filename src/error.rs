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

//! Error types shared by the detector, the store and the dataset loaders.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T, E = DetectorError> = std::result::Result<T, E>;

/// Errors that abort a detector operation
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Record batch and embedding matrix do not line up
    #[error("input shape mismatch: {0}")]
    InputShape(String),

    /// A query was made before any detection run or successful load
    #[error("anomaly detector is not fitted; run a detection or load saved results first")]
    NotFitted,

    /// Reading or writing the results artifact failed
    #[error("failed to {action} {}: {reason}", path.display())]
    Persistence {
        action: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Configuration values out of their allowed range
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),

    /// A record or embedding input file could not be read or parsed
    #[error("failed to read dataset {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },
}

impl DetectorError {
    pub fn persistence(action: &'static str, path: &Path, reason: impl ToString) -> Self {
        Self::Persistence {
            action,
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn dataset(path: &Path, reason: impl ToString) -> Self {
        Self::Dataset {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Why a signal extractor fell back to an all-zero score vector.
///
/// Degradations never abort a detection run. They are logged and reported
/// back through `DetectionReport` so callers can tell a quiet signal from a
/// broken one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractorError {
    #[error("non-finite input value at row {row}, column {column}")]
    NonFiniteInput { row: usize, column: usize },

    #[error("extractor produced {actual} scores for {expected} records")]
    ScoreCountMismatch { expected: usize, actual: usize },

    #[error("extractor produced a non-finite score for record {index}")]
    NonFiniteScore { index: usize },

    #[error("degenerate input: {0}")]
    Degenerate(String),
}
