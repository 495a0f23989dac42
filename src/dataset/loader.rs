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

//! Loading records and embeddings from JSON exports.
//!
//! Records come as a JSON array or as JSON lines. Embeddings come either as a
//! bare array of rows or keyed by `video_ids`, in which case the records are
//! re-ordered to follow the embedding rows.

use crate::dataset::batch::{EmbeddingMatrix, RecordBatch};
use crate::dataset::record::Record;
use crate::error::{DetectorError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Embedding file layouts accepted by [`load_embeddings`]
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Rows(Vec<Vec<f64>>),
    Keyed {
        video_ids: Vec<String>,
        embeddings: Vec<Vec<f64>>,
    },
}

/// Embedding rows plus the record ids they belong to, if the file names them
#[derive(Debug)]
pub struct LoadedEmbeddings {
    pub video_ids: Option<Vec<String>>,
    pub matrix: EmbeddingMatrix,
}

/// Read records from a JSON array or a JSON-lines file
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    profiling::function_scope!();
    let contents =
        std::fs::read_to_string(path).map_err(|e| DetectorError::dataset(path, e))?;

    let records = if contents.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Record>>(&contents)
            .map_err(|e| DetectorError::dataset(path, e))?
    } else {
        let mut records = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str::<Record>(line).map_err(|e| {
                DetectorError::dataset(path, format!("line {}: {e}", line_no + 1))
            })?;
            records.push(record);
        }
        records
    };

    tracing::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Read an embedding matrix from JSON
pub fn load_embeddings(path: &Path) -> Result<LoadedEmbeddings> {
    profiling::function_scope!();
    let contents = std::fs::read(path).map_err(|e| DetectorError::dataset(path, e))?;
    let file: EmbeddingFile =
        serde_json::from_slice(&contents).map_err(|e| DetectorError::dataset(path, e))?;

    let (video_ids, rows) = match file {
        EmbeddingFile::Keyed {
            video_ids,
            embeddings,
        } => {
            if video_ids.len() != embeddings.len() {
                return Err(DetectorError::InputShape(format!(
                    "{} lists {} video ids for {} embedding rows",
                    path.display(),
                    video_ids.len(),
                    embeddings.len()
                )));
            }
            (Some(video_ids), embeddings)
        }
        EmbeddingFile::Rows(rows) => (None, rows),
    };

    let matrix = EmbeddingMatrix::from_rows(rows)?;
    tracing::info!(
        "Loaded {}x{} embedding matrix from {}",
        matrix.nrows(),
        matrix.dim(),
        path.display()
    );
    Ok(LoadedEmbeddings { video_ids, matrix })
}

/// Re-order records to follow `video_ids`, dropping records without an embedding
pub fn align_records(records: Vec<Record>, video_ids: &[String]) -> Result<Vec<Record>> {
    let mut by_id: HashMap<String, Record> = HashMap::with_capacity(records.len());
    for record in records {
        if by_id.contains_key(&record.video_id) {
            return Err(DetectorError::InputShape(format!(
                "duplicate record id '{}'",
                record.video_id
            )));
        }
        by_id.insert(record.video_id.clone(), record);
    }

    let aligned = video_ids
        .iter()
        .map(|id| {
            by_id.remove(id).ok_or_else(|| {
                DetectorError::InputShape(format!("no record found for embedded video '{id}'"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if !by_id.is_empty() {
        tracing::debug!("Dropped {} records without embeddings", by_id.len());
    }
    Ok(aligned)
}

/// Load both files and build a validated batch
pub fn load_batch(
    records_path: &Path,
    embeddings_path: &Path,
    expected_dim: Option<usize>,
) -> Result<RecordBatch> {
    let records = load_records(records_path)?;
    let LoadedEmbeddings { video_ids, matrix } = load_embeddings(embeddings_path)?;

    let records = match video_ids {
        Some(ids) => align_records(records, &ids)?,
        None => records,
    };

    RecordBatch::new(records, matrix, expected_dim)
}
