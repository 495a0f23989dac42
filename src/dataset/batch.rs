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

use crate::dataset::record::Record;
use crate::error::{DetectorError, Result};
use ndarray::{Array2, ArrayView2};
use std::collections::HashSet;

/// Dense N×D embedding matrix, one row per record
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Array2<f64>,
}

impl EmbeddingMatrix {
    pub const fn new(data: Array2<f64>) -> Self {
        Self { data }
    }

    /// Build a matrix from row vectors, all of which must share one length
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let dim = rows.first().map_or(0, Vec::len);

        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(DetectorError::InputShape(format!(
                "embedding row {idx} has dimension {}, expected {dim}",
                row.len()
            )));
        }

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((n, dim), flat)
            .map_err(|e| DetectorError::InputShape(e.to_string()))?;
        Ok(Self { data })
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }
}

/// A validated, index-aligned set of records and their embeddings.
///
/// Construction is the only place shape problems are detected, so everything
/// downstream of a `RecordBatch` can rely on `records[i]` owning row `i`.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    records: Vec<Record>,
    embeddings: EmbeddingMatrix,
}

impl RecordBatch {
    /// Validate and pair records with embeddings.
    ///
    /// `expected_dim` pins the embedding dimension when the deployment has
    /// one (3072 for the large embedding model).
    pub fn new(
        records: Vec<Record>,
        embeddings: EmbeddingMatrix,
        expected_dim: Option<usize>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(DetectorError::InputShape(
                "record batch is empty".to_string(),
            ));
        }

        if records.len() != embeddings.nrows() {
            return Err(DetectorError::InputShape(format!(
                "embedding count ({}) doesn't match record count ({})",
                embeddings.nrows(),
                records.len()
            )));
        }

        if let Some(expected) = expected_dim {
            if embeddings.dim() != expected {
                return Err(DetectorError::InputShape(format!(
                    "embedding dimension is {}, expected {expected}",
                    embeddings.dim()
                )));
            }
        }

        let mut seen = HashSet::with_capacity(records.len());
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.video_id.as_str())) {
            return Err(DetectorError::InputShape(format!(
                "duplicate record id '{}'",
                dup.video_id
            )));
        }

        Ok(Self {
            records,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub const fn embeddings(&self) -> &EmbeddingMatrix {
        &self.embeddings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(ids: &[&str]) -> Vec<Record> {
        ids.iter().map(|id| Record::new(*id)).collect()
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, DetectorError::InputShape(_)));
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let emb = EmbeddingMatrix::from_rows(vec![vec![0.0; 4]; 2]).unwrap();
        let err = RecordBatch::new(records(&["a", "b", "c"]), emb, None).unwrap_err();
        assert!(matches!(err, DetectorError::InputShape(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let emb = EmbeddingMatrix::from_rows(vec![vec![0.0; 4]; 2]).unwrap();
        let err = RecordBatch::new(records(&["a", "b"]), emb, Some(3072)).unwrap_err();
        assert!(matches!(err, DetectorError::InputShape(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let emb = EmbeddingMatrix::from_rows(vec![vec![0.0; 2]; 2]).unwrap();
        let err = RecordBatch::new(records(&["a", "a"]), emb, None).unwrap_err();
        assert!(matches!(err, DetectorError::InputShape(_)));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let emb = EmbeddingMatrix::from_rows(Vec::new()).unwrap();
        assert!(RecordBatch::new(Vec::new(), emb, None).is_err());
    }

    #[test]
    fn test_valid_batch() {
        let emb = EmbeddingMatrix::from_rows(vec![vec![0.5; 3]; 2]).unwrap();
        let batch = RecordBatch::new(records(&["a", "b"]), emb, Some(3)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.embeddings().dim(), 3);
    }
}
