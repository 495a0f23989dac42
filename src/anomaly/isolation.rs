//! Isolation forest over dense vectors, plus the column scaler fitted in front of it.

use crate::anomaly::percentile;
use crate::error::ExtractorError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Euler-Mascheroni constant, used in the average path length estimate
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Random feature draws tried before scanning for a non-constant feature
const QUICK_FEATURE_DRAWS: usize = 16;

/// Per-column standardization to zero mean and unit variance
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit on `x`. Zero-variance columns keep a scale of 1 and are only centered.
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let cols = x.ncols();
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(cols));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Self { mean, scale }
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }

    pub fn fit_transform(x: ArrayView2<'_, f64>) -> Array2<f64> {
        Self::fit(x).transform(x)
    }
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One randomly grown isolation tree, stored as a flat node arena
#[derive(Debug, Clone)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(
        x: ArrayView2<'_, f64>,
        rows: Vec<usize>,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(x, rows, 0, height_limit, rng);
        tree
    }

    fn feature_range(x: ArrayView2<'_, f64>, rows: &[usize], feature: usize) -> (f64, f64) {
        rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            let v = x[[r, feature]];
            (lo.min(v), hi.max(v))
        })
    }

    /// Pick a random feature that is not constant over `rows`
    fn pick_feature(
        x: ArrayView2<'_, f64>,
        rows: &[usize],
        rng: &mut StdRng,
    ) -> Option<(usize, f64, f64)> {
        let n_features = x.ncols();
        if n_features == 0 {
            return None;
        }

        for _ in 0..QUICK_FEATURE_DRAWS.min(n_features) {
            let feature = rng.gen_range(0..n_features);
            let (lo, hi) = Self::feature_range(x, rows, feature);
            if hi > lo {
                return Some((feature, lo, hi));
            }
        }

        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|feature| {
                let (lo, hi) = Self::feature_range(x, rows, feature);
                (hi > lo).then_some((feature, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            None
        } else {
            Some(candidates[rng.gen_range(0..candidates.len())])
        }
    }

    fn grow_node(
        &mut self,
        x: ArrayView2<'_, f64>,
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }
        let Some((feature, lo, hi)) = Self::pick_feature(x, &rows, rng) else {
            return id;
        };

        // threshold in [lo, hi) keeps both sides non-empty
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| x[[r, feature]] <= threshold);

        let left = self.grow_node(x, left_rows, depth + 1, height_limit, rng);
        let right = self.grow_node(x, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Depth at which `point` is isolated, corrected for unexpanded leaves
    fn path_length(&self, point: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if point[feature] <= threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(size),
            }
        }
    }
}

/// Ensemble of isolation trees.
///
/// Follows the usual formulation: `score_samples` is `-2^(-E[h(x)]/c(psi))`
/// (lower = more anomalous) and `decision_function` shifts it so the
/// contamination quantile of the training data sits at zero.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
    trees: Vec<IsolationTree>,
    subsample_size: usize,
    offset: f64,
}

impl IsolationForest {
    pub const fn new(
        n_estimators: usize,
        max_samples: usize,
        contamination: f64,
        seed: u64,
    ) -> Self {
        Self {
            n_estimators,
            max_samples,
            contamination,
            seed,
            trees: Vec::new(),
            subsample_size: 0,
            offset: -0.5,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Grow the forest on `x`. Trees are seeded from `seed + tree_index`, so
    /// the result does not depend on thread scheduling.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<(), ExtractorError> {
        profiling::function_scope!();
        let n = x.nrows();
        if n < 2 {
            return Err(ExtractorError::Degenerate(format!(
                "isolation forest needs at least 2 rows, got {n}"
            )));
        }
        if self.n_estimators == 0 {
            return Err(ExtractorError::Degenerate(
                "isolation forest needs at least one tree".to_string(),
            ));
        }

        let psi = self.max_samples.clamp(2, n);
        let height_limit = (psi as f64).log2().ceil() as usize;
        let seed = self.seed;

        self.trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(tree_idx as u64));
                let rows = rand::seq::index::sample(&mut rng, n, psi).into_vec();
                IsolationTree::grow(x, rows, height_limit, &mut rng)
            })
            .collect();
        self.subsample_size = psi;

        let training_scores = self.score_samples(x);
        self.offset = percentile(
            training_scores.as_slice().unwrap_or(&[]),
            100.0 * self.contamination,
        );
        tracing::debug!(
            "Forest fitted: {} trees, subsample {psi}, depth {height_limit}, offset {:.4}",
            self.trees.len(),
            self.offset
        );
        Ok(())
    }

    /// Raw anomaly score per row, in [-1, 0); lower means more anomalous
    pub fn score_samples(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let normalizer = average_path_length(self.subsample_size);
        if self.trees.is_empty() || normalizer <= 0.0 {
            return Array1::from_elem(x.nrows(), -0.5);
        }

        let tree_count = self.trees.len() as f64;
        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|r| {
                let point = x.row(r);
                let mean_depth =
                    self.trees.iter().map(|t| t.path_length(point)).sum::<f64>() / tree_count;
                -(2f64).powf(-mean_depth / normalizer)
            })
            .collect();
        Array1::from(scores)
    }

    /// Shifted score; negative values fall inside the contamination fraction
    pub fn decision_function(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        self.score_samples(x) - self.offset
    }
}
