//! Isolation forest outlier model
//!
//! Points that are easy to isolate with random axis-aligned splits sit on
//! short paths and score low. Scoring follows the usual convention:
//! `score_samples` in [-1, 0), `decision_function = score_samples - offset`
//! and `predict` returns -1 for negative decisions.

use super::params::TrainingParams;
use super::AnomalyModel;
use crate::error::{EngineError, Result};
use crate::models::FeatureMatrix;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful binary search tree lookup among `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
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

/// One isolation tree, nodes stored in a flat arena with the root at 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(rows: &[Vec<f64>], sample: &mut [usize], max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(rows, sample, 0, max_depth, rng);
        tree
    }

    fn grow_node(
        &mut self,
        rows: &[Vec<f64>],
        sample: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: sample.len() });

        if depth >= max_depth || sample.len() <= 1 {
            return id;
        }

        let n_features = rows[sample[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let (lo, hi) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(rows[i][f]), hi.max(rows[i][f]))
                });
                // a span that overflows cannot be sampled uniformly
                (hi > lo && (hi - lo).is_finite()).then_some((f, lo, hi))
            })
            .collect();

        // all sampled points identical, or no usable span
        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);

        let mut split = 0;
        for i in 0..sample.len() {
            if rows[sample[i]][feature] <= threshold {
                sample.swap(i, split);
                split += 1;
            }
        }

        let (left_sample, right_sample) = sample.split_at_mut(split);
        let left = self.grow_node(rows, left_sample, depth + 1, max_depth, rng);
        let right = self.grow_node(rows, right_sample, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Depth at which `x` lands plus the expected remaining depth of its leaf
    pub fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children come after their parent and splits stay within `n_features`
    fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(format!(
                        "node {} splits on feature {} of {}",
                        id, feature, n_features
                    ));
                }
                for child in [*left, *right] {
                    if child <= id || child >= self.nodes.len() {
                        return Err(format!("node {} has child {} out of range", id, child));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Trained isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: TrainingParams,
    feature_names: Vec<String>,
    max_samples: usize,
    offset: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Grow the forest and calibrate the decision offset on `matrix`
    pub(crate) fn fit(matrix: &FeatureMatrix, params: &TrainingParams) -> Result<Self> {
        let n = matrix.n_rows();
        let max_samples = params.max_samples.resolve(n)?;
        let max_depth = (max_samples.max(2) as f64).log2().ceil() as usize;

        let mut rng = StdRng::seed_from_u64(params.random_state);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| rng.gen()).collect();

        let rows = &matrix.rows;
        let trees: Vec<IsolationTree> = seeds
            .par_iter()
            .map(|&seed| {
                let mut tree_rng = StdRng::seed_from_u64(seed);
                let mut sample = index::sample(&mut tree_rng, n, max_samples).into_vec();
                IsolationTree::grow(rows, &mut sample, max_depth, &mut tree_rng)
            })
            .collect();

        let mut forest = Self {
            params: params.clone(),
            feature_names: matrix.feature_names.clone(),
            max_samples,
            offset: -0.5,
            trees,
        };

        let scores = forest.score_samples(matrix)?;
        forest.offset = crate::features::stats::percentile(&scores, 100.0 * params.contamination);
        Ok(forest)
    }

    fn check_width(&self, x: &FeatureMatrix) -> Result<()> {
        if x.n_features() != self.feature_names.len() {
            return Err(EngineError::InvalidInput(format!(
                "model expects {} features, got {}",
                self.feature_names.len(),
                x.n_features()
            )));
        }
        Ok(())
    }

    /// Raw anomaly score per row, lower is more anomalous
    pub fn score_samples(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.check_width(x)?;
        let norm = average_path_length(self.max_samples);
        Ok(x.rows
            .par_iter()
            .map(|row| {
                let total: f64 = self.trees.iter().map(|t| t.path_length(row)).sum();
                let mean_depth = total / self.trees.len() as f64;
                if norm > 0.0 {
                    -(2f64.powf(-mean_depth / norm))
                } else {
                    -1.0
                }
            })
            .collect())
    }

    /// Check the structure of a deserialized forest before it scores anything
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| EngineError::InvalidInput(format!("invalid model: {}", msg));
        if self.trees.is_empty() {
            return Err(invalid("forest has no trees".to_string()));
        }
        if self.feature_names.is_empty() {
            return Err(invalid("forest has no features".to_string()));
        }
        if !self.offset.is_finite() {
            return Err(invalid(format!("offset {} is not finite", self.offset)));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_names.len())
                .map_err(|msg| invalid(format!("tree {}: {}", i, msg)))?;
        }
        Ok(())
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn params(&self) -> &TrainingParams {
        &self.params
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Effective subsample size per tree
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }
}

impl AnomalyModel for IsolationForest {
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<i32>> {
        Ok(self
            .decision_function(x)?
            .into_iter()
            .map(|d| if d < 0.0 { -1 } else { 1 })
            .collect())
    }

    fn decision_function(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        Ok(self
            .score_samples(x)?
            .into_iter()
            .map(|s| s - self.offset)
            .collect())
    }

    fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    fn model_type(&self) -> &str {
        "IsolationForest"
    }
}
