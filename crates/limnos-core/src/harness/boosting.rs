//! Gradient-boosted regression trees: squared-error boosting for continuous
//! targets, one tree per class per round with a softmax link for classes.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

use super::tree::{Criterion, DecisionTree, TreeParams};
use super::{Family, Model, Target, TrainingData};
use crate::cancel::CancelToken;
use crate::error::Result;

#[derive(Debug)]
pub(crate) struct GradientBoostedTrees {
    init: Vec<f64>,
    /// `rounds[r][k]`: the tree for output `k` in round `r`.
    rounds: Vec<Vec<DecisionTree>>,
    learning_rate: f64,
    target: Target,
}

impl GradientBoostedTrees {
    pub(crate) fn fit(
        data: &TrainingData,
        n_trees: usize,
        learning_rate: f64,
        max_depth: usize,
        subsample: f64,
        seed: u64,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let n = data.len();
        let outputs = match &data.target {
            Target::Classes(c) => c.len(),
            Target::Continuous => 1,
        };
        let init: Vec<f64> = match &data.target {
            Target::Classes(_) => {
                // Log class priors.
                let mut counts = vec![0usize; outputs];
                for &y in &data.y {
                    counts[y as usize] += 1;
                }
                counts.iter().map(|&c| ((c.max(1)) as f64 / n as f64).ln()).collect()
            }
            Target::Continuous => vec![data.y.iter().sum::<f64>() / n as f64],
        };

        let params = TreeParams { max_depth, min_samples_leaf: 1, features_per_split: None };
        let n_sub = ((n as f64 * subsample).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scores: Vec<Vec<f64>> = vec![init.clone(); n];
        let mut rounds = Vec::with_capacity(n_trees);
        let mut residual = vec![0.0; n];

        for _ in 0..n_trees {
            cancel.check()?;
            let rows = if n_sub < n { index::sample(&mut rng, n, n_sub).into_vec() } else { (0..n).collect() };
            let probs: Vec<Vec<f64>> = match data.target {
                Target::Classes(_) => scores.iter().map(|s| softmax(s)).collect(),
                Target::Continuous => Vec::new(),
            };
            let mut round = Vec::with_capacity(outputs);
            for k in 0..outputs {
                for i in 0..n {
                    residual[i] = match data.target {
                        Target::Classes(_) => (data.y[i] as usize == k) as u8 as f64 - probs[i][k],
                        Target::Continuous => data.y[i] - scores[i][0],
                    };
                }
                let tree = DecisionTree::fit(&data.x, &residual, &rows, Criterion::Variance, params, &mut rng);
                for i in 0..n {
                    scores[i][k] += learning_rate * tree.predict(&data.x[i]);
                }
                round.push(tree);
            }
            rounds.push(round);
        }
        Ok(Self { init, rounds, learning_rate, target: data.target.clone() })
    }

    fn raw_scores(&self, features: &[f64]) -> Vec<f64> {
        let mut s = self.init.clone();
        for round in &self.rounds {
            for (k, tree) in round.iter().enumerate() {
                s[k] += self.learning_rate * tree.predict(features);
            }
        }
        s
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

impl Model for GradientBoostedTrees {
    fn family(&self) -> Family {
        Family::GradientBoostedTrees
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let s = self.raw_scores(features);
        match &self.target {
            Target::Classes(classes) => {
                let mut best = 0;
                for k in 1..s.len() {
                    if s[k] > s[best] {
                        best = k;
                    }
                }
                classes[best] as f64
            }
            Target::Continuous => s[0],
        }
    }
}
