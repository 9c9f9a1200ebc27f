//! Bagged random forest and the single-tree CART model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::tree::{Criterion, DecisionTree, TreeParams};
use super::{Family, Model, Target, TrainingData};
use crate::cancel::CancelToken;
use crate::error::Result;

#[derive(Debug)]
pub(crate) struct RandomForest {
    trees: Vec<DecisionTree>,
    target: Target,
}

impl RandomForest {
    pub(crate) fn fit(
        data: &TrainingData,
        n_trees: usize,
        max_depth: usize,
        min_samples_leaf: usize,
        features_per_split: Option<usize>,
        seed: u64,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let n = data.len();
        let p = data.n_features();
        let features_per_split = features_per_split.or(Some(match data.target {
            Target::Classes(_) => ((p as f64).sqrt().ceil() as usize).max(1),
            Target::Continuous => (p / 3).max(1),
        }));
        let params = TreeParams { max_depth, min_samples_leaf, features_per_split };
        let criterion = data.criterion();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(n_trees);
        for _ in 0..n_trees {
            cancel.check()?;
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(DecisionTree::fit(&data.x, &data.y, &rows, criterion, params, &mut rng));
        }
        Ok(Self { trees, target: data.target.clone() })
    }
}

impl Model for RandomForest {
    fn family(&self) -> Family {
        Family::RandomForest
    }

    fn predict(&self, features: &[f64]) -> f64 {
        match &self.target {
            Target::Classes(classes) => {
                let mut votes = vec![0usize; classes.len()];
                for t in &self.trees {
                    votes[t.predict(features) as usize] += 1;
                }
                let mut best = 0;
                for (c, &v) in votes.iter().enumerate() {
                    if v > votes[best] {
                        best = c;
                    }
                }
                classes[best] as f64
            }
            Target::Continuous => self.trees.iter().map(|t| t.predict(features)).sum::<f64>() / self.trees.len() as f64,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Cart {
    tree: DecisionTree,
    target: Target,
}

impl Cart {
    pub(crate) fn fit(data: &TrainingData, max_depth: usize, min_samples_leaf: usize) -> Result<Self> {
        let rows: Vec<usize> = (0..data.len()).collect();
        let params = TreeParams { max_depth, min_samples_leaf, features_per_split: None };
        // Every feature is scanned, so the RNG is never drawn from.
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::fit(&data.x, &data.y, &rows, data.criterion(), params, &mut rng);
        Ok(Self { tree, target: data.target.clone() })
    }
}

impl Model for Cart {
    fn family(&self) -> Family {
        Family::Cart
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let v = self.tree.predict(features);
        match &self.target {
            Target::Classes(classes) => classes[v as usize] as f64,
            Target::Continuous => v,
        }
    }
}
