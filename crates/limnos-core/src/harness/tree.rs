//! Axis-aligned binary decision tree (CART).
//!
//! Classification trees split on Gini impurity and store the majority class
//! index in each leaf; regression trees split on squared error and store the
//! leaf mean. Forest and boosting models are built from these.

use rand::rngs::StdRng;
use rand::seq::index;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Criterion {
    Gini { n_classes: usize },
    Variance,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` considers all of them.
    pub features_per_split: Option<usize>,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct DecisionTree {
    nodes: Vec<Node>,
}

struct Builder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    criterion: Criterion,
    params: TreeParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Weighted child impurity; lower is better.
    score: f64,
}

impl DecisionTree {
    /// Fit on the rows listed in `rows` (repeats allowed, as in a bootstrap).
    pub(crate) fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        rows: &[usize],
        criterion: Criterion,
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut builder = Builder { x, y, criterion, params, rng, nodes: Vec::new() };
        let mut rows = rows.to_vec();
        builder.grow(&mut rows, 0);
        DecisionTree { nodes: builder.nodes }
    }

    pub(crate) fn predict(&self, features: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf(v) => return v,
                Node::Split { feature, threshold, left, right } => {
                    i = if features[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match nodes[i] {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf(self.leaf_value(rows)));

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf {
            return id;
        }
        let parent = self.impurity(rows);
        if parent < 1e-12 {
            return id;
        }
        let Some(split) = self.best_split(rows) else { return id };
        if parent - split.score < 1e-12 {
            return id;
        }

        let (feature, threshold) = (split.feature, split.threshold);
        let x = self.x;
        let mid = partition(rows, |&r| x[r][feature] <= threshold);
        let (l, r) = rows.split_at_mut(mid);
        let left = self.grow(l, depth + 1);
        let right = self.grow(r, depth + 1);
        self.nodes[id] = Node::Split { feature, threshold, left, right };
        id
    }

    fn leaf_value(&self, rows: &[usize]) -> f64 {
        match self.criterion {
            Criterion::Gini { n_classes } => {
                let counts = class_counts(self.y, rows, n_classes);
                // First maximum wins, so ties go to the lower class index.
                let mut best = 0;
                for (c, &n) in counts.iter().enumerate() {
                    if n > counts[best] {
                        best = c;
                    }
                }
                best as f64
            }
            Criterion::Variance => {
                if rows.is_empty() {
                    0.0
                } else {
                    rows.iter().map(|&r| self.y[r]).sum::<f64>() / rows.len() as f64
                }
            }
        }
    }

    /// Weighted impurity of the node: n · gini, or the sum of squared errors.
    fn impurity(&self, rows: &[usize]) -> f64 {
        match self.criterion {
            Criterion::Gini { n_classes } => {
                gini_weighted(&class_counts(self.y, rows, n_classes), rows.len())
            }
            Criterion::Variance => {
                let (s, ss) = rows.iter().fold((0.0, 0.0), |(s, ss), &r| (s + self.y[r], ss + self.y[r] * self.y[r]));
                sse(s, ss, rows.len())
            }
        }
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<SplitCandidate> {
        let n_features = self.x.first().map_or(0, Vec::len);
        let features: Vec<usize> = match self.params.features_per_split {
            Some(m) if m < n_features => {
                let mut f = index::sample(&mut *self.rng, n_features, m.max(1)).into_vec();
                f.sort_unstable();
                f
            }
            _ => (0..n_features).collect(),
        };

        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = rows.len();
        let mut best: Option<SplitCandidate> = None;
        let mut sorted = rows.to_vec();
        for feature in features {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut sweep = Sweep::new(self.criterion, self.y, &sorted);
            for i in 0..n - 1 {
                sweep.move_left(self.y[sorted[i]]);
                let n_left = i + 1;
                if n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }
                let (v, next) = (self.x[sorted[i]][feature], self.x[sorted[i + 1]][feature]);
                if v == next {
                    continue;
                }
                let score = sweep.score(n_left, n - n_left);
                if best.as_ref().map_or(true, |b| score < b.score) {
                    best = Some(SplitCandidate { feature, threshold: v + (next - v) / 2.0, score });
                }
            }
        }
        best
    }
}

/// Running left/right statistics while sweeping sorted rows.
enum Sweep {
    Gini { left: Vec<usize>, right: Vec<usize> },
    Variance { left: (f64, f64), right: (f64, f64) },
}

impl Sweep {
    fn new(criterion: Criterion, y: &[f64], rows: &[usize]) -> Self {
        match criterion {
            Criterion::Gini { n_classes } => {
                Sweep::Gini { left: vec![0; n_classes], right: class_counts(y, rows, n_classes) }
            }
            Criterion::Variance => {
                let total = rows.iter().fold((0.0, 0.0), |(s, ss), &r| (s + y[r], ss + y[r] * y[r]));
                Sweep::Variance { left: (0.0, 0.0), right: total }
            }
        }
    }

    fn move_left(&mut self, value: f64) {
        match self {
            Sweep::Gini { left, right } => {
                let c = value as usize;
                left[c] += 1;
                right[c] -= 1;
            }
            Sweep::Variance { left, right } => {
                left.0 += value;
                left.1 += value * value;
                right.0 -= value;
                right.1 -= value * value;
            }
        }
    }

    fn score(&self, n_left: usize, n_right: usize) -> f64 {
        match self {
            Sweep::Gini { left, right } => gini_weighted(left, n_left) + gini_weighted(right, n_right),
            Sweep::Variance { left, right } => sse(left.0, left.1, n_left) + sse(right.0, right.1, n_right),
        }
    }
}

fn class_counts(y: &[f64], rows: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0; n_classes];
    for &r in rows {
        counts[y[r] as usize] += 1;
    }
    counts
}

/// `n · (1 − Σ pᵢ²)`.
fn gini_weighted(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let sum_sq: f64 = counts.iter().map(|&c| (c as f64).powi(2)).sum();
    n - sum_sq / n
}

fn sse(sum: f64, sum_sq: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (sum_sq - sum * sum / n as f64).max(0.0)
}

/// Stable-enough in-place partition; returns the count of rows satisfying `pred`.
fn partition<F: Fn(&usize) -> bool>(rows: &mut [usize], pred: F) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if pred(&rows[i]) {
            rows.swap(i, mid);
            mid += 1;
        }
    }
    mid
}
