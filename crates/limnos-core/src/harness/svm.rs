//! Linear support-vector models trained by Pegasos stochastic sub-gradient
//! descent on standardised features.
//!
//! Classes use one-vs-rest hinge loss; continuous targets use the
//! ε-insensitive loss on a standardised target. Weights are averaged over the
//! second half of the iterations.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Family, Model, Target, TrainingData};
use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};

#[derive(Debug)]
pub(crate) struct LinearSvm {
    mean: Vec<f64>,
    scale: Vec<f64>,
    /// One weight vector per class (or one for regression); last entry is the bias.
    weights: Vec<Vec<f64>>,
    y_mean: f64,
    y_scale: f64,
    target: Target,
}

impl LinearSvm {
    pub(crate) fn fit(data: &TrainingData, c: f64, epochs: usize, epsilon: f64, seed: u64, cancel: &CancelToken) -> Result<Self> {
        let (mean, scale) = standardisation(&data.x);
        let xs: Vec<Vec<f64>> = data.x.iter().map(|row| augment(row, &mean, &scale)).collect();
        let n = xs.len();
        let lambda = 1.0 / (c * n as f64);
        let mut rng = StdRng::seed_from_u64(seed);

        let (weights, y_mean, y_scale) = match &data.target {
            Target::Classes(classes) => {
                let mut weights = Vec::with_capacity(classes.len());
                for k in 0..classes.len() {
                    let signs: Vec<f64> = data.y.iter().map(|&y| if y as usize == k { 1.0 } else { -1.0 }).collect();
                    weights.push(pegasos(&xs, &signs, Loss::Hinge, lambda, epochs, &mut rng, cancel)?);
                }
                (weights, 0.0, 1.0)
            }
            Target::Continuous => {
                let y_mean = data.y.iter().sum::<f64>() / n as f64;
                let var = data.y.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n as f64;
                let y_scale = if var > 1e-24 { var.sqrt() } else { 1.0 };
                let ys: Vec<f64> = data.y.iter().map(|y| (y - y_mean) / y_scale).collect();
                let w = pegasos(&xs, &ys, Loss::EpsilonInsensitive(epsilon), lambda, epochs, &mut rng, cancel)?;
                (vec![w], y_mean, y_scale)
            }
        };

        if weights.iter().flatten().any(|w| !w.is_finite()) {
            return Err(AnalysisError::ModelTraining {
                model: "svm".into(),
                reason: "weights diverged to non-finite values".into(),
            });
        }
        Ok(Self { mean, scale, weights, y_mean, y_scale, target: data.target.clone() })
    }
}

#[derive(Debug, Clone, Copy)]
enum Loss {
    Hinge,
    EpsilonInsensitive(f64),
}

/// Per-feature mean and standard deviation; constant features get scale 1.
fn standardisation(x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let n = x.len() as f64;
    let p = x.first().map_or(0, Vec::len);
    let mut mean = vec![0.0; p];
    for row in x {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v / n;
        }
    }
    let mut scale = vec![0.0; p];
    for row in x {
        for ((s, v), m) in scale.iter_mut().zip(row).zip(&mean) {
            *s += (v - m).powi(2) / n;
        }
    }
    for s in &mut scale {
        *s = if *s > 1e-24 { s.sqrt() } else { 1.0 };
    }
    (mean, scale)
}

fn augment(row: &[f64], mean: &[f64], scale: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = row.iter().zip(mean).zip(scale).map(|((v, m), s)| (v - m) / s).collect();
    out.push(1.0);
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn pegasos(
    xs: &[Vec<f64>],
    ys: &[f64],
    loss: Loss,
    lambda: f64,
    epochs: usize,
    rng: &mut StdRng,
    cancel: &CancelToken,
) -> Result<Vec<f64>> {
    let n = xs.len();
    let dim = xs[0].len();
    // Optimal weights lie within this ball; projecting onto it bounds the early steps.
    let l0 = match loss {
        Loss::Hinge => 1.0,
        Loss::EpsilonInsensitive(eps) => ys.iter().map(|y| (y.abs() - eps).max(0.0)).sum::<f64>() / n as f64 + 1e-3,
    };
    let radius = (2.0 * l0 / lambda).sqrt();

    let total = epochs * n;
    let mut w = vec![0.0; dim];
    let mut avg = vec![0.0; dim];
    let mut averaged = 0usize;
    for t in 1..=total {
        if t % n == 0 {
            cancel.check()?;
        }
        let i = rng.gen_range(0..n);
        let eta = 1.0 / (lambda * t as f64);
        let f = dot(&w, &xs[i]);
        let step = match loss {
            Loss::Hinge if ys[i] * f < 1.0 => ys[i],
            Loss::EpsilonInsensitive(eps) if (ys[i] - f).abs() > eps => (ys[i] - f).signum(),
            _ => 0.0,
        };
        let shrink = 1.0 - eta * lambda;
        for (wj, xj) in w.iter_mut().zip(&xs[i]) {
            *wj = *wj * shrink + eta * step * xj;
        }
        let norm = dot(&w, &w).sqrt();
        if norm > radius {
            let k = radius / norm;
            w.iter_mut().for_each(|wj| *wj *= k);
        }
        if t > total / 2 {
            for (a, wj) in avg.iter_mut().zip(&w) {
                *a += wj;
            }
            averaged += 1;
        }
    }
    let averaged = averaged.max(1) as f64;
    Ok(avg.into_iter().map(|a| a / averaged).collect())
}

impl Model for LinearSvm {
    fn family(&self) -> Family {
        Family::Svm
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let x = augment(features, &self.mean, &self.scale);
        match &self.target {
            Target::Classes(classes) => {
                let mut best = 0;
                let mut best_score = f64::NEG_INFINITY;
                for (k, w) in self.weights.iter().enumerate() {
                    let s = dot(w, &x);
                    if s > best_score {
                        best = k;
                        best_score = s;
                    }
                }
                classes[best] as f64
            }
            Target::Continuous => dot(&self.weights[0], &x) * self.y_scale + self.y_mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_linearly_separable_classes() {
        let mut x = Vec::new();
        let mut labels = Vec::new();
        for i in 0..200 {
            let a = (i % 20) as f64 / 20.0;
            let b = (i / 20) as f64 / 10.0;
            x.push(vec![a * 1000.0, b]);
            labels.push(if a + b > 1.0 { 1 } else { 0 });
        }
        let data = TrainingData::classification(x.clone(), &labels);
        let svm = LinearSvm::fit(&data, 10.0, 50, 0.1, 42, &CancelToken::new()).unwrap();
        let correct = x.iter().zip(&labels).filter(|(xi, l)| svm.predict(xi) == **l as f64).count();
        assert!(correct as f64 / x.len() as f64 > 0.9, "only {correct}/200 correct");
    }

    #[test]
    fn regression_recovers_linear_trend() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v[0] + 10.0).collect();
        let data = TrainingData::regression(x, y);
        let svr = LinearSvm::fit(&data, 10.0, 100, 0.05, 1, &CancelToken::new()).unwrap();
        let mid = svr.predict(&[50.0]);
        assert!((mid - 35.0).abs() < 3.0, "f(50) = {mid}");
        assert!(svr.predict(&[90.0]) > svr.predict(&[10.0]));
    }
}
