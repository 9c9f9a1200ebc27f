//! Validation metrics: regression errors, confusion matrix, agreement scores.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::stats::r_squared;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// `1 − SS_res/SS_tot`; 0 when the observations are constant.
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(observed: &[f64], predicted: &[f64]) -> Result<Self> {
        if observed.len() != predicted.len() {
            return Err(AnalysisError::config(format!(
                "{} observations vs {} predictions",
                observed.len(),
                predicted.len()
            )));
        }
        if observed.is_empty() {
            return Err(AnalysisError::empty("no validation points"));
        }
        let n = observed.len() as f64;
        let mae = observed.iter().zip(predicted).map(|(o, p)| (o - p).abs()).sum::<f64>() / n;
        let mse = observed.iter().zip(predicted).map(|(o, p)| (o - p).powi(2)).sum::<f64>() / n;
        Ok(Self { mae, rmse: mse.sqrt(), r2: r_squared(observed, predicted) })
    }
}

/// Ascending edges that bucket a continuous value into ordered classes:
/// the class is the number of edges the value reaches.
///
/// Chlorophyll-a with edges `[10, 25]` gives `<10 → 0`, `10–25 → 1`, `≥25 → 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketLadder {
    pub edges: Vec<f64>,
}

impl BucketLadder {
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        let ladder = Self { edges };
        ladder.validate()?;
        Ok(ladder)
    }

    pub fn validate(&self) -> Result<()> {
        if self.edges.is_empty() || self.edges.iter().any(|e| !e.is_finite()) || self.edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalysisError::config(format!(
                "bucket edges must be finite and strictly ascending, got {:?}",
                self.edges
            )));
        }
        Ok(())
    }

    pub fn bucket(&self, value: f64) -> u32 {
        self.edges.iter().take_while(|&&e| value >= e).count() as u32
    }
}

/// Square confusion matrix; rows are observed classes, columns predicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Sorted union of observed and predicted classes; labels both axes.
    pub classes: Vec<u32>,
    pub counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn from_pairs(observed: &[u32], predicted: &[u32]) -> Result<Self> {
        if observed.len() != predicted.len() {
            return Err(AnalysisError::config(format!(
                "{} observations vs {} predictions",
                observed.len(),
                predicted.len()
            )));
        }
        if observed.is_empty() {
            return Err(AnalysisError::empty("no validation points"));
        }
        let classes: Vec<u32> = observed.iter().chain(predicted).copied().collect::<BTreeSet<_>>().into_iter().collect();
        let k = classes.len();
        let mut counts = vec![vec![0u64; k]; k];
        for (o, p) in observed.iter().zip(predicted) {
            // Both are in `classes` by construction.
            let (Ok(i), Ok(j)) = (classes.binary_search(o), classes.binary_search(p)) else { continue };
            counts[i][j] += 1;
        }
        Ok(Self { classes, counts })
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..self.classes.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            t => self.trace() as f64 / t as f64,
        }
    }

    /// Cohen's kappa, `(p_o − p_e) / (1 − p_e)`; 0 when `p_e` is 1.
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let k = self.classes.len();
        let p_o = self.trace() as f64 / total;
        let p_e: f64 = (0..k)
            .map(|i| {
                let row: u64 = self.counts[i].iter().sum();
                let col: u64 = self.counts.iter().map(|r| r[i]).sum();
                (row as f64 / total) * (col as f64 / total)
            })
            .sum();
        if (1.0 - p_e).abs() < 1e-12 {
            0.0
        } else {
            (p_o - p_e) / (1.0 - p_e)
        }
    }

    /// Producer's accuracy per class (recall): diagonal over row total.
    pub fn producers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|i| {
                let row: u64 = self.counts[i].iter().sum();
                (row > 0).then(|| self.counts[i][i] as f64 / row as f64)
            })
            .collect()
    }

    /// Consumer's accuracy per class (precision): diagonal over column total.
    pub fn consumers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|j| {
                let col: u64 = self.counts.iter().map(|r| r[j]).sum();
                (col > 0).then(|| self.counts[j][j] as f64 / col as f64)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub confusion_matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub kappa: f64,
    pub producers_accuracy: Vec<Option<f64>>,
    pub consumers_accuracy: Vec<Option<f64>>,
}

impl ClassificationMetrics {
    pub fn compute(observed: &[u32], predicted: &[u32]) -> Result<Self> {
        let cm = ConfusionMatrix::from_pairs(observed, predicted)?;
        Ok(Self {
            accuracy: cm.accuracy(),
            kappa: cm.kappa(),
            producers_accuracy: cm.producers_accuracy(),
            consumers_accuracy: cm.consumers_accuracy(),
            confusion_matrix: cm,
        })
    }
}
