//! Long-term trend estimators over `(time, value)` series and class-transition
//! summaries between two dates.
//!
//! Both line estimators report slope and intercept in value units per time
//! unit. Times are usually decimal years ([`crate::series::TimeSeries::points`]).

pub mod ols;
pub mod theil_sen;
pub mod transition;

pub use ols::ols;
pub use theil_sen::theil_sen;
pub use transition::{transition_summary, transition_summary_with, Reclassifier, Transition, TransitionSummary};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::stats::r_squared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    Ols,
    TheilSen,
}

/// A fitted line `v = slope · t + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub estimator: Estimator,
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination of this line over the fitted points; 0 for
    /// constant observations.
    pub r_squared: f64,
    pub n: usize,
}

impl LinearFit {
    pub fn predict(&self, t: f64) -> f64 {
        self.slope * t + self.intercept
    }

    fn new(estimator: Estimator, slope: f64, intercept: f64, points: &[(f64, f64)]) -> Self {
        let observed: Vec<f64> = points.iter().map(|p| p.1).collect();
        let predicted: Vec<f64> = points.iter().map(|p| slope * p.0 + intercept).collect();
        Self { estimator, slope, intercept, r_squared: r_squared(&observed, &predicted), n: points.len() }
    }
}

/// Fit `points` with the chosen estimator.
pub fn fit(estimator: Estimator, points: &[(f64, f64)]) -> Result<LinearFit> {
    match estimator {
        Estimator::Ols => ols(points),
        Estimator::TheilSen => theil_sen(points),
    }
}

/// Mean absolute percentage error, in percent. Pairs whose actual value is
/// zero are skipped; none left is an empty-input outcome.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    if actual.len() != predicted.len() {
        return Err(AnalysisError::config(format!(
            "mape needs equal lengths, got {} and {}",
            actual.len(),
            predicted.len()
        )));
    }
    let terms: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    if terms.is_empty() {
        return Err(AnalysisError::empty("no non-zero actual values for MAPE"));
    }
    Ok(100.0 * terms.iter().sum::<f64>() / terms.len() as f64)
}

fn check_finite(points: &[(f64, f64)]) -> Result<()> {
    match points.iter().find(|(t, v)| !t.is_finite() || !v.is_finite()) {
        Some(p) => Err(AnalysisError::config(format!("non-finite point {p:?} in trend input"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line() -> Vec<(f64, f64)> {
        (0..10).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect()
    }

    #[test]
    fn both_estimators_recover_exact_line() {
        for est in [Estimator::Ols, Estimator::TheilSen] {
            let f = fit(est, &line()).unwrap();
            assert_relative_eq!(f.slope, 2.0, epsilon = 1e-9);
            assert_relative_eq!(f.intercept, 1.0, epsilon = 1e-9);
            assert_relative_eq!(f.r_squared, 1.0, epsilon = 1e-9);
            assert_eq!(f.n, 10);
        }
    }

    #[test]
    fn theil_sen_moves_less_under_outlier() {
        let clean = line();
        let mut dirty = clean.clone();
        dirty[7].1 += 500.0;
        let d_ols = (ols(&dirty).unwrap().slope - ols(&clean).unwrap().slope).abs();
        let d_ts = (theil_sen(&dirty).unwrap().slope - theil_sen(&clean).unwrap().slope).abs();
        assert!(d_ts < d_ols, "Theil–Sen moved {d_ts}, OLS moved {d_ols}");
    }

    #[test]
    fn forecast_error() {
        let f = ols(&line()).unwrap();
        assert_relative_eq!(f.predict(20.0), 41.0, epsilon = 1e-9);
        assert_relative_eq!(mape(&[40.0, 0.0], &[44.0, 3.0]).unwrap(), 10.0, epsilon = 1e-9);
        assert!(mape(&[0.0], &[1.0]).unwrap_err().is_empty_input());
        assert!(mape(&[1.0], &[]).is_err());
    }
}
