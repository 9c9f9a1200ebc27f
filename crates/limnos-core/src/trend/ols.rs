use super::{check_finite, Estimator, LinearFit};
use crate::error::{AnalysisError, Result};

/// Ordinary least squares via the normal equations.
///
/// Fewer than two distinct times leaves the slope undefined and yields
/// `DegenerateStatistic`.
pub fn ols(points: &[(f64, f64)]) -> Result<LinearFit> {
    check_finite(points)?;
    if points.len() < 2 {
        return Err(AnalysisError::degenerate(format!("OLS needs at least 2 points, got {}", points.len())));
    }
    let n = points.len() as f64;
    let mean_t = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_v = points.iter().map(|p| p.1).sum::<f64>() / n;

    // Centred sums keep decimal-year inputs well conditioned.
    let s_tt: f64 = points.iter().map(|(t, _)| (t - mean_t).powi(2)).sum();
    let s_tv: f64 = points.iter().map(|(t, v)| (t - mean_t) * (v - mean_v)).sum();
    if s_tt < 1e-12 {
        return Err(AnalysisError::degenerate("all times are equal; OLS slope is undefined"));
    }

    let slope = s_tv / s_tt;
    let intercept = mean_v - slope * mean_t;
    Ok(LinearFit::new(Estimator::Ols, slope, intercept, points))
}
