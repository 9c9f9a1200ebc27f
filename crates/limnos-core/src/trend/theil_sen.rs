use super::{check_finite, Estimator, LinearFit};
use crate::error::{AnalysisError, Result};

/// Theil–Sen estimator: slope is the median of pairwise slopes over pairs with
/// distinct times, intercept the median of `vᵢ − slope·tᵢ`.
///
/// O(n²) in the number of points, which is fine for yearly or monthly series.
pub fn theil_sen(points: &[(f64, f64)]) -> Result<LinearFit> {
    check_finite(points)?;
    let mut slopes = Vec::with_capacity(points.len() * points.len().saturating_sub(1) / 2);
    for (i, &(ti, vi)) in points.iter().enumerate() {
        for &(tj, vj) in &points[i + 1..] {
            if tj != ti {
                slopes.push((vj - vi) / (tj - ti));
            }
        }
    }
    let slope = median(&mut slopes)
        .ok_or_else(|| AnalysisError::degenerate("no pair of points with distinct times; Theil–Sen slope is undefined"))?;
    let mut residuals: Vec<f64> = points.iter().map(|(t, v)| v - slope * t).collect();
    let intercept = median(&mut residuals).unwrap_or(0.0);
    Ok(LinearFit::new(Estimator::TheilSen, slope, intercept, points))
}

/// Median, averaging the two central values for even counts.
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    Some(if n % 2 == 1 { values[n / 2] } else { (values[n / 2 - 1] + values[n / 2]) / 2.0 })
}
