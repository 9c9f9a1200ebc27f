//! Descriptive statistics over tabular water-quality records.

use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// `1 − SS_res / SS_tot`, defined as 0 when the observations are constant.
pub fn r_squared(observed: &[f64], predicted: &[f64]) -> f64 {
    let n = observed.len();
    if n == 0 {
        return 0.0;
    }
    let mean = observed.iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = observed.iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum();
    if ss_tot < 1e-12 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Count, moments and quartiles of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n − 1); 0 for a single value.
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// Summarise the finite values of `values`. A column with no finite value is empty input.
pub fn describe(name: &str, values: &[f64]) -> Result<ColumnSummary> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return Err(AnalysisError::empty(format!("column '{name}' has no finite values")));
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    let mean = v.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    Ok(ColumnSummary {
        name: name.to_string(),
        count: n,
        mean,
        std,
        min: v[0],
        q25: quantile_sorted(&v, 0.25),
        median: quantile_sorted(&v, 0.5),
        q75: quantile_sorted(&v, 0.75),
        max: v[n - 1],
    })
}

/// Linear-interpolation quantile of sorted, non-empty data.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Pearson correlation over the rows where both values are finite.
/// `None` when fewer than two rows remain or either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a.iter().zip(b).filter(|(x, y)| x.is_finite() && y.is_finite()).map(|(x, y)| (*x, *y)).collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let ma = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mb = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sab += (x - ma) * (y - mb);
        saa += (x - ma).powi(2);
        sbb += (y - mb).powi(2);
    }
    if saa < 1e-12 || sbb < 1e-12 {
        return None;
    }
    Some((sab / (saa * sbb).sqrt()).clamp(-1.0, 1.0))
}

/// Symmetric matrix of pairwise Pearson coefficients, `null` where undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

pub fn correlation_matrix(columns: &[(String, Vec<f64>)]) -> Result<CorrelationMatrix> {
    if let Some((name, _)) = columns.iter().find(|(_, v)| v.len() != columns[0].1.len()) {
        return Err(AnalysisError::config(format!("column '{name}' has a different row count")));
    }
    let k = columns.len();
    let mut values = vec![vec![None; k]; k];
    for i in 0..k {
        for j in i..k {
            let r = pearson(&columns[i].1, &columns[j].1);
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    Ok(CorrelationMatrix { columns: columns.iter().map(|(n, _)| n.clone()).collect(), values })
}

/// Seasonal and long-term time encodings for a dated record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemporalFeatures {
    pub doy_sin: f64,
    pub doy_cos: f64,
    /// Year scaled to [0, 1] over `[first_year, last_year]`.
    pub year_norm: f64,
}

pub fn temporal_features(date: NaiveDate, first_year: i32, last_year: i32) -> TemporalFeatures {
    let angle = 2.0 * PI * date.ordinal() as f64 / 365.25;
    let span = (last_year - first_year) as f64;
    let year_norm = if span > 0.0 { (date.year() - first_year) as f64 / span } else { 0.0 };
    TemporalFeatures { doy_sin: angle.sin(), doy_cos: angle.cos(), year_norm }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn r_squared_constant_observations_is_zero() {
        assert_eq!(r_squared(&[4.0, 4.0, 4.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(r_squared(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
    }

    #[test]
    fn describe_matches_hand_computation() {
        let s = describe("chl", &[4.0, 1.0, f64::NAN, 3.0, 2.0]).unwrap();
        assert_eq!(s.count, 4);
        assert_relative_eq!(s.mean, 2.5);
        assert_relative_eq!(s.std, (5.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(s.q25, 1.75);
        assert_relative_eq!(s.median, 2.5);
        assert_relative_eq!(s.q75, 3.25);
        assert_eq!((s.min, s.max), (1.0, 4.0));
        assert!(describe("empty", &[f64::NAN]).unwrap_err().is_empty_input());
    }

    #[test]
    fn correlation_handles_missing_and_constant_columns() {
        let cols = vec![
            ("a".to_string(), vec![1.0, 2.0, 3.0, f64::NAN]),
            ("b".to_string(), vec![2.0, 4.0, 6.0, 100.0]),
            ("c".to_string(), vec![5.0, 5.0, 5.0, 5.0]),
        ];
        let m = correlation_matrix(&cols).unwrap();
        assert_relative_eq!(m.get("a", "b").unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(m.get("a", "c"), None);
        assert_eq!(m.get("b", "a"), m.get("a", "b"));
    }

    #[test]
    fn temporal_features_cycle_through_the_year() {
        let jan = temporal_features(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 2015, 2025);
        let jul = temporal_features(NaiveDate::from_ymd_opt(2020, 7, 2).unwrap(), 2015, 2025);
        assert!(jan.doy_cos > 0.99);
        assert!(jul.doy_cos < -0.99);
        assert_relative_eq!(jan.year_norm, 0.5);
    }
}
