//! Seeded point sampling over a labelled raster.
//!
//! Candidates are the aggregation cells of [`crate::aggregate::region_cells`]
//! whose label and feature values are all present. Stratified sampling draws
//! each class with its own RNG so adding a class never perturbs the others.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::aggregate::{check_resolution, region_cells};
use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};
use crate::geo::Region;
use crate::raster::Raster;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Class(u32),
    Value(f64),
}

impl Label {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Label::Class(c) => c as f64,
            Label::Value(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledPoint {
    pub x: f64,
    pub y: f64,
    pub features: Vec<f64>,
    pub label: Label,
}

struct Candidate {
    x: f64,
    y: f64,
    label: f64,
    features: Vec<f64>,
}

fn candidates(
    raster: &Raster,
    label_band: &str,
    feature_bands: &[String],
    region: &Region,
    resolution_m: f64,
    cancel: &CancelToken,
) -> Result<Vec<Candidate>> {
    let cells = region_cells(region, resolution_m)?;
    check_resolution(&raster.grid, region, resolution_m)?;
    let label = raster.require_band(label_band)?;
    let features = feature_bands.iter().map(|b| raster.require_band(b)).collect::<Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for chunk in cells.chunks(65_536) {
        cancel.check()?;
        'cell: for cell in chunk {
            let Some(i) = raster.grid.index_of(cell.x, cell.y) else { continue };
            let l = label.data[i];
            if !l.is_finite() {
                continue;
            }
            let mut values = Vec::with_capacity(features.len());
            for band in &features {
                let v = band.data[i];
                if !v.is_finite() {
                    continue 'cell;
                }
                values.push(v as f64);
            }
            out.push(Candidate { x: cell.x, y: cell.y, label: l as f64, features: values });
        }
    }
    if out.is_empty() {
        return Err(AnalysisError::empty(format!(
            "no cell in the region has a valid '{label_band}' label and features"
        )));
    }
    Ok(out)
}

/// Per-stratum seed derived from the run seed and the class value.
fn stratum_seed(seed: u64, class: u32) -> u64 {
    seed ^ (class as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Draw up to `points_per_class` points from every class of `label_band`.
///
/// Classes are visited in ascending order and each draw keeps spatial order,
/// so the same inputs and seed always give the same points in the same order.
pub fn stratified_sample(
    raster: &Raster,
    label_band: &str,
    feature_bands: &[String],
    region: &Region,
    points_per_class: usize,
    resolution_m: f64,
    seed: u64,
) -> Result<Vec<LabeledPoint>> {
    stratified_sample_with(
        raster,
        label_band,
        feature_bands,
        region,
        points_per_class,
        resolution_m,
        seed,
        &CancelToken::new(),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn stratified_sample_with(
    raster: &Raster,
    label_band: &str,
    feature_bands: &[String],
    region: &Region,
    points_per_class: usize,
    resolution_m: f64,
    seed: u64,
    cancel: &CancelToken,
) -> Result<Vec<LabeledPoint>> {
    if points_per_class == 0 {
        return Err(AnalysisError::config("points_per_class must be at least 1"));
    }
    let cands = candidates(raster, label_band, feature_bands, region, resolution_m, cancel)?;

    let mut strata: BTreeMap<u32, Vec<Candidate>> = BTreeMap::new();
    for c in cands {
        let class = c.label.round();
        if class < 0.0 || class > u32::MAX as f64 {
            return Err(AnalysisError::config(format!(
                "label '{label_band}' holds {} which is not a class index",
                c.label
            )));
        }
        strata.entry(class as u32).or_default().push(c);
    }

    let mut points = Vec::new();
    for (class, members) in strata {
        let mut rng = StdRng::seed_from_u64(stratum_seed(seed, class));
        let take = points_per_class.min(members.len());
        let mut picked = index::sample(&mut rng, members.len(), take).into_vec();
        picked.sort_unstable();
        log::debug!("class {class}: drew {take} of {} candidates", members.len());
        points.extend(picked.into_iter().map(|i| {
            let c = &members[i];
            LabeledPoint { x: c.x, y: c.y, features: c.features.clone(), label: Label::Class(class) }
        }));
    }
    Ok(points)
}

/// Uniform sample of `num_points` cells labelled with the continuous value of `label_band`.
pub fn random_sample(
    raster: &Raster,
    label_band: &str,
    feature_bands: &[String],
    region: &Region,
    num_points: usize,
    resolution_m: f64,
    seed: u64,
) -> Result<Vec<LabeledPoint>> {
    if num_points == 0 {
        return Err(AnalysisError::config("num_points must be at least 1"));
    }
    let cands = candidates(raster, label_band, feature_bands, region, resolution_m, &CancelToken::new())?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, cands.len(), num_points.min(cands.len())).into_vec();
    picked.sort_unstable();
    Ok(picked
        .into_iter()
        .map(|i| {
            let c = &cands[i];
            LabeledPoint { x: c.x, y: c.y, features: c.features.clone(), label: Label::Value(c.label) }
        })
        .collect())
}

/// Split `points` into `(train, test)` with roughly `test_fraction` of them held out.
/// Both halves are non-empty; relative order is preserved within each.
pub fn holdout_split(
    points: &[LabeledPoint],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<LabeledPoint>, Vec<LabeledPoint>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(AnalysisError::config(format!("test_fraction must be in (0, 1), got {test_fraction}")));
    }
    if points.len() < 2 {
        return Err(AnalysisError::empty("need at least two points to split"));
    }
    let n = points.len();
    let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut held = vec![false; n];
    for i in index::sample(&mut rng, n, n_test) {
        held[i] = true;
    }
    let (mut train, mut test) = (Vec::with_capacity(n - n_test), Vec::with_capacity(n_test));
    for (p, &h) in points.iter().zip(&held) {
        if h { test.push(p.clone()) } else { train.push(p.clone()) }
    }
    Ok((train, test))
}

/// Counts per class in a classification sample.
pub fn class_counts(points: &[LabeledPoint]) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for p in points {
        if let Label::Class(c) = p.label {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Bounds, Crs};
    use crate::raster::GridSpec;

    /// 100×100 grid of 100 m pixels; the first `water` pixels are class 1.
    fn scene(water: usize) -> (Raster, Region) {
        let grid = GridSpec::new(100, 100, Bounds::new(0.0, 0.0, 10_000.0, 10_000.0), Crs::Projected).unwrap();
        let label: Vec<f32> = (0..grid.len()).map(|i| if i < water { 1.0 } else { 0.0 }).collect();
        let feat: Vec<f32> = (0..grid.len()).map(|i| i as f32 / 10_000.0).collect();
        let r = Raster::new("s", grid).with_band("water", label).unwrap().with_band("f", feat).unwrap();
        (r, Region::rectangle([0.0, 0.0, 10_000.0, 10_000.0], Crs::Projected).unwrap())
    }

    fn features() -> Vec<String> {
        vec!["f".to_string()]
    }

    #[test]
    fn same_seed_same_points() {
        let (r, region) = scene(3000);
        let a = stratified_sample(&r, "water", &features(), &region, 40, 100.0, 42).unwrap();
        let b = stratified_sample(&r, "water", &features(), &region, 40, 100.0, 42).unwrap();
        assert_eq!(a, b);
        let c = stratified_sample(&r, "water", &features(), &region, 40, 100.0, 43).unwrap();
        assert_ne!(a, c, "a different seed should move at least one point");
    }

    #[test]
    fn rare_class_is_fully_represented() {
        // 95:5 split, 50 per class requested
        let (r, region) = scene(500);
        let pts = stratified_sample(&r, "water", &features(), &region, 50, 100.0, 42).unwrap();
        let counts = class_counts(&pts);
        assert_eq!(counts.get(&0), Some(&50));
        assert_eq!(counts.get(&1), Some(&50));
    }

    #[test]
    fn short_stratum_returns_everything_it_has() {
        let (r, region) = scene(7);
        let pts = stratified_sample(&r, "water", &features(), &region, 50, 100.0, 1).unwrap();
        assert_eq!(class_counts(&pts).get(&1), Some(&7));
    }

    #[test]
    fn invalid_requests() {
        let (r, region) = scene(10);
        assert!(matches!(
            stratified_sample(&r, "water", &features(), &region, 0, 100.0, 1),
            Err(AnalysisError::Configuration(_))
        ));
        let masked = Raster::filled("m", r.grid, "water", f32::NAN).with_band("f", vec![0.0; 10_000]).unwrap();
        assert!(stratified_sample(&masked, "water", &features(), &region, 5, 100.0, 1).unwrap_err().is_empty_input());
        let negative = Raster::filled("n", r.grid, "water", -1.0).with_band("f", vec![0.0; 10_000]).unwrap();
        assert!(matches!(
            stratified_sample(&negative, "water", &features(), &region, 5, 100.0, 1),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn random_sample_carries_continuous_labels() {
        let (r, region) = scene(0);
        let pts = random_sample(&r, "f", &features(), &region, 25, 100.0, 9).unwrap();
        assert_eq!(pts.len(), 25);
        for p in &pts {
            assert!(matches!(p.label, Label::Value(v) if (v - p.features[0]).abs() < 1e-9));
        }
    }

    #[test]
    fn holdout_split_partitions_points() {
        let (r, region) = scene(5000);
        let pts = stratified_sample(&r, "water", &features(), &region, 50, 100.0, 42).unwrap();
        let (train, test) = holdout_split(&pts, 0.3, 7).unwrap();
        assert_eq!(train.len() + test.len(), pts.len());
        assert_eq!(test.len(), 30);
        assert!(test.iter().all(|p| !train.contains(p)));
        assert!(holdout_split(&pts, 1.0, 7).is_err());
    }
}
