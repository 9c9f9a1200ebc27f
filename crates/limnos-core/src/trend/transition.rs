//! Class transitions between two dates, e.g. land → water.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{check_resolution, region_cells};
use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};
use crate::geo::Region;
use crate::harness::metrics::BucketLadder;
use crate::raster::Raster;

/// Maps a raw sample to a class code before transitions are counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reclassifier {
    /// Round to the nearest class. Codes listed in `no_data` count as missing.
    Identity {
        #[serde(default)]
        no_data: Vec<u32>,
    },
    /// `1` when the value is at least `at`, else `0`.
    Threshold { at: f64 },
    /// Bucket index on an ascending ladder.
    Ladder(BucketLadder),
}

impl Reclassifier {
    pub fn validate(&self) -> Result<()> {
        match self {
            Reclassifier::Threshold { at } if !at.is_finite() => {
                Err(AnalysisError::config("reclassifier threshold must be finite"))
            }
            Reclassifier::Ladder(ladder) => ladder.validate(),
            _ => Ok(()),
        }
    }

    /// Class code of `value`, or `None` for missing data.
    pub fn code(&self, value: f32) -> Option<u32> {
        if !value.is_finite() {
            return None;
        }
        let v = value as f64;
        match self {
            Reclassifier::Identity { no_data } => {
                let c = v.round();
                if c < 0.0 {
                    return None;
                }
                let c = c as u32;
                (!no_data.contains(&c)).then_some(c)
            }
            Reclassifier::Threshold { at } => Some((v >= *at) as u32),
            Reclassifier::Ladder(ladder) => Some(ladder.bucket(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: u32,
    pub to: u32,
    pub cells: u64,
    pub area_km2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSummary {
    pub resolution_m: f64,
    /// Sorted by `(from, to)`.
    pub transitions: Vec<Transition>,
    /// Cells with missing data in either raster.
    pub skipped_cells: u64,
}

impl TransitionSummary {
    pub fn get(&self, from: u32, to: u32) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.from == from && t.to == to)
    }

    /// Total km² whose class changed.
    pub fn changed_area_km2(&self) -> f64 {
        self.transitions.iter().filter(|t| t.from != t.to).map(|t| t.area_km2).sum()
    }
}

/// Histogram of `(from_code, to_code)` pairs over `region`.
pub fn transition_summary(
    from: &Raster,
    from_band: &str,
    to: &Raster,
    to_band: &str,
    region: &Region,
    resolution_m: f64,
    reclassifier: &Reclassifier,
) -> Result<TransitionSummary> {
    transition_summary_with(from, from_band, to, to_band, region, resolution_m, reclassifier, &CancelToken::new())
}

/// [`transition_summary`] with cooperative cancellation.
#[allow(clippy::too_many_arguments)]
pub fn transition_summary_with(
    from: &Raster,
    from_band: &str,
    to: &Raster,
    to_band: &str,
    region: &Region,
    resolution_m: f64,
    reclassifier: &Reclassifier,
    cancel: &CancelToken,
) -> Result<TransitionSummary> {
    reclassifier.validate()?;
    let cells = region_cells(region, resolution_m)?;
    check_resolution(&from.grid, region, resolution_m)?;
    check_resolution(&to.grid, region, resolution_m)?;
    let a = from.require_band(from_band)?;
    let b = to.require_band(to_band)?;

    let mut hist: BTreeMap<(u32, u32), (u64, f64)> = BTreeMap::new();
    let mut skipped_cells = 0u64;
    for chunk in cells.chunks(65_536) {
        cancel.check()?;
        for cell in chunk {
            let codes = from
                .sample(a, cell.x, cell.y)
                .and_then(|v| reclassifier.code(v))
                .zip(to.sample(b, cell.x, cell.y).and_then(|v| reclassifier.code(v)));
            match codes {
                Some(pair) => {
                    let slot = hist.entry(pair).or_insert((0, 0.0));
                    slot.0 += 1;
                    slot.1 += cell.area_m2;
                }
                None => skipped_cells += 1,
            }
        }
    }

    let transitions = hist
        .into_iter()
        .map(|((from, to), (cells, area_m2))| Transition { from, to, cells, area_km2: area_m2 / 1.0e6 })
        .collect();
    Ok(TransitionSummary { resolution_m, transitions, skipped_cells })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Bounds, Crs};
    use crate::raster::GridSpec;
    use approx::assert_relative_eq;

    fn grid() -> GridSpec {
        GridSpec::new(4, 1, Bounds::new(0.0, 0.0, 4000.0, 1000.0), Crs::Projected).unwrap()
    }

    #[test]
    fn counts_land_to_water_pairs() {
        let before = Raster::new("1990", grid()).with_band("class", vec![1.0, 1.0, 3.0, 0.0]).unwrap();
        let after = Raster::new("2020", grid()).with_band("class", vec![1.0, 3.0, 1.0, 3.0]).unwrap();
        let region = Region::rectangle([0.0, 0.0, 4000.0, 1000.0], Crs::Projected).unwrap();
        let s = transition_summary(
            &before,
            "class",
            &after,
            "class",
            &region,
            1000.0,
            &Reclassifier::Identity { no_data: vec![0] },
        )
        .unwrap();
        assert_eq!(s.skipped_cells, 1);
        assert_eq!(s.get(1, 1).unwrap().cells, 1);
        assert_eq!(s.get(1, 3).unwrap().cells, 1);
        assert_eq!(s.get(3, 1).unwrap().cells, 1);
        assert_relative_eq!(s.changed_area_km2(), 2.0, epsilon = 1e-9);
        let total: u64 = s.transitions.iter().map(|t| t.cells).sum();
        assert_eq!(total + s.skipped_cells, 4);
    }

    #[test]
    fn cancelled_summary_is_not_ready() {
        let r = Raster::new("r", grid()).with_band("class", vec![1.0; 4]).unwrap();
        let region = Region::rectangle([0.0, 0.0, 4000.0, 1000.0], Crs::Projected).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = transition_summary_with(
            &r,
            "class",
            &r,
            "class",
            &region,
            1000.0,
            &Reclassifier::Threshold { at: 1.0 },
            &cancel,
        );
        assert_eq!(result.unwrap_err(), AnalysisError::NotReady);
    }

    #[test]
    fn threshold_and_ladder_codes() {
        assert_eq!(Reclassifier::Threshold { at: 2.0 }.code(3.0), Some(1));
        assert_eq!(Reclassifier::Threshold { at: 2.0 }.code(1.0), Some(0));
        assert_eq!(Reclassifier::Threshold { at: 2.0 }.code(f32::NAN), None);
        let ladder = Reclassifier::Ladder(BucketLadder { edges: vec![10.0, 25.0] });
        assert_eq!(ladder.code(5.0), Some(0));
        assert_eq!(ladder.code(10.0), Some(1));
        assert_eq!(ladder.code(40.0), Some(2));
        assert!(Reclassifier::Ladder(BucketLadder { edges: vec![5.0, 1.0] }).validate().is_err());
    }
}
