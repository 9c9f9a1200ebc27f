//! Point probe: per-scene index values around one location.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate_with, Reducer};
use crate::bands::{derive_bands, BandExpression};
use crate::cancel::CancelToken;
use crate::composite::{filter_scenes, DateRange, QualityFilter, Scene};
use crate::error::{AnalysisError, Result};
use crate::geo::{Crs, Region};

/// A location and the half-width of the square window averaged around it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbePoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub crs: Crs,
    pub buffer_m: f64,
}

impl ProbePoint {
    pub fn window(&self) -> Result<Region> {
        if !(self.buffer_m > 0.0 && self.buffer_m.is_finite()) {
            return Err(AnalysisError::config(format!("probe buffer must be positive, got {}", self.buffer_m)));
        }
        let h = self.crs.metres_to_units(self.buffer_m);
        Region::rectangle([self.x - h, self.y - h, self.x + h, self.y + h], self.crs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRow {
    pub date: NaiveDate,
    pub scene_id: String,
    pub values: BTreeMap<String, f64>,
}

/// Evaluate `expressions` on every qualifying scene and average each of
/// `outputs` over the probe window.
///
/// Scenes that do not cover the window are skipped. Rows with any missing
/// output are dropped rather than reported with gaps.
pub fn point_series(
    scenes: &[Scene],
    probe: &ProbePoint,
    range: &DateRange,
    filter: &QualityFilter,
    expressions: &[BandExpression],
    outputs: &[String],
    cancel: &CancelToken,
) -> Result<Vec<ProbeRow>> {
    let window = probe.window()?;
    let selected = filter_scenes(scenes, range, Some(&window), filter);
    let mut rows = Vec::with_capacity(selected.len());
    let mut dropped = 0usize;
    'scene: for scene in selected {
        cancel.check()?;
        let derived = derive_bands(&scene.raster, expressions)?;
        let resolution = derived.grid.native_resolution_m();
        let mut values = BTreeMap::new();
        for name in outputs {
            match aggregate_with(&derived, name, &window, resolution, Reducer::Mean, cancel)? {
                Some(v) => {
                    values.insert(name.clone(), v);
                }
                None => {
                    dropped += 1;
                    continue 'scene;
                }
            }
        }
        rows.push(ProbeRow { date: scene.acquired, scene_id: scene.id.clone(), values });
    }
    rows.sort_by_key(|r| r.date);
    log::debug!("probe at ({}, {}): {} rows, {dropped} dropped for missing values", probe.x, probe.y, rows.len());
    Ok(rows)
}
