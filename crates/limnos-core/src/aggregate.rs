//! Region aggregation: raster band + region + resolution → scalar.
//!
//! The region's bounding box is tiled into cells of the requested resolution
//! (edge cells clipped to the box). A cell takes part when its centre lies in the
//! region polygon, and its value is the nearest source pixel at that centre.
//! Coarser resolutions are cheaper and less exact; results at two resolutions are
//! close but not identical, which is why every area carries its resolution.

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};
use crate::geo::Region;
use crate::raster::{GridSpec, Raster};

/// Upper bound on cells per aggregation, guarding against a resolution typo
/// turning into an unbounded allocation.
pub const MAX_CELLS: usize = 50_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Mean,
}

/// One aggregation cell: centre coordinates and clipped ground area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub x: f64,
    pub y: f64,
    pub area_m2: f64,
}

/// Tile `region` into cells of `resolution_m`, keeping cells whose centre is inside it.
pub fn region_cells(region: &Region, resolution_m: f64) -> Result<Vec<Cell>> {
    if !(resolution_m.is_finite() && resolution_m > 0.0) {
        return Err(AnalysisError::config(format!("resolution must be positive, got {resolution_m}")));
    }
    let crs = region.crs();
    let b = region.bounds();
    let step = crs.metres_to_units(resolution_m);
    let n_cols = (b.width() / step - 1e-9).ceil().max(1.0) as usize;
    let n_rows = (b.height() / step - 1e-9).ceil().max(1.0) as usize;
    if n_cols.saturating_mul(n_rows) > MAX_CELLS {
        return Err(AnalysisError::config(format!(
            "{n_cols}×{n_rows} cells at {resolution_m} m exceeds the {MAX_CELLS}-cell limit"
        )));
    }

    let mut cells = Vec::with_capacity(n_cols * n_rows);
    for row in 0..n_rows {
        let y0 = b.min_y + row as f64 * step;
        let y1 = (y0 + step).min(b.max_y);
        for col in 0..n_cols {
            let x0 = b.min_x + col as f64 * step;
            let x1 = (x0 + step).min(b.max_x);
            let (x, y) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
            if region.contains(x, y) {
                cells.push(Cell { x, y, area_m2: crs.cell_area_m2(x0, x1, y0, y1) });
            }
        }
    }
    Ok(cells)
}

/// Reject resolutions finer than the raster's pixels and regions in another CRS.
pub(crate) fn check_resolution(grid: &GridSpec, region: &Region, resolution_m: f64) -> Result<()> {
    if region.crs() != grid.crs {
        return Err(AnalysisError::config(format!(
            "region CRS {:?} does not match raster CRS {:?}",
            region.crs(),
            grid.crs
        )));
    }
    let native = grid.native_resolution_m();
    if resolution_m < native * (1.0 - 1e-6) {
        return Err(AnalysisError::config(format!(
            "resolution {resolution_m} m is finer than the source data supports ({native:.3} m)"
        )));
    }
    Ok(())
}

/// Reduce `band` over `region`. `Ok(None)` is the no-data outcome: the region
/// held no valid cell. It is never reported as zero.
pub fn aggregate(
    raster: &Raster,
    band: &str,
    region: &Region,
    resolution_m: f64,
    reducer: Reducer,
) -> Result<Option<f64>> {
    aggregate_with(raster, band, region, resolution_m, reducer, &CancelToken::new())
}

/// [`aggregate`] with cooperative cancellation.
pub fn aggregate_with(
    raster: &Raster,
    band: &str,
    region: &Region,
    resolution_m: f64,
    reducer: Reducer,
    cancel: &CancelToken,
) -> Result<Option<f64>> {
    let cells = region_cells(region, resolution_m)?;
    check_resolution(&raster.grid, region, resolution_m)?;
    let band = raster.require_band(band)?;

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for chunk in cells.chunks(CHECK_EVERY) {
        cancel.check()?;
        for cell in chunk {
            if let Some(v) = raster.sample(band, cell.x, cell.y).filter(|v| !v.is_nan()) {
                sum += v as f64;
                count += 1;
            }
        }
    }

    if count == 0 {
        return Ok(None);
    }
    Ok(Some(match reducer {
        Reducer::Sum => sum,
        Reducer::Mean => sum / count as f64,
    }))
}

const CHECK_EVERY: usize = 65_536;

/// Surface-water area measured at a stated resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaEstimate {
    /// `None` when every cell in the region was masked.
    pub area_km2: Option<f64>,
    pub resolution_m: f64,
    pub valid_cells: usize,
}

/// Integrate a boolean water mask over `region`: Σ mask · cell_area, in km².
///
/// Cell area comes from the CRS and the cell's latitude, so the same angular
/// cell counts for less toward the poles.
pub fn water_area(raster: &Raster, mask_band: &str, region: &Region, resolution_m: f64) -> Result<AreaEstimate> {
    water_area_with(raster, mask_band, region, resolution_m, &CancelToken::new())
}

pub fn water_area_with(
    raster: &Raster,
    mask_band: &str,
    region: &Region,
    resolution_m: f64,
    cancel: &CancelToken,
) -> Result<AreaEstimate> {
    let cells = region_cells(region, resolution_m)?;
    check_resolution(&raster.grid, region, resolution_m)?;
    let mask = raster.require_band(mask_band)?;

    let mut area_m2 = 0.0f64;
    let mut valid_cells = 0usize;
    for chunk in cells.chunks(CHECK_EVERY) {
        cancel.check()?;
        for cell in chunk {
            if let Some(m) = raster.sample(mask, cell.x, cell.y).filter(|v| !v.is_nan()) {
                area_m2 += m as f64 * cell.area_m2;
                valid_cells += 1;
            }
        }
    }

    let area_km2 = (valid_cells > 0).then_some(area_m2 / 1.0e6);
    log::debug!(
        "water area over {} cells at {resolution_m} m: {area_km2:?} km²",
        valid_cells
    );
    Ok(AreaEstimate { area_km2, resolution_m, valid_cells })
}
