//! Temporal compositing: filter dated scenes and reduce them per pixel.
//!
//! The default reducer is the per-pixel median, which shrugs off the sporadic
//! cloud contamination a scene-level cloud-cover threshold lets through.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};
use crate::geo::Region;
use crate::raster::{Band, Raster};

/// One dated acquisition with its scene-level quality attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub acquired: NaiveDate,
    /// Scene cloud cover, 0–100 %.
    pub cloud_cover: f64,
    pub raster: Raster,
}

/// Inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(AnalysisError::config(format!("date range ends ({end}) before it starts ({start})")));
        }
        Ok(Self { start, end })
    }

    /// `start_month/start_day` to `end_month/end_day` of `year`, e.g. a June–September season.
    pub fn season(year: i32, start: (u32, u32), end: (u32, u32)) -> Result<Self> {
        let d = |(m, day): (u32, u32)| {
            NaiveDate::from_ymd_opt(year, m, day)
                .ok_or_else(|| AnalysisError::config(format!("invalid date {year}-{m:02}-{day:02}")))
        };
        Self::new(d(start)?, d(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Scene-level acceptance criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFilter {
    /// Keep scenes whose cloud cover is at most this percentage.
    pub max_cloud_cover: f64,
    /// Optional inclusive calendar-month window, e.g. `(8, 9)` for August–September.
    #[serde(default)]
    pub months: Option<(u32, u32)>,
}

impl QualityFilter {
    pub fn max_cloud(max_cloud_cover: f64) -> Self {
        Self { max_cloud_cover, months: None }
    }

    pub fn accepts(&self, scene: &Scene) -> bool {
        if !(scene.cloud_cover <= self.max_cloud_cover) {
            return false;
        }
        match self.months {
            Some((from, to)) => {
                let m = scene.acquired.month();
                if from <= to { m >= from && m <= to } else { m >= from || m <= to }
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeReducer {
    #[default]
    Median,
    Mean,
}

/// A queryable source of dated multi-band scenes.
///
/// Results may change between calls as new acquisitions arrive, so callers
/// must not assume repeated queries are idempotent.
pub trait ImagerySource {
    fn query(&self, range: &DateRange, region: Option<&Region>, filter: &QualityFilter) -> Result<Vec<Scene>>;
}

/// In-memory scene archive.
#[derive(Debug, Clone, Default)]
pub struct SceneArchive {
    scenes: Vec<Scene>,
}

impl SceneArchive {
    pub fn new(mut scenes: Vec<Scene>) -> Self {
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        Self { scenes }
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl ImagerySource for SceneArchive {
    fn query(&self, range: &DateRange, region: Option<&Region>, filter: &QualityFilter) -> Result<Vec<Scene>> {
        Ok(filter_scenes(&self.scenes, range, region, filter).into_iter().cloned().collect())
    }
}

/// Scenes inside `range` that pass `filter` and (if given) overlap `region`.
pub fn filter_scenes<'a>(
    scenes: &'a [Scene],
    range: &DateRange,
    region: Option<&Region>,
    filter: &QualityFilter,
) -> Vec<&'a Scene> {
    scenes
        .iter()
        .filter(|s| range.contains(s.acquired))
        .filter(|s| filter.accepts(s))
        .filter(|s| match region {
            Some(r) => r.crs() == s.raster.grid.crs && r.bounds().intersects(&s.raster.grid.bounds),
            None => true,
        })
        .collect()
}

/// Filter `scenes` and reduce the survivors per pixel.
///
/// Returns `Ok(None)` when no scene qualifies; callers must handle that case
/// before deriving indices. `bands` optionally restricts the output bands.
pub fn composite(
    scenes: &[Scene],
    range: &DateRange,
    filter: &QualityFilter,
    bands: Option<&[String]>,
    reducer: CompositeReducer,
    cancel: &CancelToken,
) -> Result<Option<Raster>> {
    let selected = filter_scenes(scenes, range, None, filter);
    log::info!(
        "compositing {} of {} scenes for {}..{} (cloud ≤ {}%)",
        selected.len(),
        scenes.len(),
        range.start,
        range.end,
        filter.max_cloud_cover
    );
    if selected.is_empty() {
        return Ok(None);
    }
    let rasters: Vec<&Raster> = selected.iter().map(|s| &s.raster).collect();
    let name = format!("composite_{}_{}", range.start, range.end);
    reduce_rasters(&name, &rasters, bands, reducer, cancel).map(Some)
}

/// Per-pixel mean of already-composited rasters, e.g. several seasonal composites
/// averaged into one training image.
pub fn mean_of(name: &str, rasters: &[Raster], cancel: &CancelToken) -> Result<Raster> {
    if rasters.is_empty() {
        return Err(AnalysisError::empty("no rasters to average"));
    }
    let refs: Vec<&Raster> = rasters.iter().collect();
    reduce_rasters(name, &refs, None, CompositeReducer::Mean, cancel)
}

fn reduce_rasters(
    name: &str,
    rasters: &[&Raster],
    bands: Option<&[String]>,
    reducer: CompositeReducer,
    cancel: &CancelToken,
) -> Result<Raster> {
    let first = rasters[0];
    if let Some(other) = rasters.iter().find(|r| r.grid != first.grid) {
        return Err(AnalysisError::config(format!(
            "raster '{}' is not on the same grid as '{}'",
            other.name, first.name
        )));
    }
    let band_names: Vec<String> = match bands {
        Some(b) => b.to_vec(),
        None => first.band_names().into_iter().map(String::from).collect(),
    };

    let mut out = Raster::new(name, first.grid);
    let mut stack = Vec::with_capacity(rasters.len());
    for band_name in &band_names {
        let sources = rasters.iter().map(|r| r.require_band(band_name)).collect::<Result<Vec<_>>>()?;
        let mut data = Vec::with_capacity(first.grid.len());
        for i in 0..first.grid.len() {
            if i % 65_536 == 0 {
                cancel.check()?;
            }
            stack.clear();
            stack.extend(sources.iter().map(|b| b.data[i]).filter(|v| !v.is_nan()));
            data.push(match reducer {
                CompositeReducer::Median => median_f32(&mut stack),
                CompositeReducer::Mean => mean_f32(&stack),
            });
        }
        out.push_band(Band { name: band_name.clone(), data })?;
    }
    Ok(out)
}

/// Median of the non-NaN samples; `NaN` when none remain. Even counts average
/// the two central values.
pub(crate) fn median_f32(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        return f32::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn mean_f32(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
}
