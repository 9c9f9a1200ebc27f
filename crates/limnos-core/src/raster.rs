use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::geo::{Bounds, Crs};

/// Grid shared by every band of a [`Raster`]: row-major, row 0 = min-y edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridSpecDef")]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub bounds: Bounds,
    pub crs: Crs,
}

#[derive(Deserialize)]
struct GridSpecDef {
    width: usize,
    height: usize,
    bounds: Bounds,
    #[serde(default)]
    crs: Crs,
}

impl TryFrom<GridSpecDef> for GridSpec {
    type Error = AnalysisError;

    fn try_from(def: GridSpecDef) -> Result<Self> {
        GridSpec::new(def.width, def.height, def.bounds, def.crs)
    }
}

impl GridSpec {
    pub fn new(width: usize, height: usize, bounds: Bounds, crs: Crs) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AnalysisError::config(format!("grid must be non-empty, got {width}×{height}")));
        }
        if !bounds.is_valid() {
            return Err(AnalysisError::config(format!("grid bounds {bounds:?} are degenerate")));
        }
        Ok(Self { width, height, bounds, crs })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel size along x, in CRS units.
    pub fn pixel_width(&self) -> f64 {
        self.bounds.width() / self.width as f64
    }

    /// Pixel size along y, in CRS units.
    pub fn pixel_height(&self) -> f64 {
        self.bounds.height() / self.height as f64
    }

    /// Finest resolution (metres) this grid can honestly support.
    pub fn native_resolution_m(&self) -> f64 {
        self.crs
            .units_to_metres(self.pixel_width())
            .min(self.crs.units_to_metres(self.pixel_height()))
    }

    /// Row-major index of the pixel containing `(x, y)`, or `None` outside the grid.
    pub fn index_of(&self, x: f64, y: f64) -> Option<usize> {
        if !self.bounds.contains(x, y) {
            return None;
        }
        let col = ((x - self.bounds.min_x) / self.pixel_width()).floor() as usize;
        let row = ((y - self.bounds.min_y) / self.pixel_height()).floor() as usize;
        Some(row.min(self.height - 1) * self.width + col.min(self.width - 1))
    }

    /// Centre coordinates of pixel `(row, col)`.
    pub fn pixel_centre(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.bounds.min_x + (col as f64 + 0.5) * self.pixel_width(),
            self.bounds.min_y + (row as f64 + 0.5) * self.pixel_height(),
        )
    }

    /// Per-pixel ground area in m². Under `Crs::Geographic` rows nearer the
    /// poles get smaller values; every column in a row shares one area.
    pub fn pixel_area_grid(&self) -> Vec<f64> {
        let pw = self.pixel_width();
        let ph = self.pixel_height();
        let mut out = Vec::with_capacity(self.len());
        for row in 0..self.height {
            let y0 = self.bounds.min_y + row as f64 * ph;
            let area = self.crs.cell_area_m2(0.0, pw, y0, y0 + ph);
            out.extend(std::iter::repeat(area).take(self.width));
        }
        out
    }
}

/// Treat JSON `null` as a no-data sample.
fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

/// One named layer of samples. `NaN` marks no data; masks hold 1.0 / 0.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
}

/// A named, multi-band raster. Every band has exactly `grid.len()` samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RasterDef")]
pub struct Raster {
    pub name: String,
    pub grid: GridSpec,
    bands: Vec<Band>,
}

#[derive(Deserialize)]
struct RasterDef {
    name: String,
    grid: GridSpec,
    bands: Vec<Band>,
}

impl TryFrom<RasterDef> for Raster {
    type Error = AnalysisError;

    fn try_from(def: RasterDef) -> Result<Self> {
        let mut raster = Raster::new(def.name, def.grid);
        for band in def.bands {
            raster.push_band(band)?;
        }
        Ok(raster)
    }
}

impl Raster {
    /// An empty raster (no bands yet) on `grid`.
    pub fn new(name: impl Into<String>, grid: GridSpec) -> Self {
        Self { name: name.into(), grid, bands: Vec::new() }
    }

    /// A raster with a single band filled with `fill`.
    pub fn filled(name: impl Into<String>, grid: GridSpec, band: &str, fill: f32) -> Self {
        let mut r = Self::new(name, grid);
        r.bands.push(Band { name: band.to_string(), data: vec![fill; grid.len()] });
        r
    }

    /// Append a band, replacing any existing band of the same name.
    pub fn push_band(&mut self, band: Band) -> Result<()> {
        if band.data.len() != self.grid.len() {
            return Err(AnalysisError::config(format!(
                "band '{}' has {} samples, grid needs {}",
                band.name,
                band.data.len(),
                self.grid.len()
            )));
        }
        match self.bands.iter_mut().find(|b| b.name == band.name) {
            Some(existing) => *existing = band,
            None => self.bands.push(band),
        }
        Ok(())
    }

    /// Builder form of [`Raster::push_band`].
    pub fn with_band(mut self, name: &str, data: Vec<f32>) -> Result<Self> {
        self.push_band(Band { name: name.to_string(), data })?;
        Ok(self)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    /// Like [`Raster::band`] but a missing band is a configuration error.
    pub fn require_band(&self, name: &str) -> Result<&Band> {
        self.band(name).ok_or_else(|| {
            AnalysisError::config(format!(
                "raster '{}' has no band '{name}' (available: {:?})",
                self.name,
                self.band_names()
            ))
        })
    }

    /// Keep only the named bands, in the order given.
    pub fn select(&self, names: &[String]) -> Result<Raster> {
        let mut out = Raster::new(self.name.clone(), self.grid);
        for name in names {
            out.bands.push(self.require_band(name)?.clone());
        }
        Ok(out)
    }

    /// Nearest-pixel lookup of `band` at `(x, y)`.
    /// Returns `None` outside the grid; inside, the value may be `NaN` (no data).
    pub fn sample(&self, band: &Band, x: f64, y: f64) -> Option<f32> {
        self.grid.index_of(x, y).map(|i| band.data[i])
    }

    /// Fraction of pixels in `band` that hold data.
    pub fn valid_fraction(&self, band: &Band) -> f64 {
        let valid = band.data.iter().filter(|v| !v.is_nan()).count();
        valid as f64 / self.grid.len() as f64
    }
}
