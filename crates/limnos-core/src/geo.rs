/// Coordinate reference systems, bounds, and region polygons.
/// All coordinate math uses f64 for precision.
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Nominal metres per degree, used to express a metric resolution as degrees.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// How grid coordinates map onto the ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crs {
    /// Longitude/latitude in degrees on a spherical Earth.
    #[default]
    Geographic,
    /// Planar, equal-area coordinates in metres.
    Projected,
}

impl Crs {
    /// Ground area (m²) of the axis-aligned cell `[x0, x1] × [y0, y1]`.
    ///
    /// Geographic cells use the spherical zone formula
    ///   A = R² · Δλ · |sin φ₁ − sin φ₀|
    /// so the same angular cell shrinks toward the poles.
    pub fn cell_area_m2(self, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
        match self {
            Crs::Geographic => {
                let d_lambda = (x1 - x0).abs().to_radians();
                let band = (y1.to_radians().sin() - y0.to_radians().sin()).abs();
                EARTH_RADIUS_M * EARTH_RADIUS_M * d_lambda * band
            }
            Crs::Projected => ((x1 - x0) * (y1 - y0)).abs(),
        }
    }

    /// Convert a resolution in metres to a step in this CRS's units.
    pub fn metres_to_units(self, metres: f64) -> f64 {
        match self {
            Crs::Geographic => metres / METRES_PER_DEGREE,
            Crs::Projected => metres,
        }
    }

    /// Convert a step in this CRS's units to metres.
    pub fn units_to_metres(self, units: f64) -> f64 {
        match self {
            Crs::Geographic => units * METRES_PER_DEGREE,
            Crs::Projected => units,
        }
    }
}

/// Axis-aligned extent. For `Crs::Geographic`, x is longitude and y latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y].iter().all(|v| v.is_finite())
            && self.max_x > self.min_x
            && self.max_y > self.min_y
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

// ── Region ────────────────────────────────────────────────────────────────────

/// Serialized forms accepted for a region in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RegionDef {
    Rectangle {
        rectangle: [f64; 4],
        #[serde(default)]
        crs: Crs,
    },
    Polygon {
        vertices: Vec<[f64; 2]>,
        #[serde(default)]
        crs: Crs,
    },
}

/// An immutable polygon used to crop rasters and bound aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegionDef", into = "RegionDef")]
pub struct Region {
    vertices: Vec<[f64; 2]>,
    crs: Crs,
    bounds: Bounds,
}

impl Region {
    /// Build a region from its vertex ring. The ring may be open or closed.
    pub fn polygon(vertices: Vec<[f64; 2]>, crs: Crs) -> Result<Self> {
        let mut vertices = vertices;
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(AnalysisError::config(format!(
                "region needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err(AnalysisError::config("region has non-finite vertex coordinates"));
        }
        if shoelace_area(&vertices).abs() < f64::EPSILON {
            return Err(AnalysisError::config("region polygon has zero area"));
        }
        let bounds = vertices.iter().fold(
            Bounds::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |b, [x, y]| Bounds::new(b.min_x.min(*x), b.min_y.min(*y), b.max_x.max(*x), b.max_y.max(*y)),
        );
        Ok(Self { vertices, crs, bounds })
    }

    /// Rectangle from `[min_x, min_y, max_x, max_y]`, the same ordering used by
    /// most catalogue tools for bounding boxes.
    pub fn rectangle(extent: [f64; 4], crs: Crs) -> Result<Self> {
        let [min_x, min_y, max_x, max_y] = extent;
        if !(max_x > min_x && max_y > min_y) {
            return Err(AnalysisError::config(format!(
                "rectangle {extent:?} must have max > min on both axes"
            )));
        }
        Self::polygon(
            vec![[min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y]],
            crs,
        )
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Even-odd ray-casting point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !self.bounds.contains(x, y) {
            return false;
        }
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

impl TryFrom<RegionDef> for Region {
    type Error = AnalysisError;

    fn try_from(def: RegionDef) -> Result<Self> {
        match def {
            RegionDef::Rectangle { rectangle, crs } => Region::rectangle(rectangle, crs),
            RegionDef::Polygon { vertices, crs } => Region::polygon(vertices, crs),
        }
    }
}

impl From<Region> for RegionDef {
    fn from(region: Region) -> Self {
        RegionDef::Polygon { vertices: region.vertices, crs: region.crs }
    }
}

fn shoelace_area(vertices: &[[f64; 2]]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let [x0, y0] = vertices[i];
            let [x1, y1] = vertices[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum::<f64>()
        / 2.0
}
