//! Study configuration. Every threshold, window, calibration, sample size and
//! model lives here; nothing in the pipeline is hard-coded.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::bands::{BandExpression, Calibration, SensorBands};
use crate::composite::{CompositeReducer, DateRange, QualityFilter};
use crate::error::{AnalysisError, Result};
use crate::geo::Region;
use crate::harness::metrics::BucketLadder;
use crate::harness::ModelSpec;
use crate::probe::ProbePoint;
use crate::series::TimeKey;
use crate::trend::{Estimator, Reclassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterIndex {
    /// Green vs NIR.
    #[default]
    Ndwi,
    /// Green vs SWIR; needs a sensor with a SWIR band.
    Mndwi,
}

/// One compositing window, reported under `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub time: TimeKey,
    pub range: DateRange,
}

fn default_threshold() -> f64 {
    0.0
}

/// Water classification of the split train/validate windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtentModels {
    pub train_window: TimeKey,
    pub validate_window: TimeKey,
    pub feature_bands: Vec<String>,
    pub points_per_class: usize,
    pub resolution_m: f64,
    pub seed: u64,
    pub models: Vec<ModelSpec>,
    /// Model used for the classified raster; the best-scoring one when absent.
    #[serde(default)]
    pub classify_with: Option<String>,
}

/// Surface-water extent from composited imagery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtentStudy {
    pub windows: Vec<Window>,
    pub filter: QualityFilter,
    #[serde(default)]
    pub water_index: WaterIndex,
    /// Pixels whose index exceeds this are water.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub resolution_m: f64,
    #[serde(default)]
    pub reducer: CompositeReducer,
    /// Extra derived bands, evaluated after the water index and mask.
    #[serde(default)]
    pub expressions: Vec<BandExpression>,
    #[serde(default)]
    pub classification: Option<ExtentModels>,
    /// Report a water/land transition between the first and last windows with data.
    #[serde(default)]
    pub transition: bool,
}

/// Point time series around one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeStudy {
    pub point: ProbePoint,
    pub range: DateRange,
    pub filter: QualityFilter,
    pub outputs: Vec<String>,
}

/// Water-quality regression: train on the mean of several seasons, validate on a later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStudy {
    pub training_seasons: Vec<DateRange>,
    pub validation_season: DateRange,
    pub filter: QualityFilter,
    pub label_band: String,
    pub feature_bands: Vec<String>,
    pub num_points: usize,
    pub resolution_m: f64,
    pub seed: u64,
    #[serde(default)]
    pub ladder: Option<BucketLadder>,
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub turbidity_scale: Option<f64>,
    /// Extra derived bands, evaluated after the built-in quality indices.
    #[serde(default)]
    pub expressions: Vec<BandExpression>,
    #[serde(default)]
    pub probe: Option<ProbeStudy>,
}

/// Yearly categorical water-history layers merged into the area series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStudy {
    pub band: String,
    /// Maps raw samples to class codes, e.g. `{"kind": "threshold", "at": 2}`.
    pub reclassifier: Reclassifier,
    /// Class codes counted as water; every other code is land.
    #[serde(default = "default_water_codes")]
    pub water_codes: Vec<u32>,
    pub resolution_m: f64,
    /// `(from_year, to_year)` for a transition summary.
    #[serde(default)]
    pub transition: Option<(i32, i32)>,
}

fn default_water_codes() -> Vec<u32> {
    vec![1]
}

fn default_estimators() -> Vec<Estimator> {
    vec![Estimator::Ols, Estimator::TheilSen]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStudy {
    #[serde(default = "default_estimators")]
    pub estimators: Vec<Estimator>,
    /// Fit without the last point, then score the extrapolation against it.
    #[serde(default)]
    pub holdout_last: bool,
}

impl Default for TrendStudy {
    fn default() -> Self {
        Self { estimators: default_estimators(), holdout_last: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub name: String,
    pub region: Region,
    pub sensor: SensorBands,
    #[serde(default)]
    pub calibration: Option<Calibration>,
    #[serde(default)]
    pub extent: Option<ExtentStudy>,
    #[serde(default)]
    pub quality: Option<QualityStudy>,
    #[serde(default)]
    pub historical: Option<HistoricalStudy>,
    #[serde(default)]
    pub trend: TrendStudy,
}

impl StudyConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: StudyConfig =
            serde_json::from_str(text).map_err(|e| AnalysisError::config(format!("study config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything the pipeline would trip over later.
    pub fn validate(&self) -> Result<()> {
        if self.extent.is_none() && self.quality.is_none() && self.historical.is_none() {
            return Err(AnalysisError::config("study has no extent, quality or historical section"));
        }
        if let Some(c) = &self.calibration {
            c.validate()?;
        }
        if let Some(extent) = &self.extent {
            self.validate_extent(extent)?;
        }
        if let Some(q) = &self.quality {
            self.validate_quality(q)?;
        }
        if let Some(h) = &self.historical {
            positive_resolution(h.resolution_m)?;
            h.reclassifier.validate()?;
            if h.water_codes.is_empty() {
                return Err(AnalysisError::config("historical study needs at least one water code"));
            }
        }
        if self.trend.estimators.is_empty() {
            return Err(AnalysisError::config("trend needs at least one estimator"));
        }
        Ok(())
    }

    fn validate_extent(&self, extent: &ExtentStudy) -> Result<()> {
        if extent.windows.is_empty() {
            return Err(AnalysisError::config("extent study needs at least one window"));
        }
        let mut times = BTreeSet::new();
        if let Some(dup) = extent.windows.iter().find(|w| !times.insert(w.time)) {
            return Err(AnalysisError::config(format!("window {} is listed twice", dup.time)));
        }
        for w in &extent.windows {
            ordered(&w.range)?;
        }
        positive_resolution(extent.resolution_m)?;
        unique_names(&extent.expressions)?;
        if extent.water_index == WaterIndex::Mndwi && self.sensor.swir.is_none() {
            return Err(AnalysisError::config("MNDWI needs a sensor with a SWIR band"));
        }
        if let Some(m) = &extent.classification {
            for w in [&m.train_window, &m.validate_window] {
                if !times.contains(w) {
                    return Err(AnalysisError::config(format!("classification window {w} is not an extent window")));
                }
            }
            if m.points_per_class == 0 {
                return Err(AnalysisError::config("points_per_class must be at least 1"));
            }
            positive_resolution(m.resolution_m)?;
            models_present(&m.models)?;
            if let Some(name) = &m.classify_with {
                if !m.models.iter().any(|s| &s.name == name) {
                    return Err(AnalysisError::config(format!("classify_with names unknown model '{name}'")));
                }
            }
        }
        Ok(())
    }

    fn validate_quality(&self, q: &QualityStudy) -> Result<()> {
        if q.training_seasons.is_empty() {
            return Err(AnalysisError::config("quality study needs at least one training season"));
        }
        for r in q.training_seasons.iter().chain([&q.validation_season]) {
            ordered(r)?;
        }
        if q.num_points == 0 {
            return Err(AnalysisError::config("num_points must be at least 1"));
        }
        positive_resolution(q.resolution_m)?;
        unique_names(&q.expressions)?;
        models_present(&q.models)?;
        if let Some(l) = &q.ladder {
            l.validate()?;
        }
        if self.sensor.red_edge.is_none() {
            return Err(AnalysisError::config("quality study needs a sensor with a red-edge band for NDCI"));
        }
        if q.label_band == "Chl_a" && self.calibration.is_none() {
            return Err(AnalysisError::config("label 'Chl_a' needs a chlorophyll calibration"));
        }
        Ok(())
    }
}

fn positive_resolution(r: f64) -> Result<()> {
    if r.is_finite() && r > 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::config(format!("resolution must be positive, got {r}")))
    }
}

fn unique_names(expressions: &[BandExpression]) -> Result<()> {
    let mut names = BTreeSet::new();
    match expressions.iter().find(|e| !names.insert(e.name.as_str())) {
        Some(dup) => Err(AnalysisError::config(format!("expression '{}' is defined twice", dup.name))),
        None => Ok(()),
    }
}

fn ordered(range: &DateRange) -> Result<()> {
    DateRange::new(range.start, range.end).map(|_| ())
}

fn models_present(models: &[ModelSpec]) -> Result<()> {
    if models.is_empty() {
        Err(AnalysisError::config("no models configured"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "name": "aral",
        "region": {"rectangle": [58.0, 43.0, 61.5, 46.5], "crs": "geographic"},
        "sensor": {"green": "SR_B3", "red": "SR_B4", "nir": "SR_B5", "swir": "SR_B6"},
        "extent": {
            "windows": [
                {"time": {"year": 2015}, "range": {"start": "2015-06-01", "end": "2015-09-30"}},
                {"time": {"year": 2020}, "range": {"start": "2020-06-01", "end": "2020-09-30"}}
            ],
            "filter": {"max_cloud_cover": 5},
            "water_index": "mndwi",
            "resolution_m": 1000
        }
    }"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let c = StudyConfig::from_json(MINIMAL).unwrap();
        let e = c.extent.as_ref().unwrap();
        assert_eq!(e.threshold, 0.0);
        assert_eq!(e.reducer, CompositeReducer::Median);
        assert_eq!(c.trend.estimators, vec![Estimator::Ols, Estimator::TheilSen]);
        assert!(c.calibration.is_none());
    }

    #[test]
    fn demo_studies_are_valid() {
        let aral = StudyConfig::from_json(include_str!("../../../demos/aral_sea.json")).unwrap();
        assert_eq!(aral.extent.as_ref().unwrap().classification.as_ref().unwrap().models.len(), 4);
        let olci = StudyConfig::from_json(include_str!("../../../demos/olci_lake_quality.json")).unwrap();
        assert!(olci.quality.as_ref().unwrap().probe.is_some());
    }

    #[test]
    fn validation_catches_inconsistent_sections() {
        let no_swir = MINIMAL.replace(r#", "swir": "SR_B6""#, "");
        assert!(matches!(StudyConfig::from_json(&no_swir), Err(AnalysisError::Configuration(_))));

        let zero_res = MINIMAL.replace(r#""resolution_m": 1000"#, r#""resolution_m": 0"#);
        assert!(StudyConfig::from_json(&zero_res).is_err());

        let dup = MINIMAL.replace(r#"{"year": 2020}"#, r#"{"year": 2015}"#);
        assert!(StudyConfig::from_json(&dup).is_err());

        let bad_region = MINIMAL.replace("[58.0, 43.0, 61.5, 46.5]", "[58.0, 43.0, 58.0, 46.5]");
        assert!(StudyConfig::from_json(&bad_region).is_err());
    }

    #[test]
    fn historical_needs_a_water_code() {
        let aral = include_str!("../../../demos/aral_sea.json");
        let c = StudyConfig::from_json(aral).unwrap();
        assert_eq!(c.historical.as_ref().unwrap().water_codes, vec![1]);

        let mut v: serde_json::Value = serde_json::from_str(aral).unwrap();
        v["historical"]["water_codes"] = serde_json::json!([]);
        assert!(matches!(StudyConfig::from_json(&v.to_string()), Err(AnalysisError::Configuration(_))));
    }
}
