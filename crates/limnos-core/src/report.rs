//! Plain structured results for a reporting consumer. Nothing here formats,
//! prints or persists; the records serialise to JSON as they are.

use serde::{Deserialize, Serialize};

use crate::harness::ModelReport;
use crate::probe::ProbeRow;
use crate::raster::Raster;
use crate::series::{SeriesEntry, SourceTag, TimeKey, TimeSeries};
use crate::stats::{ColumnSummary, CorrelationMatrix};
use crate::trend::{Estimator, LinearFit, TransitionSummary};

/// One area measurement. `area_km2` is `None` when the window had no usable data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRow {
    pub date: TimeKey,
    pub area_km2: Option<f64>,
    pub resolution_m: f64,
    pub source_tag: SourceTag,
}

impl AreaRow {
    pub fn entry(&self) -> SeriesEntry {
        SeriesEntry::new(self.date, self.area_km2, self.source_tag.clone())
    }
}

/// Area rows as a time series, rejecting duplicate dates.
pub fn area_series(rows: &[AreaRow]) -> crate::error::Result<TimeSeries> {
    TimeSeries::from_entries(rows.iter().map(AreaRow::entry).collect())
}

/// A fitted trend over one series, `series` naming a source tag or `combined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub series: String,
    pub fit: LinearFit,
}

/// A trend fitted without its last point, scored against that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastCheck {
    pub series: String,
    pub estimator: Estimator,
    pub time: TimeKey,
    pub predicted: f64,
    pub actual: f64,
    /// Percent; `None` when the actual value is zero.
    pub mape: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReport {
    pub from: TimeKey,
    pub to: TimeKey,
    pub source_tag: SourceTag,
    pub summary: TransitionSummary,
}

/// Sample description for the water-quality regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub columns: Vec<ColumnSummary>,
    pub correlation: CorrelationMatrix,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudyReport {
    pub study: String,
    /// Sorted by date; imagery and historical rows merged.
    pub area_series: Vec<AreaRow>,
    pub trends: Vec<TrendReport>,
    pub forecasts: Vec<ForecastCheck>,
    /// Water/land classifiers.
    pub models: Vec<ModelReport>,
    /// Water-quality regressors.
    pub quality_models: Vec<ModelReport>,
    pub quality_sample: Option<SampleSummary>,
    /// Class raster produced by the chosen water classifier.
    pub classified: Option<Raster>,
    pub transitions: Vec<TransitionReport>,
    pub probe: Vec<ProbeRow>,
    /// Stages skipped for lack of data, in the order they occurred.
    pub notes: Vec<String>,
}
