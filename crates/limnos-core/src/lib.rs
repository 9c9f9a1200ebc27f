//! Remote-sensing analysis of inland water bodies: seasonal composites, water
//! indices and masks, surface-water area, stratified sampling, a multi-model
//! classifier/regressor harness, trend estimation and study orchestration.
//!
//! Rasters are in-memory; scenes come from any [`composite::ImagerySource`].
//! No-data is carried as `NaN` in rasters and `None` in results, never as zero.

pub mod aggregate;
pub mod bands;
pub mod cancel;
pub mod composite;
pub mod config;
pub mod error;
pub mod geo;
pub mod harness;
pub mod pipeline;
pub mod probe;
pub mod raster;
pub mod report;
pub mod sampler;
pub mod series;
pub mod stats;
pub mod trend;

pub use cancel::CancelToken;
pub use composite::{DateRange, ImagerySource, QualityFilter, Scene, SceneArchive};
pub use config::StudyConfig;
pub use error::{AnalysisError, Result};
pub use geo::{Bounds, Crs, Region};
pub use pipeline::{HistoricalLayer, StudyRunner};
pub use raster::{GridSpec, Raster};
pub use report::StudyReport;
pub use series::{SourceTag, TimeKey, TimeSeries};
