//! Study orchestrator: runs every configured stage in data-dependency order.
//!
//! Stages that run out of data (no scene in a window, no sample candidate) are
//! recorded as notes and the remaining stages still run. Configuration errors
//! and cancellation abort the whole study.

use serde::{Deserialize, Serialize};

use crate::aggregate::water_area_with;
use crate::bands::{indices, BandExpression};
use crate::cancel::CancelToken;
use crate::composite::{composite, mean_of, CompositeReducer, DateRange, ImagerySource, QualityFilter};
use crate::config::{ExtentStudy, HistoricalStudy, QualityStudy, StudyConfig, WaterIndex};
use crate::error::{AnalysisError, Result};
use crate::harness::{EvaluationRun, Task};
use crate::probe::point_series;
use crate::raster::Raster;
use crate::report::{AreaRow, ForecastCheck, SampleSummary, StudyReport, TransitionReport, TrendReport};
use crate::sampler::{random_sample, stratified_sample_with, LabeledPoint};
use crate::series::{SourceTag, TimeKey, TimeSeries};
use crate::stats::{correlation_matrix, describe};
use crate::trend::{fit, mape, transition_summary_with, Reclassifier};

/// One year of an external categorical water-history raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalLayer {
    pub year: i32,
    pub raster: Raster,
}

/// The main study orchestrator.
#[derive(Debug, Clone)]
pub struct StudyRunner {
    config: StudyConfig,
    cancel: CancelToken,
}

impl StudyRunner {
    pub fn new(config: StudyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cancel: CancelToken::new() })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// Run the study.
    ///
    /// Stage order:
    ///   1. Surface-water extent (composite → index → area, optional classifiers)
    ///   2. Historical water layers
    ///   3. Merge area series and fit trends
    ///   4. Water-quality regression and point probe
    pub fn run(&self, source: &dyn ImagerySource, historical: &[HistoricalLayer]) -> Result<StudyReport> {
        self.cancel.check()?;
        let mut report = StudyReport { study: self.config.name.clone(), ..StudyReport::default() };
        log::info!("running study '{}'", self.config.name);

        // ── 1. Extent ───────────────────────────────────────────────────────
        let mut imagery_rows = Vec::new();
        if let Some(extent) = &self.config.extent {
            imagery_rows = self.extent_stage(extent, source, &mut report)?;
        }

        // ── 2. Historical layers ────────────────────────────────────────────
        let mut historical_rows = Vec::new();
        if let Some(h) = &self.config.historical {
            historical_rows = self.historical_stage(h, historical, &mut report)?;
        }

        // ── 3. Series and trends ────────────────────────────────────────────
        let imagery = crate::report::area_series(&imagery_rows)?;
        let history = crate::report::area_series(&historical_rows)?;
        let merged = imagery.merge(&history)?;
        let mut rows: Vec<AreaRow> = imagery_rows.into_iter().chain(historical_rows).collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date));
        report.area_series = rows;
        self.trend_stage(&merged, &mut report)?;

        // ── 4. Water quality ────────────────────────────────────────────────
        if let Some(q) = &self.config.quality {
            self.quality_stage(q, source, &mut report)?;
        }

        log::info!(
            "study '{}' done: {} area rows, {} trends, {} notes",
            self.config.name,
            report.area_series.len(),
            report.trends.len(),
            report.notes.len()
        );
        Ok(report)
    }

    // ── Stage helpers ───────────────────────────────────────────────────────

    fn composite_window(
        &self,
        source: &dyn ImagerySource,
        range: &DateRange,
        filter: &QualityFilter,
        reducer: CompositeReducer,
    ) -> Result<Option<Raster>> {
        let scenes = source.query(range, Some(&self.config.region), filter)?;
        composite(&scenes, range, filter, None, reducer, &self.cancel)
    }

    fn extent_expressions(&self, extent: &ExtentStudy) -> Result<Vec<BandExpression>> {
        let sensor = &self.config.sensor;
        let index = match extent.water_index {
            WaterIndex::Ndwi => indices::ndwi(sensor),
            WaterIndex::Mndwi => indices::mndwi(sensor)?,
        };
        let mask = indices::water_mask(&index.name, extent.threshold);
        Ok([index, mask].into_iter().chain(extent.expressions.iter().cloned()).collect())
    }

    fn extent_stage(
        &self,
        extent: &ExtentStudy,
        source: &dyn ImagerySource,
        report: &mut StudyReport,
    ) -> Result<Vec<AreaRow>> {
        let expressions = self.extent_expressions(extent)?;
        let mut rows = Vec::with_capacity(extent.windows.len());
        let mut derived: Vec<(TimeKey, Raster)> = Vec::new();

        for window in &extent.windows {
            let Some(raster) = self.composite_window(source, &window.range, &extent.filter, extent.reducer)? else {
                report.notes.push(format!("no qualifying scenes for extent window {}", window.time));
                rows.push(AreaRow {
                    date: window.time,
                    area_km2: None,
                    resolution_m: extent.resolution_m,
                    source_tag: SourceTag::imagery(),
                });
                continue;
            };
            let raster = raster.with_derived(&expressions)?;
            let area = water_area_with(&raster, "water", &self.config.region, extent.resolution_m, &self.cancel)?;
            log::info!("window {}: {:?} km² at {} m", window.time, area.area_km2, area.resolution_m);
            rows.push(AreaRow {
                date: window.time,
                area_km2: area.area_km2,
                resolution_m: area.resolution_m,
                source_tag: SourceTag::imagery(),
            });
            derived.push((window.time, raster));
        }

        if extent.transition && derived.len() >= 2 {
            let (from_t, from) = &derived[0];
            let (to_t, to) = &derived[derived.len() - 1];
            let summary = transition_summary_with(
                from,
                "water",
                to,
                "water",
                &self.config.region,
                extent.resolution_m,
                &Reclassifier::Threshold { at: 0.5 },
                &self.cancel,
            )?;
            report.transitions.push(TransitionReport {
                from: *from_t,
                to: *to_t,
                source_tag: SourceTag::imagery(),
                summary,
            });
        } else if extent.transition {
            report.notes.push("extent transition skipped: fewer than two windows have data".into());
        }

        if let Some(m) = &extent.classification {
            let find = |t: &TimeKey| derived.iter().find(|(k, _)| k == t).map(|(_, r)| r);
            match (find(&m.train_window), find(&m.validate_window)) {
                (Some(train), Some(validate)) => {
                    let sample = |r: &Raster, seed: u64| {
                        stratified_sample_with(
                            r,
                            "water",
                            &m.feature_bands,
                            &self.config.region,
                            m.points_per_class,
                            m.resolution_m,
                            seed,
                            &self.cancel,
                        )
                    };
                    match sample(train, m.seed).and_then(|t| Ok((t, sample(validate, m.seed.wrapping_add(1))?))) {
                        Ok((training, validation)) => {
                            let run = EvaluationRun::new(&training, m.feature_bands.clone(), Task::Classification, m.models.clone())?
                                .with_cancel(self.cancel.clone());
                            let validated = run.train()?.validate(&validation)?;
                            match validated.classify(validate, m.classify_with.as_deref()) {
                                Ok(classified) => report.classified = Some(classified),
                                Err(AnalysisError::NotReady) => return Err(AnalysisError::NotReady),
                                Err(e) => report.notes.push(format!("no classified raster: {e}")),
                            }
                            report.models = validated.report();
                        }
                        Err(e) if e.is_empty_input() => report.notes.push(format!("water classification skipped: {e}")),
                        Err(e) => return Err(e),
                    }
                }
                _ => report.notes.push("water classification skipped: a classification window has no composite".into()),
            }
        }
        Ok(rows)
    }

    fn historical_stage(
        &self,
        h: &HistoricalStudy,
        layers: &[HistoricalLayer],
        report: &mut StudyReport,
    ) -> Result<Vec<AreaRow>> {
        if layers.is_empty() {
            report.notes.push("historical section configured but no layers supplied".into());
            return Ok(Vec::new());
        }
        let mut rows = Vec::with_capacity(layers.len());
        for layer in layers {
            self.cancel.check()?;
            let raw = layer.raster.require_band(&h.band)?;
            let mask: Vec<f32> = raw
                .data
                .iter()
                .map(|&v| match h.reclassifier.code(v) {
                    Some(c) if h.water_codes.contains(&c) => 1.0,
                    Some(_) => 0.0,
                    None => f32::NAN,
                })
                .collect();
            let masked = Raster::new(layer.raster.name.clone(), layer.raster.grid).with_band("water", mask)?;
            let area = water_area_with(&masked, "water", &self.config.region, h.resolution_m, &self.cancel)?;
            rows.push(AreaRow {
                date: TimeKey::Year(layer.year),
                area_km2: area.area_km2,
                resolution_m: area.resolution_m,
                source_tag: SourceTag::historical(),
            });
        }

        if let Some((from_year, to_year)) = h.transition {
            let find = |y: i32| layers.iter().find(|l| l.year == y);
            match (find(from_year), find(to_year)) {
                (Some(a), Some(b)) => {
                    let summary = transition_summary_with(
                        &a.raster,
                        &h.band,
                        &b.raster,
                        &h.band,
                        &self.config.region,
                        h.resolution_m,
                        &h.reclassifier,
                        &self.cancel,
                    )?;
                    report.transitions.push(TransitionReport {
                        from: TimeKey::Year(from_year),
                        to: TimeKey::Year(to_year),
                        source_tag: SourceTag::historical(),
                        summary,
                    });
                }
                _ => report.notes.push(format!("no historical layer for transition {from_year} → {to_year}")),
            }
        }
        Ok(rows)
    }

    fn trend_stage(&self, merged: &TimeSeries, report: &mut StudyReport) -> Result<()> {
        let mut sources: Vec<SourceTag> = merged.entries().iter().map(|e| e.source.clone()).collect();
        sources.sort();
        sources.dedup();
        let mut series: Vec<(String, TimeSeries)> =
            sources.iter().map(|s| (s.to_string(), merged.filter_source(s))).collect();
        if sources.len() > 1 {
            series.push(("combined".into(), merged.clone()));
        }

        for (name, s) in &series {
            let points = s.points();
            let times: Vec<TimeKey> = s.entries().iter().filter(|e| e.value.is_some()).map(|e| e.time).collect();
            for &estimator in &self.config.trend.estimators {
                match fit(estimator, &points) {
                    Ok(f) => report.trends.push(TrendReport { series: name.clone(), fit: f }),
                    Err(AnalysisError::DegenerateStatistic(why)) => {
                        report.notes.push(format!("no {estimator:?} trend for '{name}': {why}"))
                    }
                    Err(e) => return Err(e),
                }
                if self.config.trend.holdout_last && points.len() >= 3 {
                    let (head, last) = points.split_at(points.len() - 1);
                    if let Ok(f) = fit(estimator, head) {
                        let (t, actual) = last[0];
                        let predicted = f.predict(t);
                        report.forecasts.push(ForecastCheck {
                            series: name.clone(),
                            estimator,
                            time: times[times.len() - 1],
                            predicted,
                            actual,
                            mape: mape(&[actual], &[predicted]).ok(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn quality_expressions(&self, q: &QualityStudy) -> Result<Vec<BandExpression>> {
        let sensor = &self.config.sensor;
        let mut out = vec![
            indices::ndci(sensor)?,
            indices::ndwi(sensor),
            indices::turbidity_proxy(sensor, q.turbidity_scale.unwrap_or(1.0)),
        ];
        if let Some(c) = &self.config.calibration {
            out.push(indices::chlorophyll(c)?);
        }
        out.extend(q.expressions.iter().cloned());
        Ok(out)
    }

    fn quality_stage(&self, q: &QualityStudy, source: &dyn ImagerySource, report: &mut StudyReport) -> Result<()> {
        let expressions = self.quality_expressions(q)?;

        let mut seasons = Vec::with_capacity(q.training_seasons.len());
        for range in &q.training_seasons {
            match self.composite_window(source, range, &q.filter, CompositeReducer::Median)? {
                Some(r) => seasons.push(r.with_derived(&expressions)?),
                None => report.notes.push(format!("no qualifying scenes for season {}..{}", range.start, range.end)),
            }
        }
        let validation = self
            .composite_window(source, &q.validation_season, &q.filter, CompositeReducer::Median)?
            .map(|r| r.with_derived(&expressions))
            .transpose()?;

        if let Some(probe) = &q.probe {
            let window = probe.point.window()?;
            let scenes = source.query(&probe.range, Some(&window), &probe.filter)?;
            report.probe = point_series(&scenes, &probe.point, &probe.range, &probe.filter, &expressions, &probe.outputs, &self.cancel)?;
        }

        let Some(validation) = validation.filter(|_| !seasons.is_empty()) else {
            report.notes.push("water-quality models skipped: missing training or validation composite".into());
            return Ok(());
        };
        let training = mean_of("training", &seasons, &self.cancel)?;

        let sample = |r: &Raster, seed: u64| {
            random_sample(r, &q.label_band, &q.feature_bands, &self.config.region, q.num_points, q.resolution_m, seed)
        };
        let (train_pts, valid_pts) = match sample(&training, q.seed).and_then(|t| Ok((t, sample(&validation, q.seed.wrapping_add(1))?))) {
            Ok(pair) => pair,
            Err(e) if e.is_empty_input() => {
                report.notes.push(format!("water-quality models skipped: {e}"));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        report.quality_sample = summarise(&q.label_band, &q.feature_bands, &train_pts)?;

        let task = Task::Regression { ladder: q.ladder.clone() };
        let run = EvaluationRun::new(&train_pts, q.feature_bands.clone(), task, q.models.clone())?.with_cancel(self.cancel.clone());
        report.quality_models = run.train()?.validate(&valid_pts)?.report();
        Ok(())
    }
}

/// Describe the label and every feature column, plus their correlations.
fn summarise(label: &str, features: &[String], points: &[LabeledPoint]) -> Result<Option<SampleSummary>> {
    let mut columns: Vec<(String, Vec<f64>)> = vec![(label.to_string(), points.iter().map(|p| p.label.as_f64()).collect())];
    for (i, f) in features.iter().enumerate() {
        columns.push((f.clone(), points.iter().map(|p| p.features[i]).collect()));
    }
    let mut summaries = Vec::with_capacity(columns.len());
    for (name, values) in &columns {
        match describe(name, values) {
            Ok(s) => summaries.push(s),
            Err(e) if e.is_empty_input() => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(Some(SampleSummary { columns: summaries, correlation: correlation_matrix(&columns)? }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::SceneArchive;
    use crate::sampler::Label;

    const QUALITY_ONLY: &str = r#"{
        "name": "empty",
        "region": {"rectangle": [0, 0, 1000, 1000], "crs": "projected"},
        "sensor": {"green": "B3", "red": "B4", "red_edge": "B5", "nir": "B8"},
        "quality": {
            "training_seasons": [{"start": "2020-06-01", "end": "2020-09-30"}],
            "validation_season": {"start": "2021-06-01", "end": "2021-09-30"},
            "filter": {"max_cloud_cover": 10},
            "label_band": "Turbidity",
            "feature_bands": ["NDCI"],
            "num_points": 10,
            "resolution_m": 100,
            "seed": 1,
            "models": [{"name": "cart", "classifier": {"family": "cart"}}]
        }
    }"#;

    #[test]
    fn empty_archive_yields_notes_not_errors() {
        let config = StudyConfig::from_json(QUALITY_ONLY).unwrap();
        let report = StudyRunner::new(config).unwrap().run(&SceneArchive::default(), &[]).unwrap();
        assert!(report.quality_models.is_empty());
        assert!(report.area_series.is_empty());
        assert!(report.notes.iter().any(|n| n.contains("water-quality models skipped")));
    }

    #[test]
    fn historical_area_counts_water_codes_once() {
        let config = StudyConfig::from_json(
            r#"{
                "name": "jrc",
                "region": {"rectangle": [0, 0, 4000, 1000], "crs": "projected"},
                "sensor": {"green": "B3", "red": "B4", "nir": "B8"},
                "historical": {
                    "band": "waterClass",
                    "reclassifier": {"kind": "identity", "no_data": [0]},
                    "water_codes": [2, 3],
                    "resolution_m": 1000
                }
            }"#,
        )
        .unwrap();
        let grid = crate::raster::GridSpec::new(
            4,
            1,
            crate::geo::Bounds::new(0.0, 0.0, 4000.0, 1000.0),
            crate::geo::Crs::Projected,
        )
        .unwrap();
        let layer = HistoricalLayer {
            year: 2010,
            raster: Raster::new("jrc", grid).with_band("waterClass", vec![1.0, 3.0, 2.0, 0.0]).unwrap(),
        };
        let report = StudyRunner::new(config).unwrap().run(&SceneArchive::default(), &[layer]).unwrap();
        let row = &report.area_series[0];
        assert_eq!(row.area_km2, Some(2.0), "codes 2 and 3 are one km² each, not their code value");
        assert_eq!(row.source_tag, SourceTag::historical());
    }

    #[test]
    fn summary_lists_label_first() {
        let points: Vec<LabeledPoint> = (0..5)
            .map(|i| LabeledPoint { x: 0.0, y: 0.0, features: vec![i as f64], label: Label::Value(2.0 * i as f64) })
            .collect();
        let s = summarise("chl", &["ndci".to_string()], &points).unwrap().unwrap();
        assert_eq!(s.columns[0].name, "chl");
        assert_eq!(s.columns[1].count, 5);
        assert!((s.correlation.get("chl", "ndci").unwrap() - 1.0).abs() < 1e-12);
    }
}
