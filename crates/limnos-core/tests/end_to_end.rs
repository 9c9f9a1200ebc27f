//! Whole-pipeline checks on synthetic lakes with known answers.

use approx::assert_relative_eq;
use chrono::NaiveDate;

use limnos_core::aggregate::water_area;
use limnos_core::bands::{derive_bands, indices, SensorBands};
use limnos_core::harness::{ClassifierSpec, EvaluationRun, ModelSpec, Task};
use limnos_core::sampler::{class_counts, holdout_split, stratified_sample};
use limnos_core::series::SourceTag;
use limnos_core::stats::r_squared;
use limnos_core::trend::{fit, Estimator};
use limnos_core::{
    AnalysisError, Bounds, CancelToken, Crs, GridSpec, HistoricalLayer, Raster, Region, Scene, SceneArchive,
    StudyConfig, StudyRunner, TimeKey,
};

// ── Fixtures ────────────────────────────────────────────────────────────────

fn grid(width: usize, height: usize, pixel_m: f64) -> GridSpec {
    let bounds = Bounds::new(0.0, 0.0, width as f64 * pixel_m, height as f64 * pixel_m);
    GridSpec::new(width, height, bounds, Crs::Projected).unwrap()
}

fn in_block(row: usize, col: usize, lo: usize, hi: usize) -> bool {
    (lo..hi).contains(&row) && (lo..hi).contains(&col)
}

/// Sentinel-2 style reflectances: water is bright in green and dark in NIR/SWIR.
/// The red edge varies across the scene so NDCI (and so chlorophyll) has spread.
fn lake_raster(grid: GridSpec, water: impl Fn(usize, usize) -> bool) -> Raster {
    let n = grid.len();
    let (mut b3, mut b4, mut b5, mut b8, mut b11) =
        (Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n));
    for row in 0..grid.height {
        for col in 0..grid.width {
            let jitter = ((row * 7 + col * 3) % 10) as f32 * 0.002;
            if water(row, col) {
                b3.push(0.08 + jitter);
                b4.push(0.04);
                b5.push(0.04 + jitter * 2.0);
                b8.push(0.02);
                b11.push(0.01);
            } else {
                b3.push(0.05 + jitter);
                b4.push(0.06);
                b5.push(0.09 + jitter);
                b8.push(0.30);
                b11.push(0.25);
            }
        }
    }
    Raster::new("s2", grid)
        .with_band("B3", b3)
        .and_then(|r| r.with_band("B4", b4))
        .and_then(|r| r.with_band("B5", b5))
        .and_then(|r| r.with_band("B8", b8))
        .and_then(|r| r.with_band("B11", b11))
        .unwrap()
}

fn scene(id: &str, date: (i32, u32, u32), cloud_cover: f64, raster: Raster) -> Scene {
    Scene {
        id: id.into(),
        acquired: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        cloud_cover,
        raster,
    }
}

/// 10×10 km of 1 km pixels with a 6×6 km lake in the middle.
fn block_raster() -> Raster {
    lake_raster(grid(10, 10, 1000.0), |r, c| in_block(r, c, 2, 8))
}

fn block_region() -> Region {
    Region::rectangle([0.0, 0.0, 10_000.0, 10_000.0], Crs::Projected).unwrap()
}

fn forest(seed: u64) -> ClassifierSpec {
    ClassifierSpec::RandomForest { trees: 30, max_depth: 8, min_samples_leaf: 1, features_per_split: None, seed }
}

// ── Extent ──────────────────────────────────────────────────────────────────

#[test]
fn ndwi_mask_of_block_lake_measures_36_km2() {
    let sensor = SensorBands::sentinel2_msi();
    let ndwi = indices::ndwi(&sensor);
    let mask = indices::water_mask(&ndwi.name, 0.0);
    let derived = derive_bands(&block_raster(), &[ndwi, mask]).unwrap();
    let area = water_area(&derived, "water", &block_region(), 1000.0).unwrap();
    assert_relative_eq!(area.area_km2.unwrap(), 36.0, epsilon = 1e-9);
    assert_eq!(area.valid_cells, 100);
}

#[test]
fn classifiers_recover_block_lake() {
    let sensor = SensorBands::sentinel2_msi();
    let ndwi = indices::ndwi(&sensor);
    let mask = indices::water_mask(&ndwi.name, 0.0);
    let derived = derive_bands(&block_raster(), &[ndwi, mask]).unwrap();
    let features: Vec<String> = vec!["B3".into(), "B8".into(), "B11".into()];
    let region = block_region();

    let sample = stratified_sample(&derived, "water", &features, &region, 30, 1000.0, 42).unwrap();
    let (train, test) = holdout_split(&sample, 0.4, 7).unwrap();
    for p in &test {
        assert!(!train.iter().any(|t| (t.x, t.y) == (p.x, p.y)), "({}, {}) is in both sets", p.x, p.y);
    }
    let specs = vec![
        ModelSpec::new("rf", forest(7)),
        ModelSpec::new("cart", ClassifierSpec::Cart { max_depth: 6, min_samples_leaf: 1 }),
    ];
    let validated = EvaluationRun::new(&train, features, Task::Classification, specs)
        .unwrap()
        .train()
        .unwrap()
        .validate(&test)
        .unwrap();

    for report in validated.reports() {
        let metrics = report.classification.as_ref().unwrap();
        assert!(metrics.accuracy >= 0.95, "{} accuracy {}", report.model_name, metrics.accuracy);
        assert_eq!(metrics.confusion_matrix.total(), test.len() as u64);
    }
    let classified = validated.classify(&derived, None).unwrap();
    let class = classified.band("class").unwrap();
    let water = derived.band("water").unwrap();
    let agree = class.data.iter().zip(&water.data).filter(|(a, b)| a == b).count();
    assert!(agree >= 95, "only {agree}/100 pixels agree with the mask");
}

// ── Sampling ────────────────────────────────────────────────────────────────

#[test]
fn stratified_sampling_is_deterministic_and_balances_rare_class() {
    // 40×25 grid of 1 m pixels: 50 water pixels (5%) in the first two rows' left half.
    let g = grid(40, 25, 1.0);
    let mut label = vec![0.0f32; g.len()];
    for row in 0..2 {
        for col in 0..25 {
            label[row * 40 + col] = 1.0;
        }
    }
    let band: Vec<f32> = (0..g.len()).map(|i| i as f32).collect();
    let raster = Raster::new("strata", g).with_band("label", label).unwrap().with_band("f", band).unwrap();
    let region = Region::rectangle([0.0, 0.0, 40.0, 25.0], Crs::Projected).unwrap();
    let features = vec!["f".to_string()];

    let a = stratified_sample(&raster, "label", &features, &region, 50, 1.0, 42).unwrap();
    let b = stratified_sample(&raster, "label", &features, &region, 50, 1.0, 42).unwrap();
    assert_eq!(a, b);

    let counts = class_counts(&a);
    assert_eq!(counts[&0], 50);
    assert_eq!(counts[&1], 50);

    let c = stratified_sample(&raster, "label", &features, &region, 50, 1.0, 7).unwrap();
    assert_ne!(a, c, "a different seed should draw different majority-class points");
}

// ── Trends ──────────────────────────────────────────────────────────────────

#[test]
fn theil_sen_resists_an_outlier_that_pulls_ols() {
    let mut points: Vec<(f64, f64)> = (0..10).map(|x| (x as f64, 2.0 * x as f64 + 1.0)).collect();
    points[9].1 = 100.0;
    let robust = fit(Estimator::TheilSen, &points).unwrap();
    let ols = fit(Estimator::Ols, &points).unwrap();
    assert_relative_eq!(robust.slope, 2.0, epsilon = 1e-9);
    assert_relative_eq!(robust.intercept, 1.0, epsilon = 1e-9);
    assert!((ols.slope - 2.0).abs() > 1.0, "OLS slope {} should be pulled by the outlier", ols.slope);
}

#[test]
fn constant_observations_score_zero_r_squared() {
    let observed = [5.0; 6];
    assert_eq!(r_squared(&observed, &[5.0; 6]), 0.0);
    assert_eq!(r_squared(&observed, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 0.0);
    let flat: Vec<(f64, f64)> = (0..6).map(|x| (x as f64, 5.0)).collect();
    assert_eq!(fit(Estimator::Ols, &flat).unwrap().r_squared, 0.0);
}

// ── Full study ──────────────────────────────────────────────────────────────

const STUDY: &str = r#"{
    "name": "synthetic-lake",
    "region": {"rectangle": [0, 0, 10000, 10000], "crs": "projected"},
    "sensor": {"green": "B3", "red": "B4", "red_edge": "B5", "nir": "B8", "swir": "B11"},
    "calibration": {"name": "linear", "coefficients": [10.0, 50.0]},
    "extent": {
        "windows": [
            {"time": {"year": 2015}, "range": {"start": "2015-06-01", "end": "2015-09-30"}},
            {"time": {"year": 2016}, "range": {"start": "2016-06-01", "end": "2016-09-30"}},
            {"time": {"year": 2017}, "range": {"start": "2017-06-01", "end": "2017-09-30"}}
        ],
        "filter": {"max_cloud_cover": 20},
        "resolution_m": 1000,
        "transition": true,
        "classification": {
            "train_window": {"year": 2015},
            "validate_window": {"year": 2016},
            "feature_bands": ["B3", "B8", "B11"],
            "points_per_class": 25,
            "resolution_m": 1000,
            "seed": 42,
            "models": [
                {"name": "rf", "classifier": {"family": "random_forest", "trees": 30, "seed": 1}},
                {"name": "cart", "classifier": {"family": "cart", "max_depth": 6}},
                {"name": "broken", "classifier": {"family": "random_forest", "trees": 0}}
            ]
        }
    },
    "quality": {
        "training_seasons": [
            {"start": "2015-06-01", "end": "2015-09-30"},
            {"start": "2016-06-01", "end": "2016-09-30"}
        ],
        "validation_season": {"start": "2018-06-01", "end": "2018-09-30"},
        "filter": {"max_cloud_cover": 20},
        "label_band": "Chl_a",
        "feature_bands": ["NDCI", "Turbidity"],
        "num_points": 60,
        "resolution_m": 1000,
        "seed": 42,
        "ladder": {"edges": [5.0, 10.0]},
        "models": [
            {"name": "rf", "classifier": {"family": "random_forest", "trees": 50, "seed": 3}}
        ],
        "probe": {
            "point": {"x": 5500, "y": 5500, "crs": "projected", "buffer_m": 500},
            "range": {"start": "2015-01-01", "end": "2018-12-31"},
            "filter": {"max_cloud_cover": 20, "months": [8, 9]},
            "outputs": ["NDCI", "Turbidity"]
        }
    },
    "historical": {
        "band": "jrc",
        "reclassifier": {"kind": "threshold", "at": 2},
        "resolution_m": 1000,
        "transition": [2000, 2004]
    },
    "trend": {"holdout_last": true}
}"#;

fn archive() -> SceneArchive {
    let g = grid(10, 10, 1000.0);
    let lake = |r, c| in_block(r, c, 2, 8);
    SceneArchive::new(vec![
        scene("2015-a", (2015, 7, 2), 3.0, lake_raster(g, lake)),
        scene("2015-b", (2015, 8, 14), 8.0, lake_raster(g, lake)),
        // Too cloudy; would otherwise shrink the 2015 lake.
        scene("2015-c", (2015, 8, 20), 65.0, lake_raster(g, |r, c| in_block(r, c, 4, 6))),
        scene("2016-a", (2016, 8, 5), 1.0, lake_raster(g, lake)),
        scene("2018-a", (2018, 9, 1), 2.0, lake_raster(g, lake)),
    ])
}

/// Historical water: an 8×8 km lake in 2000 shrinking by 1 km a side each year.
fn history() -> Vec<HistoricalLayer> {
    let g = grid(10, 10, 1000.0);
    (2000..=2004)
        .map(|year| {
            let side = 8 - (year - 2000) as usize;
            let lo = (10 - side) / 2;
            let jrc: Vec<f32> = (0..100).map(|i| if in_block(i / 10, i % 10, lo, lo + side) { 2.0 } else { 1.0 }).collect();
            HistoricalLayer { year, raster: Raster::new(format!("jrc_{year}"), g).with_band("jrc", jrc).unwrap() }
        })
        .collect()
}

#[test]
fn full_study_runs_every_stage() {
    let config = StudyConfig::from_json(STUDY).unwrap();
    let report = StudyRunner::new(config).unwrap().run(&archive(), &history()).unwrap();

    // Area series: five historical years then three imagery windows, in time order.
    let times: Vec<TimeKey> = report.area_series.iter().map(|r| r.date).collect();
    assert_eq!(times.first(), Some(&TimeKey::Year(2000)));
    assert_eq!(times.last(), Some(&TimeKey::Year(2017)));
    assert_eq!(report.area_series.len(), 8);
    let area = |y: i32| report.area_series.iter().find(|r| r.date == TimeKey::Year(y)).unwrap();
    assert_relative_eq!(area(2000).area_km2.unwrap(), 64.0, epsilon = 1e-9);
    assert_eq!(area(2000).source_tag, SourceTag::historical());
    assert_relative_eq!(area(2015).area_km2.unwrap(), 36.0, epsilon = 1e-9);
    assert_eq!(area(2017).area_km2, None, "an empty window is no data, not zero");
    assert!(report.notes.iter().any(|n| n.contains("2017")));

    // Historical shrinkage gives a negative slope; the merged series gets its own fit.
    let hist = report
        .trends
        .iter()
        .find(|t| t.series == "historical" && t.fit.estimator == Estimator::Ols)
        .unwrap();
    assert!(hist.fit.slope < 0.0);
    assert!(report.trends.iter().any(|t| t.series == "combined"));
    assert!(report.forecasts.iter().any(|f| f.series == "historical" && f.time == TimeKey::Year(2004)));

    // Water classifiers: the bad spec fails alone.
    assert_eq!(report.models.len(), 3);
    for m in &report.models {
        if m.model_name == "broken" {
            assert!(!m.succeeded());
        } else {
            assert!(m.accuracy().unwrap() >= 0.95, "{} accuracy {:?}", m.model_name, m.accuracy());
            let cm = &m.classification.as_ref().unwrap().confusion_matrix;
            assert_eq!(cm.total(), m.n_validation as u64);
        }
    }
    assert!(report.classified.as_ref().unwrap().band("class").is_some());

    // Transitions: historical 2000 → 2004 lost 64 − 16 km² of water.
    let hist_transition = report.transitions.iter().find(|t| t.source_tag == SourceTag::historical()).unwrap();
    let lost = hist_transition.summary.get(1, 0).unwrap();
    assert_relative_eq!(lost.area_km2, 48.0, epsilon = 1e-9);
    let imagery_transition = report.transitions.iter().find(|t| t.source_tag == SourceTag::imagery()).unwrap();
    assert_eq!(imagery_transition.summary.changed_area_km2(), 0.0);

    // Water quality: chlorophyll is a function of NDCI, so the regressor should learn it.
    let quality = &report.quality_models[0];
    let reg = quality.regression.unwrap();
    assert!(reg.r2 > 0.5, "quality R² {}", reg.r2);
    assert!(quality.classification.is_some(), "ladder adds a confusion matrix");
    let summary = report.quality_sample.as_ref().unwrap();
    assert_eq!(summary.columns[0].name, "Chl_a");
    assert!(summary.correlation.get("Chl_a", "NDCI").unwrap() > 0.99);

    // Probe: only the August/September scenes, inside the lake.
    let probe_dates: Vec<NaiveDate> = report.probe.iter().map(|r| r.date).collect();
    assert_eq!(
        probe_dates,
        vec![
            NaiveDate::from_ymd_opt(2015, 8, 14).unwrap(),
            NaiveDate::from_ymd_opt(2016, 8, 5).unwrap(),
            NaiveDate::from_ymd_opt(2018, 9, 1).unwrap(),
        ]
    );
    assert!(report.probe.iter().all(|r| r.values.contains_key("NDCI")));
}

#[test]
fn same_inputs_give_the_same_report() {
    let run = || {
        let config = StudyConfig::from_json(STUDY).unwrap();
        let report = StudyRunner::new(config).unwrap().run(&archive(), &history()).unwrap();
        serde_json::to_string(&report).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn cancelled_study_reports_not_ready() {
    let config = StudyConfig::from_json(STUDY).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = StudyRunner::new(config).unwrap().with_cancel(cancel).run(&archive(), &history());
    assert_eq!(result.unwrap_err(), AnalysisError::NotReady);
}

#[test]
fn overlapping_sources_that_disagree_are_rejected() {
    let config = StudyConfig::from_json(STUDY).unwrap();
    let mut layers = history();
    layers[0].year = 2015;
    let err = StudyRunner::new(config).unwrap().run(&archive(), &layers).unwrap_err();
    assert!(matches!(err, AnalysisError::Configuration(_)), "{err}");
}
