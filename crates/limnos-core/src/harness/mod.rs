//! Model training and validation harness.
//!
//! An [`EvaluationRun`] fits every configured classifier independently on one
//! training sample, scores all of them against one held-out sample and hands
//! back plain [`ModelReport`] records. The run is a typestate:
//!
//! ```text
//! EvaluationRun ──train()──▶ TrainedRun ──validate()──▶ ValidatedRun ──report()──▶ Vec<ModelReport>
//! ```
//!
//! A model whose hyperparameters or training data are unusable fails alone;
//! cancellation fails the whole run with `NotReady`.

pub mod boosting;
pub mod forest;
pub mod metrics;
pub mod svm;
pub mod tree;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};
use crate::raster::{Band, Raster};
use crate::sampler::{Label, LabeledPoint};
use metrics::{BucketLadder, ClassificationMetrics, RegressionMetrics};
use tree::Criterion;

// ── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Discrete labels; scored with a confusion matrix.
    Classification,
    /// Continuous labels; scored with MAE/RMSE/R², and additionally with a
    /// confusion matrix when a ladder buckets observed and predicted values.
    Regression {
        #[serde(default)]
        ladder: Option<BucketLadder>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    RandomForest,
    GradientBoostedTrees,
    Svm,
    Cart,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Family::RandomForest => "random_forest",
            Family::GradientBoostedTrees => "gradient_boosted_trees",
            Family::Svm => "svm",
            Family::Cart => "cart",
        })
    }
}

fn default_trees() -> usize {
    100
}
fn default_depth() -> usize {
    12
}
fn default_gbt_depth() -> usize {
    3
}
fn default_leaf() -> usize {
    1
}
fn default_learning_rate() -> f64 {
    0.1
}
fn default_subsample() -> f64 {
    0.7
}
fn default_c() -> f64 {
    1.0
}
fn default_epochs() -> usize {
    50
}
fn default_epsilon() -> f64 {
    0.1
}

/// Hyperparameters for one classifier family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ClassifierSpec {
    RandomForest {
        #[serde(default = "default_trees")]
        trees: usize,
        #[serde(default = "default_depth")]
        max_depth: usize,
        #[serde(default = "default_leaf")]
        min_samples_leaf: usize,
        /// Defaults to √p for classes and p/3 for continuous targets.
        #[serde(default)]
        features_per_split: Option<usize>,
        #[serde(default)]
        seed: u64,
    },
    GradientBoostedTrees {
        #[serde(default = "default_trees")]
        trees: usize,
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_gbt_depth")]
        max_depth: usize,
        #[serde(default = "default_subsample")]
        subsample: f64,
        #[serde(default)]
        seed: u64,
    },
    Svm {
        #[serde(default = "default_c")]
        c: f64,
        #[serde(default = "default_epochs")]
        epochs: usize,
        /// ε of the insensitive loss for continuous targets, in target standard deviations.
        #[serde(default = "default_epsilon")]
        epsilon: f64,
        #[serde(default)]
        seed: u64,
    },
    Cart {
        #[serde(default = "default_depth")]
        max_depth: usize,
        #[serde(default = "default_leaf")]
        min_samples_leaf: usize,
    },
}

impl ClassifierSpec {
    pub fn family(&self) -> Family {
        match self {
            ClassifierSpec::RandomForest { .. } => Family::RandomForest,
            ClassifierSpec::GradientBoostedTrees { .. } => Family::GradientBoostedTrees,
            ClassifierSpec::Svm { .. } => Family::Svm,
            ClassifierSpec::Cart { .. } => Family::Cart,
        }
    }

    /// Hyperparameter sanity; a failure here is reported against the model only.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match *self {
            ClassifierSpec::RandomForest { trees, max_depth, min_samples_leaf, features_per_split, .. } => {
                positive("trees", trees)?;
                positive("max_depth", max_depth)?;
                positive("min_samples_leaf", min_samples_leaf)?;
                if features_per_split == Some(0) {
                    return Err("features_per_split must be at least 1".into());
                }
                Ok(())
            }
            ClassifierSpec::GradientBoostedTrees { trees, learning_rate, max_depth, subsample, .. } => {
                positive("trees", trees)?;
                positive("max_depth", max_depth)?;
                if !(learning_rate > 0.0 && learning_rate.is_finite()) {
                    return Err(format!("learning_rate must be positive, got {learning_rate}"));
                }
                if !(subsample > 0.0 && subsample <= 1.0) {
                    return Err(format!("subsample must be in (0, 1], got {subsample}"));
                }
                Ok(())
            }
            ClassifierSpec::Svm { c, epochs, epsilon, .. } => {
                positive("epochs", epochs)?;
                if !(c > 0.0 && c.is_finite()) {
                    return Err(format!("c must be positive, got {c}"));
                }
                if !(epsilon >= 0.0 && epsilon.is_finite()) {
                    return Err(format!("epsilon must be non-negative, got {epsilon}"));
                }
                Ok(())
            }
            ClassifierSpec::Cart { max_depth, min_samples_leaf } => {
                positive("max_depth", max_depth)?;
                positive("min_samples_leaf", min_samples_leaf)
            }
        }
    }
}

fn positive(name: &str, v: usize) -> std::result::Result<(), String> {
    if v == 0 {
        Err(format!("{name} must be at least 1"))
    } else {
        Ok(())
    }
}

/// A named classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub classifier: ClassifierSpec,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, classifier: ClassifierSpec) -> Self {
        Self { name: name.into(), classifier }
    }
}

// ── Models ──────────────────────────────────────────────────────────────────

/// A fitted model. Deterministic and immutable once trained.
pub trait Model: Send + Sync + fmt::Debug {
    fn family(&self) -> Family;

    /// Class code (classification) or value (regression) for one feature vector.
    fn predict(&self, features: &[f64]) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    /// Sorted class codes; training labels are indices into this list.
    Classes(Vec<u32>),
    Continuous,
}

/// Row-major feature matrix with labels prepared for fitting.
#[derive(Debug, Clone)]
pub(crate) struct TrainingData {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    pub target: Target,
}

impl TrainingData {
    pub(crate) fn classification(x: Vec<Vec<f64>>, labels: &[u32]) -> Self {
        let classes: Vec<u32> = labels.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let y = labels.iter().map(|l| classes.binary_search(l).unwrap_or(0) as f64).collect();
        Self { x, y, target: Target::Classes(classes) }
    }

    pub(crate) fn regression(x: Vec<Vec<f64>>, y: Vec<f64>) -> Self {
        Self { x, y, target: Target::Continuous }
    }

    pub(crate) fn len(&self) -> usize {
        self.y.len()
    }

    pub(crate) fn n_features(&self) -> usize {
        self.x.first().map_or(0, Vec::len)
    }

    pub(crate) fn criterion(&self) -> Criterion {
        match &self.target {
            Target::Classes(c) => Criterion::Gini { n_classes: c.len() },
            Target::Continuous => Criterion::Variance,
        }
    }
}

fn fit_model(spec: &ClassifierSpec, data: &TrainingData, cancel: &CancelToken) -> Result<Box<dyn Model>> {
    Ok(match *spec {
        ClassifierSpec::RandomForest { trees, max_depth, min_samples_leaf, features_per_split, seed } => Box::new(
            forest::RandomForest::fit(data, trees, max_depth, min_samples_leaf, features_per_split, seed, cancel)?,
        ),
        ClassifierSpec::GradientBoostedTrees { trees, learning_rate, max_depth, subsample, seed } => Box::new(
            boosting::GradientBoostedTrees::fit(data, trees, learning_rate, max_depth, subsample, seed, cancel)?,
        ),
        ClassifierSpec::Svm { c, epochs, epsilon, seed } => {
            Box::new(svm::LinearSvm::fit(data, c, epochs, epsilon, seed, cancel)?)
        }
        ClassifierSpec::Cart { max_depth, min_samples_leaf } => {
            Box::new(forest::Cart::fit(data, max_depth, min_samples_leaf)?)
        }
    })
}

/// Train one spec, isolating every failure except cancellation.
fn train_one(spec: &ModelSpec, data: &TrainingData, cancel: &CancelToken) -> TrainedModel {
    let failed = |reason: String| AnalysisError::ModelTraining { model: spec.name.clone(), reason };
    let outcome = spec
        .classifier
        .validate()
        .map_err(failed)
        .and_then(|()| match &data.target {
            Target::Classes(c) if c.len() < 2 => {
                Err(failed(format!("training sample has a single class ({c:?})")))
            }
            _ => Ok(()),
        })
        .and_then(|()| {
            fit_model(&spec.classifier, data, cancel).map_err(|e| match e {
                AnalysisError::NotReady => AnalysisError::NotReady,
                AnalysisError::ModelTraining { reason, .. } => failed(reason),
                other => failed(other.to_string()),
            })
        });
    match &outcome {
        Ok(_) => log::info!("trained '{}' ({})", spec.name, spec.classifier.family()),
        Err(AnalysisError::NotReady) => {}
        Err(e) => log::warn!("{e}"),
    }
    TrainedModel { name: spec.name.clone(), family: spec.classifier.family(), outcome }
}

#[derive(Debug)]
struct TrainedModel {
    name: String,
    family: Family,
    outcome: Result<Box<dyn Model>>,
}

// ── Report ──────────────────────────────────────────────────────────────────

/// Validation outcome for one model. Exactly one of the metric groups or
/// `failure` is set, except that regression with a ladder carries both metric groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_name: String,
    pub family: Family,
    pub n_train: usize,
    pub n_validation: usize,
    pub regression: Option<RegressionMetrics>,
    pub classification: Option<ClassificationMetrics>,
    /// Why the model could not be trained, if it could not.
    pub failure: Option<String>,
}

impl ModelReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.classification.as_ref().map(|c| c.accuracy)
    }

    pub fn kappa(&self) -> Option<f64> {
        self.classification.as_ref().map(|c| c.kappa)
    }
}

// ── Typestate run ───────────────────────────────────────────────────────────

/// A configured evaluation: training sample, features, task and model specs.
#[derive(Debug)]
pub struct EvaluationRun {
    features: Vec<String>,
    task: Task,
    specs: Vec<ModelSpec>,
    data: TrainingData,
    cancel: CancelToken,
}

impl EvaluationRun {
    pub fn new(training: &[LabeledPoint], features: Vec<String>, task: Task, specs: Vec<ModelSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(AnalysisError::config("no model specifications given"));
        }
        let mut names = BTreeSet::new();
        if let Some(dup) = specs.iter().find(|s| !names.insert(s.name.as_str())) {
            return Err(AnalysisError::config(format!("duplicate model name '{}'", dup.name)));
        }
        if let Task::Regression { ladder: Some(l) } = &task {
            l.validate()?;
        }
        if training.is_empty() {
            return Err(AnalysisError::empty("training sample is empty"));
        }
        let x = feature_matrix(training, features.len())?;
        let data = match task {
            Task::Classification => TrainingData::classification(x, &class_labels(training)?),
            Task::Regression { .. } => TrainingData::regression(x, training.iter().map(|p| p.label.as_f64()).collect()),
        };
        Ok(Self { features, task, specs, data, cancel: CancelToken::new() })
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fit every spec on the same training sample.
    pub fn train(self) -> Result<TrainedRun> {
        self.cancel.check()?;
        log::info!("training {} models on {} points", self.specs.len(), self.data.len());

        #[cfg(feature = "threading")]
        let models: Vec<TrainedModel> = {
            use rayon::prelude::*;
            self.specs.par_iter().map(|s| train_one(s, &self.data, &self.cancel)).collect()
        };
        #[cfg(not(feature = "threading"))]
        let models: Vec<TrainedModel> = self.specs.iter().map(|s| train_one(s, &self.data, &self.cancel)).collect();

        if self.cancel.is_cancelled() || models.iter().any(|m| matches!(m.outcome, Err(AnalysisError::NotReady))) {
            return Err(AnalysisError::NotReady);
        }
        Ok(TrainedRun { features: self.features, task: self.task, n_train: self.data.len(), models, cancel: self.cancel })
    }
}

/// Every spec trained (or failed). Models are fixed from here on.
#[derive(Debug)]
pub struct TrainedRun {
    features: Vec<String>,
    task: Task,
    n_train: usize,
    models: Vec<TrainedModel>,
    cancel: CancelToken,
}

impl TrainedRun {
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Score every trained model on the same held-out sample.
    pub fn validate(self, sample: &[LabeledPoint]) -> Result<ValidatedRun> {
        self.cancel.check()?;
        if sample.is_empty() {
            return Err(AnalysisError::empty("validation sample is empty"));
        }
        let x = feature_matrix(sample, self.features.len())?;
        let observed_classes = match self.task {
            Task::Classification => Some(class_labels(sample)?),
            Task::Regression { .. } => None,
        };
        let observed_values: Vec<f64> = sample.iter().map(|p| p.label.as_f64()).collect();

        let mut reports = Vec::with_capacity(self.models.len());
        for m in &self.models {
            self.cancel.check()?;
            let mut report = ModelReport {
                model_name: m.name.clone(),
                family: m.family,
                n_train: self.n_train,
                n_validation: sample.len(),
                regression: None,
                classification: None,
                failure: None,
            };
            match &m.outcome {
                Err(e) => report.failure = Some(e.to_string()),
                Ok(model) => {
                    let predicted: Vec<f64> = x.iter().map(|row| model.predict(row)).collect();
                    match (&self.task, &observed_classes) {
                        (Task::Classification, Some(obs)) => {
                            let pred: Vec<u32> = predicted.iter().map(|&p| p.round().max(0.0) as u32).collect();
                            report.classification = Some(ClassificationMetrics::compute(obs, &pred)?);
                        }
                        (Task::Regression { ladder }, _) => {
                            if predicted.iter().any(|p| !p.is_finite()) {
                                report.failure = Some(format!("model '{}' produced non-finite predictions", m.name));
                            } else {
                                report.regression = Some(RegressionMetrics::compute(&observed_values, &predicted)?);
                                if let Some(l) = ladder {
                                    let obs: Vec<u32> = observed_values.iter().map(|&v| l.bucket(v)).collect();
                                    let pred: Vec<u32> = predicted.iter().map(|&v| l.bucket(v)).collect();
                                    report.classification = Some(ClassificationMetrics::compute(&obs, &pred)?);
                                }
                            }
                        }
                        (Task::Classification, None) => {}
                    }
                }
            }
            reports.push(report);
        }
        log::info!("validated {} models on {} points", reports.len(), sample.len());
        Ok(ValidatedRun { features: self.features, task: self.task, models: self.models, reports, cancel: self.cancel })
    }
}

/// Models trained and scored; ready to report or to classify rasters.
#[derive(Debug)]
pub struct ValidatedRun {
    features: Vec<String>,
    task: Task,
    models: Vec<TrainedModel>,
    reports: Vec<ModelReport>,
    cancel: CancelToken,
}

impl ValidatedRun {
    pub fn reports(&self) -> &[ModelReport] {
        &self.reports
    }

    /// Best successfully validated model: highest kappa then accuracy for
    /// classification, highest R² then lowest RMSE for regression.
    pub fn best_model(&self) -> Option<&str> {
        let key = |r: &ModelReport| -> Option<(f64, f64)> {
            match self.task {
                Task::Classification => r.classification.as_ref().map(|c| (c.kappa, c.accuracy)),
                Task::Regression { .. } => r.regression.map(|m| (m.r2, -m.rmse)),
            }
        };
        self.reports
            .iter()
            .filter_map(|r| key(r).map(|k| (k, r.model_name.as_str())))
            .fold(None, |best: Option<((f64, f64), &str)>, (k, name)| match best {
                Some((bk, _)) if (bk.0, bk.1) >= (k.0, k.1) => best,
                _ => Some((k, name)),
            })
            .map(|(_, name)| name)
    }

    /// Apply a model (the best one when `model_name` is `None`) to every pixel of
    /// `raster` whose feature bands all hold data. The output band is `class`
    /// for classification and `prediction` for regression.
    pub fn classify(&self, raster: &Raster, model_name: Option<&str>) -> Result<Raster> {
        let name = match model_name {
            Some(n) => n,
            None => self.best_model().ok_or_else(|| AnalysisError::empty("no model trained successfully"))?,
        };
        let trained = self
            .models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| AnalysisError::config(format!("unknown model '{name}'")))?;
        let model = trained
            .outcome
            .as_ref()
            .map_err(|e| AnalysisError::config(format!("model '{name}' is unusable: {e}")))?;
        let bands = self.features.iter().map(|f| raster.require_band(f)).collect::<Result<Vec<_>>>()?;

        let mut row = vec![0.0; bands.len()];
        let mut data = Vec::with_capacity(raster.grid.len());
        for i in 0..raster.grid.len() {
            if i % 65_536 == 0 {
                self.cancel.check()?;
            }
            let mut valid = true;
            for (slot, band) in row.iter_mut().zip(&bands) {
                let v = band.data[i];
                valid &= v.is_finite();
                *slot = v as f64;
            }
            data.push(if valid { model.predict(&row) as f32 } else { f32::NAN });
        }
        let band_name = match self.task {
            Task::Classification => "class",
            Task::Regression { .. } => "prediction",
        };
        let mut out = Raster::new(format!("{}_{name}", raster.name), raster.grid);
        out.push_band(Band { name: band_name.to_string(), data })?;
        log::debug!("classified '{}' with '{name}'", raster.name);
        Ok(out)
    }

    /// Terminal step: the per-model records, in configuration order.
    pub fn report(self) -> Vec<ModelReport> {
        self.reports
    }
}

fn feature_matrix(points: &[LabeledPoint], n_features: usize) -> Result<Vec<Vec<f64>>> {
    points
        .iter()
        .map(|p| {
            if p.features.len() != n_features {
                return Err(AnalysisError::config(format!(
                    "point ({}, {}) has {} features, expected {n_features}",
                    p.x,
                    p.y,
                    p.features.len()
                )));
            }
            if p.features.iter().any(|v| !v.is_finite()) {
                return Err(AnalysisError::config(format!("point ({}, {}) has a non-finite feature", p.x, p.y)));
            }
            Ok(p.features.clone())
        })
        .collect()
}

fn class_labels(points: &[LabeledPoint]) -> Result<Vec<u32>> {
    points
        .iter()
        .map(|p| match p.label {
            Label::Class(c) => Ok(c),
            Label::Value(v) => Err(AnalysisError::config(format!(
                "classification needs class labels, got value {v} at ({}, {})",
                p.x, p.y
            ))),
        })
        .collect()
}
