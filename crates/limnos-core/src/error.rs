//! Error taxonomy shared by every analysis stage.
//!
//! Every variant is returned as a value; no stage logs an error and carries on.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Zero qualifying input: no scenes survive the filters, the region is
    /// fully masked, or no sample candidates exist. Non-fatal.
    #[error("no qualifying input: {0}")]
    EmptyInput(String),

    /// A denominator with zero variance made the statistic undefined.
    #[error("degenerate statistic: {0}")]
    DegenerateStatistic(String),

    /// One classifier specification could not be trained. Isolated to that model.
    #[error("model '{model}' failed to train: {reason}")]
    ModelTraining { model: String, reason: String },

    /// Invalid geometry, counts, resolution, or band references.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cancelled or timed out before a complete result existed.
    #[error("operation cancelled or timed out before completion")]
    NotReady,
}

impl AnalysisError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn empty(msg: impl Into<String>) -> Self {
        Self::EmptyInput(msg.into())
    }

    pub(crate) fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateStatistic(msg.into())
    }

    /// True for outcomes a caller should treat as "no data" rather than failure.
    pub fn is_empty_input(&self) -> bool {
        matches!(self, Self::EmptyInput(_))
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
