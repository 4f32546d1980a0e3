//! Error types shared across the crate.
//!
//! Each concern gets its own enum so callers can match on the failure they
//! care about; [`FitError`] wraps all of them for the end-to-end
//! [`fit_mln`](crate::fit::fit_mln) entry point.

use std::path::PathBuf;
use std::process::ExitStatus;

/// Failures while parsing labels or regrouping a draw table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReshapeError {
    #[error("malformed parameter label `{0}`")]
    MalformedLabel(String),
    #[error("parameter label `{0}` uses index 0; indices are 1-based")]
    ZeroIndex(String),
    #[error("parameter `{name}` has arity {expected} but column `{label}` has arity {found}")]
    ArityMismatch {
        name: String,
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("column `{0}` appears more than once")]
    DuplicateColumn(String),
    #[error("parameter `{name}` spans {extents:?} cells from only {columns} columns")]
    TooLarge {
        name: String,
        extents: Vec<usize>,
        columns: usize,
    },
    #[error("table has {columns} column labels but {values} value columns")]
    ShapeMismatch { columns: usize, values: usize },
    #[error("table has {rows} rows but {ids} chain ids")]
    ChainIds { rows: usize, ids: usize },
    #[error("array `{name}` has {found} draws, expected {expected}")]
    DrawCountMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// Invalid run configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown parameterization `{0}` (expected `collapsed` or `uncollapsed`)")]
    UnknownParameterization(String),
    #[error("unknown variational algorithm `{0}` (expected `meanfield` or `fullrank`)")]
    UnknownVariational(String),
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("warmup ({warmup}) must be smaller than iter ({iter})")]
    WarmupTooLong { warmup: usize, iter: usize },
}

/// Inconsistent MLN data payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("need at least 2 categories, got D = {0}")]
    TooFewCategories(usize),
    #[error("Y has {y} samples but X has {x}")]
    SampleCountMismatch { y: usize, x: usize },
    #[error("{name} has shape {found:?}, expected {expected:?}")]
    BadShape {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("sequencing depth must be positive and finite, got {0}")]
    InvalidDepth(f64),
    #[error("upsilon must exceed D - 2 = {min}, got {upsilon}")]
    Upsilon { upsilon: f64, min: f64 },
}

/// Failures raised while driving the external engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model executable not found at {0}")]
    ModelNotFound(PathBuf),
    #[error("engine exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("engine output {path} is unusable: {reason}")]
    BadOutput { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Anything that can go wrong in [`fit_mln`](crate::fit::fit_mln).
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Reshape(#[from] ReshapeError),
}
