use thiserror::Error;

/// Failures the pipeline cannot recover from locally.
///
/// Recoverable conditions (empty ticker files, tickers with too little
/// history, zero-range feature columns) never surface here; they are logged
/// and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LagregError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no input files matched {pattern}")]
    NoInputFiles { pattern: String },

    #[error("missing required column '{column}' in {file}")]
    MissingColumn { column: String, file: String },

    #[error("empty dataset after {stage}")]
    EmptyDataset { stage: &'static str },

    #[error("cannot fit a model on an empty training set")]
    EmptyTrainingSet,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("model has not been fitted yet")]
    NotFitted,

    #[error("solver failure: {0}")]
    SolverFailure(String),
}
