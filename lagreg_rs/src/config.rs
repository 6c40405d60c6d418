use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LagregError;

pub const DEFAULT_WINDOW_SIZE: usize = 30;
pub const DEFAULT_HORIZON: usize = 30;
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_SPLIT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Fit min/max once over every retained row, before the train/test split.
    /// Test-set ranges leak into the scaling of the train set.
    #[default]
    FullDataset,
    /// Fit min/max on the train partition only and apply it to both partitions.
    TrainOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    None,
    /// L2 penalty with inverse strength `c` (smaller values regularize harder).
    L2 { c: f64 },
}

impl Default for Penalty {
    fn default() -> Self {
        Penalty::L2 { c: 1.0 }
    }
}

impl Penalty {
    /// Per-sample L2 coefficient for the averaged objective:
    /// `mean(logloss) + lambda / 2 * ||w||^2` with `lambda = 1 / (c * n)`.
    pub fn lambda(self, n_samples: usize) -> f64 {
        match self {
            Penalty::None => 0.0,
            Penalty::L2 { c } => 1.0 / (c * n_samples.max(1) as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    Newton,
    GradientDescent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one delimited text file per ticker.
    pub data_dir: PathBuf,
    /// Glob pattern, relative to `data_dir`, used to discover ticker files.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default = "default_close_column")]
    pub close_column: String,
    /// Optional date column. When present in a file, bars are checked for
    /// chronological order and the date window below can be applied.
    #[serde(default = "default_date_column")]
    pub date_column: Option<String>,
    /// When set, read only a uniform random subset of this many ticker files.
    #[serde(default)]
    pub sample_size: Option<usize>,
    /// Seed for file sampling. When omitted a seed is drawn per run and
    /// reported so the sample can be reproduced.
    #[serde(default)]
    pub sample_seed: Option<u64>,
    /// Inclusive start of the bar date window applied at load time.
    #[serde(default)]
    pub include_date_start: Option<NaiveDate>,
    /// Inclusive end of the bar date window applied at load time.
    #[serde(default)]
    pub include_date_end: Option<NaiveDate>,
    /// Number of lagged closes per row (`lag_1..lag_W`).
    pub window_size: usize,
    /// Forward offset, in rows, of the percentage change that defines the label.
    pub horizon: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
    #[serde(default)]
    pub scaling: ScalingMode,
    #[serde(default)]
    pub penalty: Penalty,
    #[serde(default)]
    pub solver: SolverKind,
    pub max_iter: usize,
    /// Stop once the largest absolute gradient component drops below this.
    pub tolerance: f64,
    /// Step size for the gradient-descent solver. Ignored by Newton.
    pub learning_rate: f64,
    /// Worker threads for per-ticker feature derivation.
    pub n_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/Stocks"),
            file_pattern: default_file_pattern(),
            close_column: default_close_column(),
            date_column: default_date_column(),
            sample_size: None,
            sample_seed: None,
            include_date_start: None,
            include_date_end: None,
            window_size: DEFAULT_WINDOW_SIZE,
            horizon: DEFAULT_HORIZON,
            test_fraction: DEFAULT_TEST_FRACTION,
            split_seed: DEFAULT_SPLIT_SEED,
            scaling: ScalingMode::default(),
            penalty: Penalty::default(),
            solver: SolverKind::default(),
            max_iter: 100,
            tolerance: 1e-4,
            learning_rate: 0.5,
            n_workers: 1,
        }
    }
}

impl Config {
    /// Minimum rows a ticker needs before it can contribute a single row.
    pub fn min_history(&self) -> usize {
        self.window_size + self.horizon + 1
    }

    pub fn validate(&self) -> Result<(), LagregError> {
        if self.window_size == 0 {
            return Err(LagregError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.horizon == 0 {
            return Err(LagregError::InvalidConfig(
                "horizon must be at least 1".to_string(),
            ));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(LagregError::InvalidConfig(format!(
                "test_fraction must lie strictly between 0 and 1 (got {})",
                self.test_fraction
            )));
        }
        if let Penalty::L2 { c } = self.penalty {
            if !(c.is_finite() && c > 0.0) {
                return Err(LagregError::InvalidConfig(format!(
                    "L2 inverse strength c must be a positive number (got {c})"
                )));
            }
        }
        if self.max_iter == 0 {
            return Err(LagregError::InvalidConfig(
                "max_iter must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(LagregError::InvalidConfig(format!(
                "tolerance must be a non-negative number (got {})",
                self.tolerance
            )));
        }
        if matches!(self.solver, SolverKind::GradientDescent)
            && !(self.learning_rate.is_finite() && self.learning_rate > 0.0)
        {
            return Err(LagregError::InvalidConfig(format!(
                "learning_rate must be positive for gradient descent (got {})",
                self.learning_rate
            )));
        }
        if self.sample_size == Some(0) {
            return Err(LagregError::InvalidConfig(
                "sample_size must be at least 1 when set".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.include_date_start, self.include_date_end) {
            if start > end {
                return Err(LagregError::InvalidConfig(format!(
                    "date window start {start} is after end {end}"
                )));
            }
        }
        Ok(())
    }
}

fn default_file_pattern() -> String {
    "*.txt".to_string()
}

fn default_close_column() -> String {
    "Close".to_string()
}

fn default_date_column() -> Option<String> {
    Some("Date".to_string())
}
