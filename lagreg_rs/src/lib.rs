pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod scaler;
pub mod split;

pub use config::{Config, Penalty, ScalingMode, SolverKind};
pub use data::{Bar, DirectorySource, EntityBars, RecordSource};
pub use dataset::Dataset;
pub use error::LagregError;
pub use features::{DerivedSet, FeatureSpec};
pub use metrics::ConfusionMatrix;
pub use model::{FitSummary, LogisticRegression};
pub use pipeline::{DirectionPipeline, RunReport};
pub use scaler::MinMaxScaler;
pub use split::SplitIndices;
