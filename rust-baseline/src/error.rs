//! Error types for the baseline forecasters and the walk-forward splitter.

use arrow::error::ArrowError;
use arrow_schema::DataType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForecastError>;

#[derive(Error, Debug)]
pub enum ForecastError {
    /// `predict` was called before any successful `fit`.
    #[error("model must be fit before predictions can be made")]
    NotFitted,

    /// Rejected configuration, raised before any work is done.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("column `{column}` has unsupported timestamp type {data_type}")]
    UnsupportedTimestampType { column: String, data_type: DataType },

    #[error("column `{0}` contains null timestamps")]
    NullTimestamp(String),

    #[error("column `{0}` cannot be read as Float64")]
    NonNumericColumn(String),

    #[error("training data is empty")]
    EmptyTrainingData,

    #[error(transparent)]
    Arrow(#[from] ArrowError),
}
