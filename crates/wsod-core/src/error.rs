//! Error types for the WSOD system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("lambda schedule error: {0}")]
    Schedule(String),

    #[error("region count mismatch: expected {expected}, got {actual}")]
    RegionCountMismatch { expected: usize, actual: usize },

    #[error("label dimension mismatch: expected {expected} classes, got {actual}")]
    LabelDimMismatch { expected: usize, actual: usize },

    #[error("score matrix has {cols} columns, need at least {min_cols}")]
    ScoreDimMismatch { cols: usize, min_cols: usize },

    #[error("model loading error: {0}")]
    ModelLoad(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
