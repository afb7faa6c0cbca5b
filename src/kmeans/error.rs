use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KMeansError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("model has not been fitted yet, call `fit` before `{0}`")]
    NotFitted(&'static str),
    #[error("incorrect number of features: got {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, KMeansError>;
