//! Engine error type

use thiserror::Error;

/// Failure of one engine operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Empty input to {0}")]
    EmptyInput(&'static str),
    #[error("Filter error: {0}")]
    Filter(String),
    #[error("Stretch error: {0}")]
    Stretch(String),
    #[error("Mix error: {0}")]
    Mix(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Resample error: {0}")]
    Resample(String),
}
