//! Crate-wide error taxonomy for the habitat pipeline.
//!
//! Mirrors the five-way split documented for the pipeline: bad caller input,
//! missing upstream data, invalid upstream data, transient I/O, and internal
//! contract violations. Only the first four ever reach an external adapter;
//! `Internal` exists so a shape mismatch fails loudly instead of silently
//! producing a zeroed-out field.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("data unavailable: dataset={dataset} date={date}")]
    DataUnavailable { dataset: String, date: String },

    #[error("data invalid: dataset={dataset} reason={reason}")]
    DataInvalid { dataset: String, reason: String },

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::TransientIo(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            PipelineError::TransientIo(e.to_string())
        } else {
            PipelineError::DataInvalid {
                dataset: "unknown".to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Internal(format!("serialization failure: {e}"))
    }
}
