use thiserror::Error;

use crate::error::{DetectorError, SamplerError};

/// Errors that end a video run before its summary can be written.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Sampler(#[from] SamplerError),

    #[error("Could not extract any frames from video")]
    NoFrames,

    #[error("{0}")]
    Detector(#[from] DetectorError),

    #[error("Processing cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Message stored in the record's `error_message`.
    pub fn record_message(&self) -> String {
        match self {
            PipelineError::NoFrames => self.to_string(),
            other => format!("Error in frame-by-frame processing: {}", other),
        }
    }
}
