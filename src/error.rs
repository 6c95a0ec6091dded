//! Error handling
//!
//! One error enum for the whole engine. Each variant maps to a propagation
//! rule: configuration errors fail the cycle, inference failures are isolated
//! per stream, calibration errors keep the previous table, resource
//! exhaustion is a bounded failure instead of a hang.

use thiserror::Error;

pub type GestureResult<T> = Result<T, GestureError>;

#[derive(Error, Debug)]
pub enum GestureError {
    /// Invalid feature length, bad stream id, out-of-range parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Pool misconfigured to zero capacity, or no worker freed in time.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Malformed or missing fields in an offline metrics document.
    #[error("calibration data error: {0}")]
    CalibrationData(String),

    /// The classifier call failed for one stream.
    #[error("inference failure: {0}")]
    InferenceFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GestureError {
    pub fn config(msg: impl Into<String>) -> Self {
        GestureError::Configuration(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        GestureError::InferenceFailure(msg.into())
    }

    pub fn calibration(msg: impl Into<String>) -> Self {
        GestureError::CalibrationData(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        GestureError::ResourceExhaustion(msg.into())
    }

    /// Short machine-friendly kind, used in logs and cycle records
    pub fn kind(&self) -> &'static str {
        match self {
            GestureError::Configuration(_) => "configuration",
            GestureError::ResourceExhaustion(_) => "resource_exhaustion",
            GestureError::CalibrationData(_) => "calibration_data",
            GestureError::InferenceFailure(_) => "inference_failure",
            GestureError::Io(_) => "io",
            GestureError::Serialization(_) => "serialization",
        }
    }
}
