//! Error types and handling
//!
//! Command-level error type for the recorder plus a serializable
//! response shape for whatever surface sits on top of it.

use crate::capture::CaptureError;
use crate::export::ExportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recorder is already running")]
    AlreadyRunning,

    #[error("Recorder is not running")]
    NotRunning,

    #[error("Configuration cannot change while recording")]
    RuntimeConfigChange,

    #[error("Recording buffer is empty")]
    CorruptedBuffer,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response for outer surfaces
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::AlreadyRunning => "ALREADY_RUNNING",
            RecorderError::NotRunning => "NOT_RUNNING",
            RecorderError::RuntimeConfigChange => "RUNTIME_CONFIG_CHANGE",
            RecorderError::CorruptedBuffer => "CORRUPTED_BUFFER",
            RecorderError::Config(_) => "CONFIG_ERROR",
            RecorderError::Export(ExportError::SegmentEmpty) => "SEGMENT_EMPTY",
            RecorderError::Export(ExportError::PreparationFailed(_)) => "EXPORT_PREPARATION_FAILED",
            RecorderError::Export(ExportError::Timeout { .. }) => "EXPORT_TIMEOUT",
            RecorderError::Export(_) => "EXPORT_ERROR",
            RecorderError::Capture(_) => "CAPTURE_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_codes() {
        let response = ErrorResponse::from(RecorderError::AlreadyRunning);
        assert_eq!(response.code, "ALREADY_RUNNING");

        let response = ErrorResponse::from(RecorderError::Export(ExportError::SegmentEmpty));
        assert_eq!(response.code, "SEGMENT_EMPTY");

        let response = ErrorResponse::from(RecorderError::Export(ExportError::Timeout {
            waited: Duration::from_secs(1),
        }));
        assert_eq!(response.code, "EXPORT_TIMEOUT");
        assert!(response.message.contains("1s"));
    }
}
