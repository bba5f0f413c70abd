//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture is not supported on this platform")]
    UnsupportedPlatform,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device acquisition failed: {0}")]
    DeviceAcquisitionFailed(String),

    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Device cannot be switched while recording")]
    RecordingInProgress,

    #[error("Config error: {0}")]
    Config(String),
}

impl RecorderError {
    /// Stable code for UI collaborators
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
            RecorderError::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            RecorderError::PermissionDenied(_) => "PERMISSION_DENIED",
            RecorderError::DeviceAcquisitionFailed(_) => "DEVICE_ACQUISITION_FAILED",
            RecorderError::EncoderUnavailable(_) => "ENCODER_UNAVAILABLE",
            RecorderError::Encoder(_) => "ENCODER_ERROR",
            RecorderError::InvalidState(_) => "INVALID_STATE",
            RecorderError::RecordingInProgress => "RECORDING_IN_PROGRESS",
            RecorderError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the caller may retry the same operation later
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RecorderError::UnsupportedPlatform | RecorderError::Config(_)
        )
    }
}

/// Error response for UI collaborators
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
