//! Error types for capture operations.

use thiserror::Error;

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The requested file or device does not exist
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),
    /// Invalid capture parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    /// FFmpeg or OS level failure
    #[error("Platform error: {0}")]
    PlatformError(String),
    /// Feature not implemented on this platform
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// The decoder exited before producing a video stream
    #[error("Source produced no video frames")]
    NoFrames,
    /// Capture was cancelled or stopped
    #[error("Capture cancelled")]
    Cancelled,
}

impl From<CaptureError> for String {
    fn from(err: CaptureError) -> Self {
        err.to_string()
    }
}
