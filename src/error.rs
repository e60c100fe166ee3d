//! Error types for the capture and export pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing or exporting a dashboard
#[derive(Error, Debug)]
pub enum Error {
    /// The root element to capture is not attached to the document
    #[error("Capture target missing: {0}")]
    CaptureTargetMissing(String),

    /// Rasterization failed (embedded resource could not be fetched or decoded)
    #[error("Serialization failed: {0}")]
    SerializationError(String),

    /// Network failure or non-success response from the remote compositor
    #[error("Transmission failed: {0}")]
    TransmissionError(String),

    /// The artifact was received but could not be handed to the download facility
    #[error("Download trigger failed: {0}")]
    DownloadTriggerError(String),

    /// Upstream dashboard data is unusable (e.g. no `summary`)
    #[error("Invalid dashboard snapshot: {0}")]
    InvalidSnapshot(String),

    /// Charts did not report rendered in time, or a chart failed to draw
    #[error("Charts not ready: {0}")]
    ChartsNotReady(String),

    /// Another export is already running on this exporter
    #[error("An export is already in progress")]
    ExportInProgress,

    /// Whole-pipeline deadline expired
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error happened after the artifact bytes were received.
    pub fn artifact_lost(&self) -> bool {
        matches!(self, Error::DownloadTriggerError(_))
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = Error::CaptureTargetMissing("#dashboard-content".into());
        assert_eq!(e.to_string(), "Capture target missing: #dashboard-content");
        assert_eq!(Error::Timeout(250).to_string(), "Operation timed out after 250ms");
    }

    #[test]
    fn only_download_failures_lose_the_artifact() {
        assert!(Error::DownloadTriggerError("denied".into()).artifact_lost());
        assert!(!Error::TransmissionError("503".into()).artifact_lost());
    }
}
