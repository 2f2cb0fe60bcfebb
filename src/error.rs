//! Error taxonomy for the detection and aggregation core.

use thiserror::Error;

/// Errors surfaced by the library.
///
/// Region-level problems (degenerate contours, empty patches) never show up
/// here: the offending region is dropped where it is scored.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No signatures are registered for the requested crop.
    #[error("unknown crop type: {0}")]
    UnknownCropType(String),

    /// Image bytes could not be decoded.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Analysis of one image aborted unexpectedly.
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    /// A batch request arrived without any images.
    #[error("batch contains no images")]
    EmptyBatch,

    /// Export format name is not one of `json` / `csv`.
    #[error("unsupported export format: {0}")]
    ExportFormat(String),

    /// A disease signature failed load-time validation.
    #[error("invalid disease signature {crop}/{label}: {reason}")]
    InvalidSignature {
        crop: String,
        label: String,
        reason: String,
    },

    /// The farm session lock was poisoned by a panicking writer.
    #[error("farm session is unavailable (lock poisoned)")]
    SessionPoisoned,

    /// The batch worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
