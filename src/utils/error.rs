//! Error handling for ytdl

use crate::queue::{JobId, JobStatus};
use thiserror::Error;

/// Main error type for ytdl
#[derive(Debug, Error)]
pub enum YtdlError {
    #[error("yt-dlp not found. Please install yt-dlp")]
    YtDlpNotFound,

    #[error("ffmpeg not found. Please install ffmpeg")]
    FfmpegNotFound,

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Conversion not found: {0}")]
    ConversionNotFound(u64),

    #[error("Concurrency limit must be between 1 and 5, got {0}")]
    InvalidConcurrencyLimit(usize),

    #[error("Conversion slots must be between 1 and 2, got {0}")]
    InvalidConversionSlots(usize),

    #[error("Illegal transition for job {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Queue invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Scheduler is not running")]
    SchedulerUnavailable,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Rejections raised synchronously by `enqueue`; the job is never created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL is empty")]
    EmptyUrl,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unknown quality '{0}'")]
    UnknownQuality(String),

    #[error("Unknown format '{0}'")]
    UnknownFormat(String),

    #[error("Format {format} cannot be used for {kind} downloads")]
    FormatKindMismatch { kind: String, format: String },

    #[error("Quality {quality} cannot be used for {kind} downloads")]
    QualityKindMismatch { kind: String, quality: String },

    #[error("Destination path is empty")]
    EmptyDestination,

    #[error("Subtitles can only be requested for video downloads")]
    SubtitlesForAudio,

    #[error("Invalid subtitle language '{0}'")]
    InvalidSubtitleLanguage(String),
}

pub type Result<T> = std::result::Result<T, YtdlError>;
