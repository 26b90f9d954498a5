//! Data structures shared by every extractor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One live progress sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Fraction in [0, 1]
    pub fraction: f64,
    /// Bytes per second
    pub rate: Option<f64>,
    pub eta: Option<Duration>,
}

/// What the tool is busy with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stage {
    /// Resolving the page or transferring media
    #[default]
    Downloading,
    /// Local work on finished streams (merge, audio extraction, recode,
    /// embedding). Can run for minutes without printing anything.
    PostProcessing,
}

/// Everything an extractor can report for one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionEvent {
    Progress(ProgressEvent),
    /// The tool printed something other than progress; it is alive and in
    /// the given stage
    Activity(Stage),
    /// Terminal. Nothing follows it.
    Finished(Result<PathBuf, ExtractionError>),
}

/// Metadata for a URL, read without downloading anything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    /// `YYYYMMDD` as reported by the site
    pub upload_date: Option<String>,
    pub webpage_url: Option<String>,
    pub formats: Vec<FormatInfo>,
}

/// One downloadable rendition of a [`MediaInfo`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// Audio bitrate in kbit/s
    pub abr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

impl FormatInfo {
    pub fn has_video(&self) -> bool {
        codec_present(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        codec_present(&self.acodec)
    }

    pub fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

// yt-dlp writes "none" for an absent stream and leaves the key out when unknown
fn codec_present(codec: &Option<String>) -> bool {
    codec.as_deref().map_or(true, |c| c != "none")
}

impl MediaInfo {
    /// Formats carrying a picture, tallest first
    pub fn video_formats(&self) -> Vec<&FormatInfo> {
        let mut formats: Vec<&FormatInfo> =
            self.formats.iter().filter(|f| f.has_video()).collect();
        formats.sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));
        formats
    }

    /// Audio-only formats, highest bitrate first
    pub fn audio_formats(&self) -> Vec<&FormatInfo> {
        let mut formats: Vec<&FormatInfo> = self
            .formats
            .iter()
            .filter(|f| !f.has_video() && f.has_audio())
            .collect();
        formats.sort_by(|a, b| {
            b.abr
                .unwrap_or(0.0)
                .partial_cmp(&a.abr.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        formats
    }
}

/// Failure categories, each either worth retrying or not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionErrorKind {
    // transient
    NetworkTimeout,
    RateLimited,
    TemporarilyUnavailable,
    Stalled,
    Interrupted,
    Unknown,
    // permanent
    InvalidUrl,
    UnsupportedPlatform,
    ContentUnavailable,
    PermissionDenied,
    ToolNotFound,
    Io,
}

impl ExtractionErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExtractionErrorKind::NetworkTimeout
                | ExtractionErrorKind::RateLimited
                | ExtractionErrorKind::TemporarilyUnavailable
                | ExtractionErrorKind::Stalled
                | ExtractionErrorKind::Interrupted
                | ExtractionErrorKind::Unknown
        )
    }
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionErrorKind::NetworkTimeout => "network timeout",
            ExtractionErrorKind::RateLimited => "rate limited",
            ExtractionErrorKind::TemporarilyUnavailable => "temporarily unavailable",
            ExtractionErrorKind::Stalled => "stalled",
            ExtractionErrorKind::Interrupted => "interrupted",
            ExtractionErrorKind::Unknown => "unknown error",
            ExtractionErrorKind::InvalidUrl => "invalid url",
            ExtractionErrorKind::UnsupportedPlatform => "unsupported platform",
            ExtractionErrorKind::ContentUnavailable => "content unavailable",
            ExtractionErrorKind::PermissionDenied => "permission denied",
            ExtractionErrorKind::ToolNotFound => "tool not found",
            ExtractionErrorKind::Io => "i/o error",
        };
        f.write_str(s)
    }
}

/// Error detail attached to a failed job
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub message: String,
}

impl ExtractionError {
    pub fn new(kind: ExtractionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ExtractionErrorKind::ToolNotFound,
            std::io::ErrorKind::PermissionDenied => ExtractionErrorKind::PermissionDenied,
            _ => ExtractionErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

/// Cancellable handle to one running extraction attempt.
///
/// Events are read with [`next_event`](Self::next_event). [`cancel`](Self::cancel)
/// stops the attempt and returns once the extractor has torn it down; after
/// that no further events are observed.
pub struct ExtractionHandle {
    events: mpsc::Receiver<ExtractionEvent>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl ExtractionHandle {
    /// `driver` must stop sending and clean up once `cancel` fires
    pub fn new(
        events: mpsc::Receiver<ExtractionEvent>,
        cancel: CancellationToken,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            cancel,
            driver: Some(driver),
        }
    }

    pub async fn next_event(&mut self) -> Option<ExtractionEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }

    /// Abort the attempt and wait for the driver to acknowledge.
    /// Safe to call more than once, or after the attempt already finished.
    pub async fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                if e.is_panic() {
                    tracing::warn!("Extractor driver panicked during cancellation: {}", e);
                }
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ExtractionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
