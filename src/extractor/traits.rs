use crate::extractor::models::{
    ExtractionError, ExtractionErrorKind, ExtractionHandle, MediaInfo,
};
use crate::queue::JobRequest;
use async_trait::async_trait;

/// Boundary to whatever actually fetches media.
///
/// The scheduler only ever sees structured events through the returned handle;
/// tool-specific output parsing stays behind this trait.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short identifier for logs (e.g. "yt-dlp")
    fn id(&self) -> &'static str;

    /// Begin one attempt for `request`.
    ///
    /// An `Err` here means the attempt never started (binary missing, spawn
    /// failure) and is classified like any other extraction error.
    async fn start(&self, request: &JobRequest) -> Result<ExtractionHandle, ExtractionError>;

    /// Read title, duration and available formats without downloading
    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractionError> {
        Err(ExtractionError::new(
            ExtractionErrorKind::UnsupportedPlatform,
            format!("{} cannot read media info for {}", self.id(), url),
        ))
    }
}
