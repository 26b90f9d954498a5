//! Application configuration

use crate::converter::pool::{MAX_CONVERSION_SLOTS, MIN_CONVERSION_SLOTS};
use crate::converter::ConversionProfile;
use crate::queue::{JobRequest, MediaFormat, MediaKind, Quality};
use crate::scheduler::{ConcurrencyLimit, RetryPolicy, SchedulerConfig};
use crate::utils::error::{Result, YtdlError};
use crate::utils::paths::default_output_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Download location
    pub download_location: PathBuf,

    /// Maximum concurrent downloads (1-5)
    pub max_concurrent: usize,

    /// Default quality and container for video requests
    pub video_quality: String,
    pub video_format: String,

    /// Default bitrate and format for audio requests
    pub audio_quality: String,
    pub audio_format: String,

    /// Retries after a transient failure
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub stall_timeout: Duration,

    /// Parallel conversions (1-2)
    pub max_concurrent_conversions: usize,

    /// Convert each finished download to this profile
    pub auto_convert: Option<ConversionProfile>,

    /// Keep the downloaded file after a successful conversion
    pub keep_original: bool,

    /// Fetch subtitles for video downloads
    pub download_subtitles: bool,
    pub subtitle_languages: Vec<String>,

    /// Embed tags and cover art into downloaded files
    pub embed_metadata: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            download_location: default_output_dir(),
            max_concurrent: 3,
            video_quality: "best".to_string(),
            video_format: "mp4".to_string(),
            audio_quality: "192".to_string(),
            audio_format: "mp3".to_string(),
            retry_attempts: 2,
            retry_backoff: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(60),
            max_concurrent_conversions: 1,
            auto_convert: None,
            keep_original: true,
            download_subtitles: false,
            subtitle_languages: vec!["en".to_string()],
            embed_metadata: true,
        }
    }
}

impl AppSettings {
    /// Bounds-check everything the scheduler and conversion pool depend on
    pub fn validate(&self) -> Result<()> {
        ConcurrencyLimit::new(self.max_concurrent)?;
        if !(MIN_CONVERSION_SLOTS..=MAX_CONVERSION_SLOTS).contains(&self.max_concurrent_conversions) {
            return Err(YtdlError::InvalidConversionSlots(
                self.max_concurrent_conversions,
            ));
        }
        self.request_for("https://example.com/", MediaKind::Video)?;
        self.request_for("https://example.com/", MediaKind::Audio)?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            limit: ConcurrencyLimit::new(self.max_concurrent)?,
            retry: RetryPolicy {
                max_retries: self.retry_attempts,
                backoff: self.retry_backoff,
                stall_timeout: self.stall_timeout,
            },
            auto_convert: self.auto_convert,
        })
    }

    /// A request for `url` using the default quality and format for `kind`
    pub fn request_for(&self, url: &str, kind: MediaKind) -> Result<JobRequest> {
        let (quality, format) = match kind {
            MediaKind::Video => (&self.video_quality, &self.video_format),
            MediaKind::Audio => (&self.audio_quality, &self.audio_format),
        };
        let subtitles = (kind == MediaKind::Video && self.download_subtitles)
            .then(|| self.subtitle_languages.clone());
        let request = JobRequest {
            url: url.to_string(),
            kind,
            quality: quality.parse::<Quality>()?,
            format: format.parse::<MediaFormat>()?,
            destination: self.download_location.clone(),
            subtitles,
            embed_metadata: self.embed_metadata,
        };
        request.validate()?;
        Ok(request)
    }
}
