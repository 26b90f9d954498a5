//! Job value objects: the request a user submits and the state the scheduler tracks

use crate::converter::ConversionId;
use crate::extractor::{ExtractionError, ProgressEvent};
use crate::utils::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Opaque job identity. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the user wants out of the URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Requested quality.
///
/// Video jobs accept `best`, `worst` or a height cap such as `1080p`.
/// Audio jobs accept `best`, `worst` or a bitrate in kbps such as `192` / `192k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Best,
    Worst,
    MaxHeight(u32),
    AudioBitrate(u32),
}

impl FromStr for Quality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        match raw.as_str() {
            "best" => return Ok(Quality::Best),
            "worst" => return Ok(Quality::Worst),
            _ => {}
        }

        let unknown = || ValidationError::UnknownQuality(s.to_string());
        if let Some(height) = raw.strip_suffix('p') {
            let height = height.parse::<u32>().map_err(|_| unknown())?;
            if height == 0 {
                return Err(unknown());
            }
            return Ok(Quality::MaxHeight(height));
        }

        let bitrate = raw.strip_suffix('k').unwrap_or(&raw);
        bitrate
            .parse::<u32>()
            .map(Quality::AudioBitrate)
            .map_err(|_| unknown())
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Best => f.write_str("best"),
            Quality::Worst => f.write_str("worst"),
            Quality::MaxHeight(h) => write!(f, "{}p", h),
            Quality::AudioBitrate(k) => write!(f, "{}k", k),
        }
    }
}

/// Output container or audio codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp4,
    Mkv,
    Webm,
    Avi,
    Mov,
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
    Aac,
    Opus,
}

impl MediaFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Mkv => "mkv",
            MediaFormat::Webm => "webm",
            MediaFormat::Avi => "avi",
            MediaFormat::Mov => "mov",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::M4a => "m4a",
            MediaFormat::Wav => "wav",
            MediaFormat::Flac => "flac",
            MediaFormat::Ogg => "ogg",
            MediaFormat::Aac => "aac",
            MediaFormat::Opus => "opus",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            MediaFormat::Mp3
                | MediaFormat::M4a
                | MediaFormat::Wav
                | MediaFormat::Flac
                | MediaFormat::Ogg
                | MediaFormat::Aac
                | MediaFormat::Opus
        )
    }

    pub fn kind(&self) -> MediaKind {
        if self.is_audio() {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }
}

impl FromStr for MediaFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => MediaFormat::Mp4,
            "mkv" => MediaFormat::Mkv,
            "webm" => MediaFormat::Webm,
            "avi" => MediaFormat::Avi,
            "mov" => MediaFormat::Mov,
            "mp3" => MediaFormat::Mp3,
            "m4a" => MediaFormat::M4a,
            "wav" => MediaFormat::Wav,
            "flac" => MediaFormat::Flac,
            "ogg" => MediaFormat::Ogg,
            "aac" => MediaFormat::Aac,
            "opus" => MediaFormat::Opus,
            _ => return Err(ValidationError::UnknownFormat(s.to_string())),
        };
        Ok(format)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

const MIN_AUDIO_BITRATE: u32 = 32;
const MAX_AUDIO_BITRATE: u32 = 320;

/// Immutable part of a job, exactly as submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    pub kind: MediaKind,
    pub quality: Quality,
    pub format: MediaFormat,
    pub destination: PathBuf,
    /// Subtitle languages to fetch alongside a video (manual and automatic)
    #[serde(default)]
    pub subtitles: Option<Vec<String>>,
    /// Write tags, and a cover image where the container supports one
    #[serde(default)]
    pub embed_metadata: bool,
}

impl JobRequest {
    pub fn video(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
            quality: Quality::Best,
            format: MediaFormat::Mp4,
            destination: destination.into(),
            subtitles: None,
            embed_metadata: false,
        }
    }

    pub fn audio(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Audio,
            quality: Quality::AudioBitrate(192),
            format: MediaFormat::Mp3,
            destination: destination.into(),
            subtitles: None,
            embed_metadata: false,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_format(mut self, format: MediaFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_subtitles<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtitles = Some(languages.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_metadata(mut self, embed: bool) -> Self {
        self.embed_metadata = embed;
        self
    }

    /// Reject malformed requests before a job exists for them.
    ///
    /// Platform support is not checked here. The extractor reports unsupported
    /// sites as a permanent error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        let parsed = url::Url::parse(url).map_err(|e| ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(ValidationError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        if self.destination.as_os_str().is_empty() {
            return Err(ValidationError::EmptyDestination);
        }

        if self.format.kind() != self.kind {
            return Err(ValidationError::FormatKindMismatch {
                kind: self.kind.to_string(),
                format: self.format.to_string(),
            });
        }

        let quality_ok = match (self.kind, self.quality) {
            (_, Quality::Best | Quality::Worst) => true,
            (MediaKind::Video, Quality::MaxHeight(_)) => true,
            (MediaKind::Audio, Quality::AudioBitrate(k)) => {
                (MIN_AUDIO_BITRATE..=MAX_AUDIO_BITRATE).contains(&k)
            }
            _ => false,
        };
        if !quality_ok {
            return Err(ValidationError::QualityKindMismatch {
                kind: self.kind.to_string(),
                quality: self.quality.to_string(),
            });
        }

        if let Some(languages) = &self.subtitles {
            if self.kind != MediaKind::Video {
                return Err(ValidationError::SubtitlesForAudio);
            }
            if languages.is_empty() {
                return Err(ValidationError::InvalidSubtitleLanguage(String::new()));
            }
            if let Some(bad) = languages.iter().find(|l| !is_language_code(l)) {
                return Err(ValidationError::InvalidSubtitleLanguage(bad.clone()));
            }
        }

        Ok(())
    }
}

// yt-dlp language selectors: `en`, `pt-BR`, `zh-Hans`, `en.*`, `all`
fn is_language_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '*'))
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal edges of the job state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

/// A job snapshot. Callers only ever see clones of the scheduler's copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    pub status: JobStatus,
    /// Fraction in [0, 1]
    pub progress: f64,
    /// Bytes per second
    pub rate: Option<f64>,
    pub eta: Option<Duration>,
    /// 1-based; 0 until the first start
    pub attempt: u32,
    pub retrying: bool,
    pub cancel_requested: bool,
    pub error: Option<ExtractionError>,
    pub output_path: Option<PathBuf>,
    pub conversion: Option<ConversionId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: JobId::new(),
            request,
            status: JobStatus::Queued,
            progress: 0.0,
            rate: None,
            eta: None,
            attempt: 0,
            retrying: false,
            cancel_requested: false,
            error: None,
            output_path: None,
            conversion: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a progress event. Ignored unless running; fraction never goes down.
    pub(crate) fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let fraction = event.fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
        }
        self.rate = event.rate;
        self.eta = event.eta;
        self.retrying = false;
        true
    }
}
