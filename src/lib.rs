//! ytdl: batch download queue around yt-dlp and ffmpeg

pub mod converter;
pub mod extractor;
pub mod queue;
pub mod scheduler;
pub mod utils;

// Re-export main types for easier use
pub use converter::{ConversionPool, ConversionProfile, FfmpegConverter, QualityPreset};
pub use extractor::{Extractor, YtDlpExtractor};
pub use queue::{Job, JobId, JobRequest, JobStatus, MediaFormat, MediaKind, Quality, QueueEvent};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use utils::{AppSettings, YtdlError};
