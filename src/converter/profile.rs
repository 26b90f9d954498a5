//! Conversion targets and their ffmpeg encoder settings

use crate::queue::MediaFormat;
use crate::utils::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Quality preset, mapped to CRF/preset for video and bitrate for audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
    Lossless,
}

impl QualityPreset {
    /// (crf, x264 preset)
    fn x264(&self) -> (u8, &'static str) {
        match self {
            QualityPreset::Low => (28, "fast"),
            QualityPreset::Medium => (23, "medium"),
            QualityPreset::High => (18, "slow"),
            QualityPreset::Lossless => (0, "veryslow"),
        }
    }

    /// VP9 uses a 0-63 CRF scale
    fn vp9_crf(&self) -> u8 {
        match self {
            QualityPreset::Low => 40,
            QualityPreset::Medium => 33,
            QualityPreset::High => 24,
            QualityPreset::Lossless => 0,
        }
    }

    fn audio_bitrate(&self) -> &'static str {
        match self {
            QualityPreset::Low => "128k",
            QualityPreset::Medium => "192k",
            QualityPreset::High | QualityPreset::Lossless => "320k",
        }
    }
}

impl FromStr for QualityPreset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" => Ok(QualityPreset::High),
            "lossless" => Ok(QualityPreset::Lossless),
            _ => Err(ValidationError::UnknownQuality(s.to_string())),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
            QualityPreset::Lossless => "lossless",
        };
        f.write_str(s)
    }
}

/// What a finished download should be turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionProfile {
    pub format: MediaFormat,
    #[serde(default)]
    pub preset: QualityPreset,
}

impl ConversionProfile {
    pub fn new(format: MediaFormat, preset: QualityPreset) -> Self {
        Self { format, preset }
    }

    /// Source path with the target extension; never the source itself
    pub fn output_path_for(&self, source: &Path) -> PathBuf {
        let ext = self.format.extension();
        let candidate = source.with_extension(ext);
        if candidate != source {
            return candidate;
        }
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        source.with_file_name(format!("{} (converted).{}", stem, ext))
    }

    /// Encoder arguments placed between `-i <source>` and the output path
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        match self.format {
            MediaFormat::Mp4 | MediaFormat::Mkv | MediaFormat::Avi | MediaFormat::Mov => {
                let (crf, preset) = self.preset.x264();
                push(&["-c:v", "libx264", "-crf", &crf.to_string(), "-preset", preset]);
                push(&["-c:a", "aac", "-b:a", "128k"]);
            }
            MediaFormat::Webm => {
                let crf = self.preset.vp9_crf().to_string();
                push(&["-c:v", "libvpx-vp9", "-crf", &crf, "-b:v", "0"]);
                push(&["-c:a", "libopus", "-b:a", "128k"]);
            }
            MediaFormat::Mp3 => {
                push(&["-vn", "-c:a", "libmp3lame", "-b:a", self.preset.audio_bitrate()]);
            }
            MediaFormat::Wav => push(&["-vn", "-c:a", "pcm_s16le"]),
            MediaFormat::Flac => push(&["-vn", "-c:a", "flac"]),
            MediaFormat::M4a | MediaFormat::Aac => {
                push(&["-vn", "-c:a", "aac", "-b:a", self.preset.audio_bitrate()]);
            }
            MediaFormat::Ogg => push(&["-vn", "-c:a", "libvorbis"]),
            MediaFormat::Opus => {
                push(&["-vn", "-c:a", "libopus", "-b:a", self.preset.audio_bitrate()]);
            }
        }
        args
    }
}

impl fmt::Display for ConversionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.format, self.preset)
    }
}
