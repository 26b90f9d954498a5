//! Media file inspection through ffprobe's JSON output

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;

/// Container-level facts about a local media file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFileInfo {
    /// Seconds
    pub duration: Option<f64>,
    /// Bytes
    pub size: Option<u64>,
    /// Bits per second
    pub bit_rate: Option<u64>,
    /// ffprobe's comma separated demuxer names, e.g. `mov,mp4,m4a,3gp,3g2,mj2`
    pub format_name: Option<String>,
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub bit_rate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frames per second, from `r_frame_rate`
    pub fps: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl MediaFileInfo {
    pub fn video_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }
}

/// ffprobe arguments for `path`
pub fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

// ffprobe prints most numbers as strings
#[derive(Deserialize)]
struct RawProbe {
    #[serde(default)]
    streams: Vec<RawStream>,
    #[serde(default)]
    format: RawFormat,
}

#[derive(Deserialize, Default)]
struct RawFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Deserialize)]
struct RawStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    bit_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

/// Parse the document printed by `ffprobe -print_format json`
pub fn parse_probe_output(json: &[u8]) -> Result<MediaFileInfo, serde_json::Error> {
    let raw: RawProbe = serde_json::from_slice(json)?;
    Ok(MediaFileInfo {
        duration: raw.format.duration.as_deref().and_then(parse_number),
        size: raw.format.size.as_deref().and_then(|s| s.parse().ok()),
        bit_rate: raw.format.bit_rate.as_deref().and_then(|s| s.parse().ok()),
        format_name: raw.format.format_name,
        streams: raw.streams.into_iter().map(StreamInfo::from).collect(),
    })
}

impl From<RawStream> for StreamInfo {
    fn from(raw: RawStream) -> Self {
        let kind = match raw.codec_type.as_deref() {
            Some("video") => StreamKind::Video,
            Some("audio") => StreamKind::Audio,
            Some("subtitle") => StreamKind::Subtitle,
            _ => StreamKind::Other,
        };
        Self {
            index: raw.index,
            kind,
            codec: raw.codec_name,
            bit_rate: raw.bit_rate.as_deref().and_then(|s| s.parse().ok()),
            width: raw.width,
            height: raw.height,
            fps: raw.r_frame_rate.as_deref().and_then(parse_frame_rate),
            sample_rate: raw.sample_rate.as_deref().and_then(|s| s.parse().ok()),
            channels: raw.channels,
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `30000/1001` → 29.97; `0/0` means unknown
fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num = parse_number(num)?;
    let den = parse_number(den)?;
    if den == 0.0 || num == 0.0 {
        return None;
    }
    Some(num / den)
}
