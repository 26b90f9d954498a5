//! ffmpeg process adapter
//!
//! Progress comes from `-progress pipe:1` key/value lines on stdout, measured
//! against the `Duration:` header ffmpeg prints on stderr.

use crate::converter::probe::{parse_probe_output, probe_args, MediaFileInfo};
use crate::converter::profile::ConversionProfile;
use crate::converter::traits::{ConversionError, ConversionErrorKind, Converter};
use crate::extractor::progress::parse_clock;
use crate::utils::error::YtdlError;
use crate::utils::tools::find_tool;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STDERR_TAIL: usize = 8;

#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    program: PathBuf,
    base_args: Vec<OsString>,
    probe_program: PathBuf,
    probe_base_args: Vec<OsString>,
}

impl FfmpegConverter {
    /// Locate ffmpeg, and ffprobe next to it or on the usual paths
    pub fn new() -> Result<Self, YtdlError> {
        let program = find_tool("ffmpeg").ok_or(YtdlError::FfmpegNotFound)?;
        let probe = find_tool("ffprobe").unwrap_or_else(|| sibling_ffprobe(&program));
        Ok(Self::with_binary(program).with_probe_command(probe, Vec::<OsString>::new()))
    }

    pub fn with_binary(program: impl Into<PathBuf>) -> Self {
        Self::with_command(program, Vec::<OsString>::new())
    }

    pub fn with_command<I, S>(program: impl Into<PathBuf>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
            probe_program: PathBuf::from("ffprobe"),
            probe_base_args: Vec::new(),
        }
    }

    pub fn with_probe_command<I, S>(mut self, program: impl Into<PathBuf>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.probe_program = program.into();
        self.probe_base_args = base_args.into_iter().map(Into::into).collect();
        self
    }
}

fn sibling_ffprobe(ffmpeg: &Path) -> PathBuf {
    let name = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
    let sibling = ffmpeg.with_file_name(name);
    if sibling.is_file() {
        sibling
    } else {
        PathBuf::from(name)
    }
}

/// Full ffmpeg argument list for converting `source` into `output`
pub fn build_args(source: &Path, output: &Path, profile: &ConversionProfile) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(source.as_os_str().to_owned());
    args.extend(profile.ffmpeg_args().into_iter().map(OsString::from));
    args.extend(["-progress", "pipe:1", "-nostats"].iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

enum Line {
    Stdout(String),
    Stderr(String),
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn id(&self) -> &'static str {
        "ffmpeg"
    }

    async fn convert(
        &self,
        source: &Path,
        profile: &ConversionProfile,
        progress: Option<mpsc::Sender<f64>>,
        cancel: CancellationToken,
    ) -> Result<PathBuf, ConversionError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(ConversionError::new(
                ConversionErrorKind::SourceMissing,
                source.display().to_string(),
            ));
        }

        let output = profile.output_path_for(source);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args = build_args(source, &output, profile);
        debug!("Spawning {:?} {:?} {:?}", self.program, self.base_args, args);

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (line_tx, mut lines) = mpsc::channel::<Line>(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone(), Line::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx, Line::Stderr);
        }

        info!("Converting {} to {}", source.display(), profile);
        let mut meter = ProgressMeter::default();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    abort(&mut child, &output).await;
                    return Err(ConversionError::cancelled());
                }
                line = lines.recv() => match line {
                    Some(Line::Stdout(line)) => {
                        if let (Some(fraction), Some(tx)) = (meter.observe_progress(&line), &progress) {
                            let _ = tx.try_send(fraction);
                        }
                    }
                    Some(Line::Stderr(line)) => {
                        meter.observe_header(&line);
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                abort(&mut child, &output).await;
                return Err(ConversionError::cancelled());
            }
            status = child.wait() => status?,
        };

        if status.success() {
            if let Some(tx) = &progress {
                let _ = tx.try_send(1.0);
            }
            info!("Converted {}", output.display());
            Ok(output)
        } else {
            remove_output(&output).await;
            let detail = tail.iter().rev().find(|l| !l.trim().is_empty()).cloned();
            Err(ConversionError::new(
                ConversionErrorKind::ToolFailed,
                detail.unwrap_or_else(|| format!("ffmpeg exited with {}", status)),
            ))
        }
    }

    async fn probe(&self, path: &Path) -> Result<MediaFileInfo, ConversionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ConversionError::new(
                ConversionErrorKind::SourceMissing,
                path.display().to_string(),
            ));
        }

        let output = Command::new(&self.probe_program)
            .args(&self.probe_base_args)
            .args(probe_args(path))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(ConversionError::new(
                ConversionErrorKind::ToolFailed,
                detail
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("ffprobe exited with {}", output.status)),
            ));
        }

        parse_probe_output(&output.stdout).map_err(|e| {
            ConversionError::new(
                ConversionErrorKind::ToolFailed,
                format!("unreadable ffprobe output: {}", e),
            )
        })
    }
}

fn spawn_line_reader<R>(stream: R, tx: mpsc::Sender<Line>, wrap: fn(String) -> Line)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(wrap(line)).await.is_err() {
                break;
            }
        }
    });
}

async fn abort(child: &mut Child, output: &Path) {
    if let Err(e) = child.kill().await {
        debug!("ffmpeg already exited before kill: {}", e);
    }
    remove_output(output).await;
}

async fn remove_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", output.display(), e),
    }
}

/// Tracks input duration and encoded position
#[derive(Debug, Default)]
pub(crate) struct ProgressMeter {
    duration: Option<Duration>,
    last: f64,
}

impl ProgressMeter {
    /// `  Duration: 00:03:12.45, start: 0.000000, bitrate: 128 kb/s`
    pub(crate) fn observe_header(&mut self, line: &str) {
        if self.duration.is_some() {
            return;
        }
        if let Some(rest) = line.trim_start().strip_prefix("Duration:") {
            let token = rest.split(',').next().unwrap_or("").trim();
            self.duration = parse_clock(token).filter(|d| !d.is_zero());
        }
    }

    /// `out_time=00:01:02.500000`; returns a new fraction when it advanced
    pub(crate) fn observe_progress(&mut self, line: &str) -> Option<f64> {
        let total = self.duration?;
        let value = line.trim().strip_prefix("out_time=")?;
        let position = parse_clock(value)?;
        let fraction = (position.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0);
        if fraction > self.last {
            self.last = fraction;
            Some(fraction)
        } else {
            None
        }
    }
}
