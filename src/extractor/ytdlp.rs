//! yt-dlp process adapter
//!
//! One `start` spawns one yt-dlp process. Its stdout/stderr lines are turned
//! into [`ExtractionEvent`]s: progress samples and activity while it runs, then
//! a single terminal outcome. Cancelling kills the process and removes the
//! download fragments it left behind; finished streams are kept.
//!
//! `--print` makes yt-dlp quiet, so the adapter asks for templated marker
//! lines (progress, post-processing, final path) and only falls back to the
//! classic human-readable lines when they show up.

use crate::extractor::classify::classify_error;
use crate::extractor::models::{
    ExtractionError, ExtractionErrorKind, ExtractionEvent, ExtractionHandle, MediaInfo,
    ProgressEvent, Stage,
};
use crate::extractor::progress::{
    parse_progress_line, parse_progress_marker, MonotonicProgress, PROGRESS_TEMPLATE,
};
use crate::extractor::traits::Extractor;
use crate::queue::{JobRequest, MediaFormat, MediaKind, Quality};
use crate::utils::error::YtdlError;
use crate::utils::tools::find_tool;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

const POSTPROCESS_MARKER: &str = "YTDL_POSTPROCESS|";
const POSTPROCESS_TEMPLATE: &str =
    "postprocess:YTDL_POSTPROCESS|%(progress.postprocessor)s|%(progress.status)s";
const OUTPUT_MARKER: &str = "YTDL_OUTPUT|";
const OUTPUT_PRINT: &str = "after_move:YTDL_OUTPUT|%(filepath)s";

/// Tags yt-dlp prints while working on streams it already has
const POSTPROCESSOR_TAGS: &[&str] = &[
    "[ExtractAudio]",
    "[Merger]",
    "[VideoConvertor]",
    "[VideoRemuxer]",
    "[Metadata]",
    "[EmbedThumbnail]",
    "[EmbedSubtitle]",
    "[ThumbnailsConvertor]",
    "[SubtitlesConvertor]",
    "[MoveFiles]",
    "[Fixup",
];

/// Containers that can carry cover art
const THUMBNAIL_FORMATS: &[MediaFormat] = &[
    MediaFormat::Mp3,
    MediaFormat::M4a,
    MediaFormat::Flac,
    MediaFormat::Ogg,
    MediaFormat::Opus,
    MediaFormat::Mp4,
    MediaFormat::Mkv,
    MediaFormat::Mov,
];

/// Extractor backed by the yt-dlp command line tool
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: PathBuf,
    base_args: Vec<OsString>,
}

impl YtDlpExtractor {
    /// Locate yt-dlp (bundled, PATH, common locations)
    pub fn new() -> Result<Self, YtdlError> {
        let program = find_tool("yt-dlp").ok_or(YtdlError::YtDlpNotFound)?;
        Ok(Self::with_binary(program))
    }

    pub fn with_binary(program: impl Into<PathBuf>) -> Self {
        Self::with_command(program, Vec::<OsString>::new())
    }

    /// Run yt-dlp through a launcher, e.g. `python3 -m yt_dlp`
    pub fn with_command<I, S>(program: impl Into<PathBuf>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn id(&self) -> &'static str {
        "yt-dlp"
    }

    async fn start(&self, request: &JobRequest) -> Result<ExtractionHandle, ExtractionError> {
        tokio::fs::create_dir_all(&request.destination).await?;

        let args = build_args(request);
        debug!("Spawning {:?} {:?} {:?}", self.program, self.base_args, args);

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (line_tx, line_rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx);
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let driver = tokio::spawn(drive(child, line_rx, event_tx, token.clone()));

        info!("Started yt-dlp for {}", request.url);
        Ok(ExtractionHandle::new(event_rx, token, driver))
    }

    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractionError> {
        debug!("Reading media info for {}", url);
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(probe_args(url))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| l.trim_start().starts_with("ERROR:"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(classify_error(&message));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ExtractionError::new(
                ExtractionErrorKind::Unknown,
                format!("unreadable yt-dlp metadata: {}", e),
            )
        })
    }
}

/// Arguments for a metadata-only run
pub fn probe_args(url: &str) -> Vec<String> {
    vec![
        "-J".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--".into(),
        url.trim().to_string(),
    ]
}

/// Build the yt-dlp argument list (excluding the program itself)
pub fn build_args(request: &JobRequest) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--progress".into(),
        "--progress-template".into(),
        PROGRESS_TEMPLATE.into(),
        "--progress-template".into(),
        POSTPROCESS_TEMPLATE.into(),
        "--no-warnings".into(),
        "--no-playlist".into(),
        "--no-simulate".into(),
        "--print".into(),
        OUTPUT_PRINT.into(),
        "-o".into(),
        request
            .destination
            .join(OUTPUT_TEMPLATE)
            .to_string_lossy()
            .into_owned(),
    ];

    match request.kind {
        MediaKind::Video => {
            args.push("-f".into());
            args.push(video_format_selector(request.quality));
            match request.format {
                MediaFormat::Avi => {
                    args.push("--recode-video".into());
                    args.push("avi".into());
                }
                fmt => {
                    args.push("--merge-output-format".into());
                    args.push(fmt.extension().into());
                    args.push("--remux-video".into());
                    args.push(fmt.extension().into());
                }
            }
            if let Some(languages) = &request.subtitles {
                args.push("--write-subs".into());
                args.push("--write-auto-subs".into());
                args.push("--sub-langs".into());
                args.push(languages.join(","));
            }
        }
        MediaKind::Audio => {
            args.push("-f".into());
            args.push("bestaudio/best".into());
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push(audio_codec_name(request.format).into());
            args.push("--audio-quality".into());
            args.push(audio_quality_arg(request.quality));
        }
    }

    if request.embed_metadata {
        args.push("--embed-metadata".into());
        if THUMBNAIL_FORMATS.contains(&request.format) {
            args.push("--embed-thumbnail".into());
        }
    }

    args.push("--".into());
    args.push(request.url.trim().to_string());
    args
}

fn video_format_selector(quality: Quality) -> String {
    match quality {
        Quality::Worst => "worst".to_string(),
        Quality::MaxHeight(h) => format!("bestvideo*[height<={h}]+bestaudio/best[height<={h}]"),
        Quality::Best | Quality::AudioBitrate(_) => "bestvideo*+bestaudio/best".to_string(),
    }
}

fn audio_codec_name(format: MediaFormat) -> &'static str {
    match format {
        MediaFormat::Ogg => "vorbis",
        other => other.extension(),
    }
}

/// yt-dlp takes either a VBR level (0 best .. 10 worst) or a bitrate like `192K`
fn audio_quality_arg(quality: Quality) -> String {
    match quality {
        Quality::Best | Quality::MaxHeight(_) => "0".to_string(),
        Quality::Worst => "9".to_string(),
        Quality::AudioBitrate(k) => format!("{}K", k),
    }
}

fn spawn_line_reader<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

async fn drive(
    mut child: Child,
    mut lines: mpsc::Receiver<String>,
    events: mpsc::Sender<ExtractionEvent>,
    cancel: CancellationToken,
) {
    let mut output = OutputTracker::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                abort(&mut child, &output).await;
                return;
            }
            line = lines.recv() => match line {
                Some(line) => {
                    if let Some(event) = output.observe(&line) {
                        if events.send(event).await.is_err() {
                            abort(&mut child, &output).await;
                            return;
                        }
                    }
                }
                None => break,
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            abort(&mut child, &output).await;
            return;
        }
        status = child.wait() => status,
    };

    let outcome = match status {
        Ok(status) if status.success() => output.final_path().ok_or_else(|| {
            ExtractionError::new(
                ExtractionErrorKind::Unknown,
                "yt-dlp exited successfully but reported no output file",
            )
        }),
        Ok(status) => Err(output.last_error.take().unwrap_or_else(|| {
            ExtractionError::new(
                ExtractionErrorKind::Unknown,
                format!("yt-dlp exited with {}", status),
            )
        })),
        Err(e) => Err(e.into()),
    };

    match &outcome {
        Ok(path) => debug!("yt-dlp finished: {}", path.display()),
        Err(e) => debug!("yt-dlp failed: {}", e),
    }
    let _ = events.send(ExtractionEvent::Finished(outcome)).await;
}

async fn abort(child: &mut Child, output: &OutputTracker) {
    debug!("Stopping yt-dlp while {:?}", output.stage());
    if let Err(e) = child.kill().await {
        debug!("yt-dlp already exited before kill: {}", e);
    }
    for target in output.downloads() {
        remove_fragments(target).await;
    }
}

/// Delete the in-progress files yt-dlp keeps next to `target`.
/// `target` itself and other finished files are left alone.
async fn remove_fragments(target: &Path) {
    let (dir, name) = match (target.parent(), target.file_name().and_then(|n| n.to_str())) {
        (Some(dir), Some(name)) => (dir, name),
        _ => return,
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot scan {} for fragments: {}", dir.display(), e);
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name();
        let is_fragment = file_name
            .to_str()
            .map_or(false, |candidate| is_fragment_of(name, candidate));
        if !is_fragment {
            continue;
        }
        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed partial file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
        }
    }
}

/// `Clip.mp4.part`, `Clip.mp4.part-Frag12`, `Clip.mp4.ytdl` and the
/// post-processor scratch file `Clip.temp.mp4` all belong to `Clip.mp4`
pub(crate) fn is_fragment_of(target: &str, candidate: &str) -> bool {
    if let Some(rest) = candidate.strip_prefix(target) {
        return rest.starts_with(".part") || rest == ".ytdl";
    }
    match target.rsplit_once('.') {
        Some((stem, ext)) => candidate == format!("{}.temp.{}", stem, ext),
        None => false,
    }
}

/// Accumulates what yt-dlp has told us about the files it is writing
#[derive(Debug, Default)]
pub(crate) struct OutputTracker {
    stage: Stage,
    progress: MonotonicProgress,
    /// Streams being downloaded, in order, without duplicates
    downloads: Vec<PathBuf>,
    /// Latest file produced by a merge or conversion
    produced: Option<PathBuf>,
    already_downloaded: Option<PathBuf>,
    printed_path: Option<PathBuf>,
    last_error: Option<ExtractionError>,
}

impl OutputTracker {
    /// Digest one output line. Every non-blank line yields an event: a
    /// progress sample or an activity report carrying the current stage.
    pub(crate) fn observe(&mut self, line: &str) -> Option<ExtractionEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(marker) = parse_progress_marker(trimmed) {
            if let Some(file) = marker.filename {
                self.track_download(file);
            }
            return Some(self.progress_event(marker.line.to_event()));
        }
        if let Some(parsed) = parse_progress_line(trimmed) {
            return Some(self.progress_event(parsed.to_event()));
        }

        if let Some(rest) = trimmed.strip_prefix(POSTPROCESS_MARKER) {
            debug!("yt-dlp post-processing: {}", rest);
            self.stage = Stage::PostProcessing;
        } else if let Some(rest) = trimmed.strip_prefix(OUTPUT_MARKER) {
            self.printed_path = Some(PathBuf::from(rest.trim()));
        } else if trimmed.starts_with("ERROR:") {
            self.last_error = Some(classify_error(trimmed));
        } else if let Some(rest) = trimmed.strip_prefix("[download] Destination: ") {
            self.stage = Stage::Downloading;
            self.track_download(PathBuf::from(rest.trim()));
        } else if let Some(rest) = trimmed
            .strip_prefix("[download] ")
            .and_then(|r| r.strip_suffix(" has already been downloaded"))
        {
            self.already_downloaded = Some(PathBuf::from(rest));
        } else if POSTPROCESSOR_TAGS.iter().any(|tag| trimmed.starts_with(tag)) {
            self.stage = Stage::PostProcessing;
            if let Some(rest) = trimmed.strip_prefix("[Merger] Merging formats into ") {
                self.produced = Some(PathBuf::from(rest.trim().trim_matches('"')));
            } else if let Some(idx) = trimmed.find("Destination: ") {
                let path = trimmed[idx + "Destination: ".len()..].trim();
                self.produced = Some(PathBuf::from(path));
            }
        } else if !trimmed.starts_with('[') && Path::new(trimmed).is_absolute() {
            self.printed_path = Some(PathBuf::from(trimmed));
        }
        Some(ExtractionEvent::Activity(self.stage))
    }

    fn progress_event(&mut self, event: ProgressEvent) -> ExtractionEvent {
        self.stage = Stage::Downloading;
        ExtractionEvent::Progress(self.progress.observe(event))
    }

    fn track_download(&mut self, file: PathBuf) {
        if !self.downloads.contains(&file) {
            self.downloads.push(file);
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn final_path(&self) -> Option<PathBuf> {
        self.printed_path
            .clone()
            .or_else(|| self.produced.clone())
            .or_else(|| self.downloads.last().cloned())
            .or_else(|| self.already_downloaded.clone())
    }

    /// Final names of every stream this attempt downloaded into
    pub(crate) fn downloads(&self) -> &[PathBuf] {
        &self.downloads
    }
}
