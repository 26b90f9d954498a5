//! ytdl - batch media downloader
//!
//! Queues every URL given on the command line (or in a file), downloads them
//! through yt-dlp with bounded concurrency and optionally converts the results
//! with ffmpeg.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use ytdl::converter::{
    ConversionPool, ConversionProfile, ConversionStatus, Converter, FfmpegConverter,
};
use ytdl::extractor::Extractor;
use ytdl::queue::{EventLog, JobId, JobStatus, MediaKind, QueueEvent};
use ytdl::scheduler::{Scheduler, SchedulerHandle};
use ytdl::utils::{default_event_log_dir, AppSettings};
use ytdl::YtDlpExtractor;

#[derive(Parser)]
#[command(name = "ytdl", version, about = "Batch downloader built on yt-dlp")]
struct Args {
    /// URLs to download
    urls: Vec<String>,

    /// Read additional URLs from a file, one per line
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Extract audio instead of downloading video
    #[arg(short = 'a', long)]
    audio: bool,

    /// Quality, e.g. best, worst, 720p, 192k
    #[arg(short = 'q', long)]
    quality: Option<String>,

    /// Output container or audio format, e.g. mp4, mkv, mp3, flac
    #[arg(long)]
    format: Option<String>,

    /// Output directory
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Concurrent downloads (1-5)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Retries after a transient failure
    #[arg(long)]
    retries: Option<u32>,

    /// Convert every finished download to this format
    #[arg(long)]
    convert_to: Option<String>,

    /// Conversion preset: low, medium, high, lossless
    #[arg(long, default_value = "medium")]
    convert_quality: String,

    /// Parallel conversions (1-2)
    #[arg(long, default_value_t = 1)]
    conversions: usize,

    /// Delete the downloaded file after a successful conversion
    #[arg(long)]
    delete_original: bool,

    /// Also fetch subtitles (video only)
    #[arg(long)]
    subs: bool,

    /// Subtitle languages, comma separated
    #[arg(long, value_delimiter = ',')]
    sub_langs: Vec<String>,

    /// Do not embed tags and cover art
    #[arg(long)]
    no_metadata: bool,

    /// Write a JSON-lines log of queue events, to DIR or the data directory
    #[arg(long, value_name = "DIR", require_equals = true)]
    event_log: Option<Option<PathBuf>>,

    /// Print title, uploader and available formats instead of downloading
    #[arg(long)]
    info: bool,

    /// Print container and stream details of local media files, then exit
    #[arg(long, value_name = "FILE", num_args = 1..)]
    inspect: Vec<PathBuf>,
}

impl Args {
    fn event_log_dir(&self) -> Option<PathBuf> {
        self.event_log
            .as_ref()
            .map(|dir| dir.clone().unwrap_or_else(default_event_log_dir))
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

fn settings_from(args: &Args) -> Result<AppSettings> {
    let mut settings = AppSettings::default();
    if let Some(output) = &args.output {
        settings.download_location = output.clone();
    }
    if let Some(n) = args.concurrency {
        settings.max_concurrent = n;
    }
    if let Some(n) = args.retries {
        settings.retry_attempts = n;
    }
    match (args.audio, &args.quality) {
        (true, Some(q)) => settings.audio_quality = q.clone(),
        (false, Some(q)) => settings.video_quality = q.clone(),
        _ => {}
    }
    match (args.audio, &args.format) {
        (true, Some(f)) => settings.audio_format = f.clone(),
        (false, Some(f)) => settings.video_format = f.clone(),
        _ => {}
    }
    if let Some(target) = &args.convert_to {
        settings.auto_convert = Some(ConversionProfile::new(
            target.parse()?,
            args.convert_quality.parse()?,
        ));
    }
    settings.max_concurrent_conversions = args.conversions;
    settings.keep_original = !args.delete_original;
    settings.download_subtitles = args.subs;
    if !args.sub_langs.is_empty() {
        settings.subtitle_languages = args.sub_langs.clone();
    }
    settings.embed_metadata = !args.no_metadata;

    settings.validate()?;
    Ok(settings)
}

async fn collect_urls(args: &Args) -> Result<Vec<String>> {
    let mut urls = args.urls.clone();
    if let Some(file) = &args.file {
        let contents = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read URL list {}", file.display()))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    Ok(urls)
}

async fn run(args: Args) -> Result<ExitCode> {
    if !args.inspect.is_empty() {
        return inspect_files(&args.inspect).await;
    }

    let settings = settings_from(&args)?;
    let urls = collect_urls(&args).await?;
    if urls.is_empty() {
        bail!("No URLs given");
    }

    let extractor = YtDlpExtractor::new().context("yt-dlp is required")?;
    if args.info {
        return print_info(&extractor, &urls).await;
    }
    let pool = match settings.auto_convert {
        Some(_) => {
            let converter = FfmpegConverter::new().context("ffmpeg is required for --convert-to")?;
            Some(Arc::new(ConversionPool::new(
                Arc::new(converter),
                settings.max_concurrent_conversions,
                settings.keep_original,
            )?))
        }
        None => None,
    };

    let (handle, scheduler) =
        Scheduler::spawn(settings.scheduler_config()?, Arc::new(extractor), pool.clone());

    let recorder = match args.event_log_dir() {
        Some(dir) => {
            let log = EventLog::new(&dir).await?;
            println!("Logging events to {}", log.path().display());
            Some(log.spawn_recorder(handle.subscribe()))
        }
        None => None,
    };
    let printer = tokio::spawn(print_events(handle.subscribe()));

    let kind = if args.audio {
        MediaKind::Audio
    } else {
        MediaKind::Video
    };
    let mut rejected = 0usize;
    let mut requests = Vec::with_capacity(urls.len());
    for url in &urls {
        match settings.request_for(url, kind) {
            Ok(request) => requests.push(request),
            Err(e) => {
                eprintln!("Skipping {}: {}", url, e);
                rejected += 1;
            }
        }
    }
    for result in handle.enqueue_many(requests).await? {
        if let Err(e) = result {
            eprintln!("Rejected: {}", e);
            rejected += 1;
        }
    }

    wait_for_batch(&handle, pool.as_deref()).await?;

    let jobs = handle.list().await?;
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
    let completed = jobs.iter().filter(|j| j.status == JobStatus::Completed).count();
    let cancelled = jobs.iter().filter(|j| j.status == JobStatus::Cancelled).count();
    let mut failed_conversions = 0usize;
    if let Some(pool) = &pool {
        for task in pool.list().await {
            match task.status {
                ConversionStatus::Completed { output } => println!("Converted: {}", output.display()),
                ConversionStatus::Failed { error } => {
                    eprintln!("Conversion of {} failed: {}", task.source.display(), error);
                    failed_conversions += 1;
                }
                _ => {}
            }
        }
    }

    println!(
        "Done: {} completed, {} failed, {} cancelled, {} rejected",
        completed, failed, cancelled, rejected
    );

    handle.shutdown().await?;
    scheduler.await??;
    drop(handle);
    printer.abort();
    if let Some(recorder) = recorder {
        let _ = recorder.await;
    }

    if failed + rejected + failed_conversions > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn print_info(extractor: &YtDlpExtractor, urls: &[String]) -> Result<ExitCode> {
    let mut failures = 0usize;
    for url in urls {
        let info = match extractor.probe(url).await {
            Ok(info) => info,
            Err(e) => {
                eprintln!("{}: {}", url, e);
                failures += 1;
                continue;
            }
        };
        println!("{}", url);
        println!("  Title:    {}", info.title.as_deref().unwrap_or("Unknown"));
        println!("  Uploader: {}", info.uploader.as_deref().unwrap_or("Unknown"));
        if let Some(duration) = info.duration {
            println!("  Duration: {}", clock(duration));
        }
        if let Some(views) = info.view_count {
            println!("  Views:    {}", views);
        }
        if let Some(date) = &info.upload_date {
            println!("  Uploaded: {}", date);
        }
        for format in info.video_formats() {
            println!(
                "  video {:>8} {:>5} {:>5}p{}",
                format.format_id,
                format.ext.as_deref().unwrap_or("?"),
                format.height.unwrap_or(0),
                format.size().map(megabytes).unwrap_or_default()
            );
        }
        for format in info.audio_formats() {
            println!(
                "  audio {:>8} {:>5} {:>4.0}k{}",
                format.format_id,
                format.ext.as_deref().unwrap_or("?"),
                format.abr.unwrap_or(0.0),
                format.size().map(megabytes).unwrap_or_default()
            );
        }
    }
    Ok(if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn inspect_files(paths: &[PathBuf]) -> Result<ExitCode> {
    let converter = FfmpegConverter::new().context("ffmpeg and ffprobe are required for --inspect")?;
    let mut failures = 0usize;
    for path in paths {
        let info = match converter.probe(path).await {
            Ok(info) => info,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };
        println!("{}", path.display());
        println!("  Format:   {}", info.format_name.as_deref().unwrap_or("unknown"));
        if let Some(duration) = info.duration {
            println!("  Duration: {}", clock(duration));
        }
        if let Some(size) = info.size {
            println!("  Size:    {}", megabytes(size));
        }
        for stream in &info.streams {
            let mut line = format!(
                "  #{} {:?} {}",
                stream.index,
                stream.kind,
                stream.codec.as_deref().unwrap_or("?")
            );
            if let (Some(w), Some(h)) = (stream.width, stream.height) {
                line.push_str(&format!(" {}x{}", w, h));
            }
            if let Some(fps) = stream.fps {
                line.push_str(&format!(" {:.2}fps", fps));
            }
            if let Some(rate) = stream.sample_rate {
                line.push_str(&format!(" {}Hz", rate));
            }
            if let Some(channels) = stream.channels {
                line.push_str(&format!(" {}ch", channels));
            }
            println!("{}", line);
        }
    }
    Ok(if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

fn megabytes(bytes: u64) -> String {
    format!(" {:.1} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Wait for downloads (then conversions) to drain; Ctrl-C cancels the batch
async fn wait_for_batch(handle: &SchedulerHandle, pool: Option<&ConversionPool>) -> Result<()> {
    tokio::select! {
        stats = handle.wait_until_idle() => { stats?; }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling the batch");
            let count = handle.cancel_all().await?;
            println!("Cancelling {} jobs...", count);
            if let Some(pool) = pool {
                pool.cancel_all().await;
            }
            handle.wait_until_idle().await?;
        }
    }

    if let Some(pool) = pool {
        tokio::select! {
            _ = pool.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling conversions");
                pool.cancel_all().await;
                pool.wait_idle().await;
            }
        }
    }
    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<QueueEvent>) {
    let mut shown: HashMap<JobId, u32> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        match event {
            QueueEvent::JobQueued { job_id, request, .. } => {
                println!("[{}] queued {}", short(job_id), request.url)
            }
            QueueEvent::JobStarted { job_id, .. } => println!("[{}] started", short(job_id)),
            QueueEvent::JobProgress {
                job_id, fraction, rate, ..
            } => {
                let decile = (fraction * 10.0).floor() as u32;
                let last = shown.entry(job_id).or_insert(0);
                if decile > *last {
                    *last = decile;
                    let speed = rate
                        .map(|r| format!(", {:.2} MB/s", r / 1024.0 / 1024.0))
                        .unwrap_or_default();
                    println!("[{}] {:.0}%{}", short(job_id), fraction * 100.0, speed);
                }
            }
            QueueEvent::JobRetrying {
                job_id,
                attempt,
                error,
                ..
            } => println!("[{}] retrying (attempt {}): {}", short(job_id), attempt, error),
            QueueEvent::JobCompleted {
                job_id,
                output_path,
                ..
            } => println!("[{}] done: {}", short(job_id), output_path.display()),
            QueueEvent::JobFailed { job_id, error, .. } => {
                println!("[{}] failed: {}", short(job_id), error)
            }
            QueueEvent::JobCancelled { job_id, .. } => println!("[{}] cancelled", short(job_id)),
            QueueEvent::ConversionQueued {
                job_id,
                conversion_id,
                ..
            } => println!("[{}] conversion #{} queued", short(job_id), conversion_id),
            _ => {}
        }
    }
}

fn short(id: JobId) -> String {
    id.to_string().chars().take(8).collect()
}
