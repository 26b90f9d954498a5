use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ytdl::extractor::classify_error;
use ytdl::extractor::progress::{parse_progress_line, MonotonicProgress};
use ytdl::extractor::ProgressEvent;
use ytdl::{ConversionProfile, MediaFormat, QualityPreset};

fn benchmark_progress_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Progress Parsing");

    let lines = [
        ("full", "[download]  42.5% of ~ 150.00MiB at  5.20MiB/s ETA 00:15"),
        ("no_total", "[download]   3.0% at 512.00KiB/s ETA 01:02:03"),
        ("finished", "[download] 100% of 12.34MiB in 00:02"),
        ("unrelated", "[youtube] abc123: Downloading webpage"),
    ];

    for (name, line) in lines {
        group.bench_with_input(BenchmarkId::new("parse_progress_line", name), &line, |b, line| {
            b.iter(|| parse_progress_line(black_box(line)))
        });
    }

    group.finish();
}

fn benchmark_monotonic_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("Monotonic Progress");
    let sample_counts = [100usize, 1_000, 10_000];

    for count in sample_counts {
        // Two passes (video then audio stream) so half the samples go backwards
        let samples: Vec<ProgressEvent> = (0..count)
            .map(|i| ProgressEvent {
                fraction: ((i * 2) % count) as f64 / count as f64,
                rate: Some(1_048_576.0),
                eta: None,
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("observe", count), &samples, |b, samples| {
            b.iter(|| {
                let mut progress = MonotonicProgress::new();
                for event in samples {
                    black_box(progress.observe(*event));
                }
            })
        });
    }

    group.finish();
}

fn benchmark_error_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("Error Classification");

    let messages = [
        ("timeout", "ERROR: Unable to download webpage: The read operation timed out"),
        ("rate_limit", "ERROR: HTTP Error 429: Too Many Requests"),
        ("private", "ERROR: [youtube] abc123: Private video. Sign in if you've been granted access"),
        ("unknown", "ERROR: something nobody has seen before"),
    ];

    for (name, message) in messages {
        group.bench_with_input(BenchmarkId::new("classify_error", name), &message, |b, message| {
            b.iter(|| classify_error(black_box(message)))
        });
    }

    group.finish();
}

fn benchmark_ffmpeg_args(c: &mut Criterion) {
    let mut group = c.benchmark_group("Conversion Arguments");

    for format in [MediaFormat::Mp4, MediaFormat::Webm, MediaFormat::Mp3, MediaFormat::Flac] {
        let profile = ConversionProfile::new(format, QualityPreset::High);
        group.bench_with_input(
            BenchmarkId::new("ffmpeg_args", format.extension()),
            &profile,
            |b, profile| b.iter(|| black_box(profile).ffmpeg_args()),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_progress_parsing,
    benchmark_monotonic_filter,
    benchmark_error_classification,
    benchmark_ffmpeg_args
);
criterion_main!(benches);
