//! yt-dlp progress line parsing

use crate::extractor::models::ProgressEvent;
use std::path::PathBuf;
use std::time::Duration;

pub const PROGRESS_MARKER: &str = "YTDL_PROGRESS|";

/// `--progress-template` producing lines for [`parse_progress_marker`].
/// Printed even when yt-dlp runs quiet, which `--print` implies.
pub const PROGRESS_TEMPLATE: &str = "download:YTDL_PROGRESS|%(progress.status)s|\
%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|\
%(progress.speed)s|%(progress.eta)s|%(progress.filename)s";

/// One parsed `[download]` progress line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressLine {
    /// Percent in [0, 100]
    pub percent: f64,
    pub total_bytes: Option<u64>,
    pub speed_bps: Option<f64>,
    pub eta: Option<Duration>,
}

impl ProgressLine {
    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent {
            fraction: (self.percent / 100.0).clamp(0.0, 1.0),
            rate: self.speed_bps,
            eta: self.eta,
        }
    }
}

/// Parse lines like `[download]  42.5% of ~ 150.00MiB at  5.20MiB/s ETA 00:15`
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let rest = line.trim_start().strip_prefix("[download]")?;
    let pct_pos = rest.find('%')?;
    let percent = rest[..pct_pos].trim().parse::<f64>().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }
    let after = &rest[pct_pos + 1..];

    let total_bytes = after.find(" of ").and_then(|idx| {
        let token = after[idx + 4..].trim_start().trim_start_matches('~').trim_start();
        let end = token.find(char::is_whitespace).unwrap_or(token.len());
        parse_size(&token[..end]).map(|b| b as u64)
    });

    let speed_bps = after.find(" at ").and_then(|idx| {
        let token = after[idx + 4..].trim_start();
        let slash = token.find("/s")?;
        parse_size(&token[..slash])
    });

    let eta = after.find("ETA ").and_then(|idx| {
        let token = after[idx + 4..].trim();
        let end = token.find(char::is_whitespace).unwrap_or(token.len());
        parse_clock(&token[..end])
    });

    Some(ProgressLine {
        percent,
        total_bytes,
        speed_bps,
        eta,
    })
}

/// One templated progress line
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerProgress {
    pub line: ProgressLine,
    /// Final name of the stream being written (not the `.part` name)
    pub filename: Option<PathBuf>,
    pub finished: bool,
}

/// Parse `YTDL_PROGRESS|status|downloaded|total|estimate|speed|eta|filename`.
/// yt-dlp writes `NA` for fields it does not know yet.
pub fn parse_progress_marker(line: &str) -> Option<MarkerProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.splitn(7, '|');
    let status = fields.next()?;
    let downloaded = number(fields.next()?);
    let total = number(fields.next()?).or(number(fields.next()?));
    let speed_bps = number(fields.next()?);
    let eta = number(fields.next()?).map(Duration::from_secs_f64);
    let filename = fields
        .next()
        .map(str::trim)
        .filter(|f| !f.is_empty() && *f != "NA")
        .map(PathBuf::from);

    let finished = status == "finished";
    let percent = match (downloaded, total) {
        _ if finished => 100.0,
        (Some(done), Some(total)) if total > 0.0 => (done / total * 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    };

    Some(MarkerProgress {
        line: ProgressLine {
            percent,
            total_bytes: total.map(|t| t as u64),
            speed_bps,
            eta,
        },
        filename,
        finished,
    })
}

fn number(field: &str) -> Option<f64> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// `10.50MiB` → bytes. Accepts binary and decimal units.
pub fn parse_size(token: &str) -> Option<f64> {
    let token = token.trim();
    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    if split == 0 {
        return None;
    }
    let num = token[..split].parse::<f64>().ok()?;
    let multiplier = match token[split..].trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" | "kB" => 1_000.0,
        "MB" => 1_000_000.0,
        "GB" => 1_000_000_000.0,
        _ => return None,
    };
    Some(num * multiplier)
}

/// `HH:MM:SS(.ms)`, `MM:SS` or bare seconds → duration
pub fn parse_clock(token: &str) -> Option<Duration> {
    let mut secs = 0.0f64;
    for part in token.trim().split(':') {
        let value = part.parse::<f64>().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        secs = secs * 60.0 + value;
    }
    Some(Duration::from_secs_f64(secs))
}

/// Keeps emitted fractions non-decreasing across the several streams yt-dlp may
/// download for one job (each restarts at 0%).
#[derive(Debug, Default)]
pub struct MonotonicProgress {
    high_water: f64,
}

impl MonotonicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, mut event: ProgressEvent) -> ProgressEvent {
        if event.fraction < self.high_water {
            event.fraction = self.high_water;
        } else {
            self.high_water = event.fraction;
        }
        event
    }
}
