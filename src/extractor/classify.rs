//! Map yt-dlp error text onto retry classes

use crate::extractor::models::{ExtractionError, ExtractionErrorKind};

/// Classify the message of an `ERROR:` line (prefix optional)
pub fn classify_error(message: &str) -> ExtractionError {
    let message = message.trim();
    let message = message.strip_prefix("ERROR:").unwrap_or(message).trim();
    let lower = message.to_lowercase();

    let kind = if lower.contains("unsupported url") || lower.contains("no suitable extractor") {
        ExtractionErrorKind::UnsupportedPlatform
    } else if lower.contains("is not a valid url")
        || lower.contains("invalid url")
        || lower.contains("name or service not known")
    {
        ExtractionErrorKind::InvalidUrl
    } else if lower.contains("http error 429")
        || lower.contains("too many requests")
        || lower.contains("rate-limit")
        || lower.contains("rate limit")
    {
        ExtractionErrorKind::RateLimited
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ExtractionErrorKind::NetworkTimeout
    } else if lower.contains("private video")
        || lower.contains("sign in to confirm your age")
        || lower.contains("members-only")
        || lower.contains("http error 401")
        || lower.contains("http error 403")
        || lower.contains("permission denied")
        || lower.contains("login required")
    {
        ExtractionErrorKind::PermissionDenied
    } else if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("this video is not available")
        || lower.contains("http error 404")
        || lower.contains("http error 410")
        || lower.contains("does not exist")
    {
        ExtractionErrorKind::ContentUnavailable
    } else if lower.contains("http error 5")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("temporary failure")
        || lower.contains("unable to download webpage")
        || lower.contains("incomplete read")
    {
        ExtractionErrorKind::TemporarilyUnavailable
    } else if lower.contains("no space left on device") || lower.contains("read-only file system")
    {
        ExtractionErrorKind::Io
    } else {
        ExtractionErrorKind::Unknown
    };

    ExtractionError::new(kind, message)
}
