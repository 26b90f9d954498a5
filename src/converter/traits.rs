use crate::converter::probe::MediaFileInfo;
use crate::converter::profile::ConversionProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionErrorKind {
    SourceMissing,
    ToolNotFound,
    ToolFailed,
    Cancelled,
    Io,
}

impl fmt::Display for ConversionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionErrorKind::SourceMissing => "source file missing",
            ConversionErrorKind::ToolNotFound => "tool not found",
            ConversionErrorKind::ToolFailed => "conversion failed",
            ConversionErrorKind::Cancelled => "cancelled",
            ConversionErrorKind::Io => "i/o error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ConversionError {
    pub kind: ConversionErrorKind,
    pub message: String,
}

impl ConversionError {
    pub fn new(kind: ConversionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ConversionErrorKind::Cancelled, "conversion cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ConversionErrorKind::Cancelled
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ConversionErrorKind::ToolNotFound,
            _ => ConversionErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

/// Re-encodes a finished download into another container/codec
#[async_trait]
pub trait Converter: Send + Sync {
    fn id(&self) -> &'static str;

    /// Convert `source` according to `profile`, returning the new file's path.
    ///
    /// Progress fractions in [0, 1] are offered on `progress` when the
    /// converter can measure them; a full channel drops the sample. When
    /// `cancel` fires the converter stops, removes its partial output and
    /// returns an error of kind [`ConversionErrorKind::Cancelled`].
    async fn convert(
        &self,
        source: &Path,
        profile: &ConversionProfile,
        progress: Option<mpsc::Sender<f64>>,
        cancel: CancellationToken,
    ) -> Result<PathBuf, ConversionError>;

    /// Inspect a local media file's container and streams
    async fn probe(&self, path: &Path) -> Result<MediaFileInfo, ConversionError> {
        Err(ConversionError::new(
            ConversionErrorKind::ToolNotFound,
            format!("{} cannot inspect {}", self.id(), path.display()),
        ))
    }
}
