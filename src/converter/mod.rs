//! Post-download format conversion

pub mod ffmpeg;
pub mod pool;
pub mod probe;
pub mod profile;
pub mod traits;

pub use ffmpeg::FfmpegConverter;
pub use pool::{ConversionPool, ConversionStatus, ConversionTask};
pub use probe::{MediaFileInfo, StreamInfo, StreamKind};
pub use profile::{ConversionProfile, QualityPreset};
pub use traits::{ConversionError, ConversionErrorKind, Converter};

/// Identifier of a conversion task, unique within one pool
pub type ConversionId = u64;
