pub mod classify;
pub mod models;
pub mod progress;
pub mod traits;
pub mod ytdlp;

pub use classify::classify_error;
pub use models::{
    ExtractionError, ExtractionErrorKind, ExtractionEvent, ExtractionHandle, MediaInfo, FormatInfo,
    ProgressEvent, Stage,
};
pub use traits::Extractor;
pub use ytdlp::YtDlpExtractor;
