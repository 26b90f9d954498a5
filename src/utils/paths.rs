//! Platform directory resolution. Every path returned here is absolute.

use std::path::PathBuf;
use tracing::{debug, warn};

const APP_DIR_NAME: &str = "ytdl";
const DOWNLOAD_SUBDIR: &str = "YTDL";

/// Per-user data directory, e.g. `~/.local/share/ytdl` or
/// `~/Library/Application Support/ytdl`. Not created here.
pub fn get_data_dir() -> PathBuf {
    let dir = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME);
    debug!("Data directory: {:?}", dir);
    dir
}

/// Where the queue event log goes when no directory is given
pub fn default_event_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Platform Downloads directory
pub fn get_downloads_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| {
            warn!("Could not determine Downloads directory, using temp dir");
            std::env::temp_dir()
        })
}

/// Default batch output directory: `<Downloads>/YTDL`
pub fn default_output_dir() -> PathBuf {
    get_downloads_dir().join(DOWNLOAD_SUBDIR)
}
