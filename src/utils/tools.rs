//! Locating the external yt-dlp and ffmpeg binaries
//!
//! Search order:
//! 1. Next to our own executable (bundled builds)
//! 2. System PATH
//! 3. Common installation paths (Homebrew, pip --user, ...)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Find a tool by executable name, e.g. `yt-dlp` or `ffmpeg`
pub fn find_tool(name: &str) -> Option<PathBuf> {
    if let Some(bundled) = find_bundled(name) {
        info!("Using bundled {}: {:?}", name, bundled);
        return Some(bundled);
    }

    if let Ok(path) = which::which(name) {
        info!("Using system {}: {:?}", name, path);
        return Some(path);
    }

    if let Some(common) = find_in_common_paths(name) {
        info!("Using {} from common path: {:?}", name, common);
        return Some(common);
    }

    warn!("{} not found anywhere", name);
    None
}

fn find_bundled(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;

    let candidates = [exe_dir.join(name), exe_dir.join("bin").join(name)];
    candidates.into_iter().find(|p| {
        debug!("Checking bundled path: {:?}", p);
        is_executable(p)
    })
}

fn find_in_common_paths(name: &str) -> Option<PathBuf> {
    let mut dirs_to_check = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/Library/Frameworks/Python.framework/Versions/Current/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        dirs_to_check.push(home.join(".local").join("bin"));
    }

    dirs_to_check
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

/// Check if a file exists and is executable
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
