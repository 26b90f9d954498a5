//! Utility modules for error handling, configuration and tool discovery

pub mod config;
pub mod error;
pub mod paths;
pub mod tools;

// Re-export for convenience
pub use config::AppSettings;
pub use error::{ValidationError, YtdlError};
pub use paths::{default_event_log_dir, default_output_dir, get_data_dir, get_downloads_dir};
pub use tools::find_tool;
