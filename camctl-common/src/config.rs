//! Configuration loading and capture folder resolution
//!
//! The TOML file is bootstrap only: where captures go, how to log, and the
//! application-wide transfer/preview/viewer switches. Session and preset
//! sections are layered on top by the service crate (see
//! `camctl_capture::config::CaptureConfig`), which flattens [`TomlConfig`].
//!
//! # Capture folder priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `CAMCTL_CAPTURE_FOLDER` environment variable
//! 3. TOML `capture_folder`
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted for the capture folder
pub const CAPTURE_FOLDER_ENV: &str = "CAMCTL_CAPTURE_FOLDER";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Destination folder for captures (optional)
    #[serde(default)]
    pub capture_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Capture dispatch switches
    #[serde(default)]
    pub transfer: TransferSettings,

    /// Automatic preview behaviour
    #[serde(default)]
    pub preview: PreviewSettings,

    /// Full screen / external viewer / sound switches
    #[serde(default)]
    pub viewer: ViewerSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Capture dispatch switches
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransferSettings {
    /// Run transfers from different cameras concurrently
    ///
    /// When false every capture is handled under one global exclusive section.
    #[serde(default)]
    pub parallel_transfer: bool,
}

/// Automatic preview behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewSettings {
    /// Push each new capture to the viewer
    #[serde(default = "default_true")]
    pub auto_preview: bool,

    /// Only auto-preview `.jpg` files (raw files are expensive to render)
    #[serde(default)]
    pub auto_preview_jpg_only: bool,

    /// Coalesce bursts of captures so only the last one is shown
    #[serde(default)]
    pub delayed_loading: bool,

    /// Quiet interval for delayed loading in milliseconds
    #[serde(default = "default_quiet_interval_ms")]
    pub quiet_interval_ms: u64,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            auto_preview: true,
            auto_preview_jpg_only: false,
            delayed_loading: false,
            quiet_interval_ms: default_quiet_interval_ms(),
        }
    }
}

fn default_quiet_interval_ms() -> u64 {
    4000
}

fn default_true() -> bool {
    true
}

/// Full screen / external viewer / sound switches
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewerSettings {
    /// Show each capture full screen for a short time
    #[serde(default)]
    pub full_screen_preview: bool,

    /// Hand captures to an external viewer instead of the built-in one
    #[serde(default)]
    pub use_external_viewer: bool,

    /// External viewer executable
    #[serde(default)]
    pub external_viewer_path: Option<PathBuf>,

    /// External viewer arguments; `%1` is replaced with the image path
    #[serde(default)]
    pub external_viewer_args: String,

    /// Play a sound after each transfer
    #[serde(default)]
    pub play_sound: bool,

    /// Emit the ambient "photo transferred" notification
    #[serde(default)]
    pub show_transfer_notification: bool,
}

/// Resolve the capture destination folder
///
/// Follows the priority order documented at module level. `toml_value` is the
/// already-loaded `capture_folder` entry, if any.
pub fn resolve_capture_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CAPTURE_FOLDER_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    default_capture_folder()
}

/// OS-dependent default capture folder
///
/// `~/Pictures/camctl` where the platform has a pictures folder.
pub fn default_capture_folder() -> PathBuf {
    dirs::picture_dir()
        .map(|d| d.join("camctl"))
        .unwrap_or_else(|| PathBuf::from("./camctl_captures"))
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("camctl").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load a TOML configuration file
///
/// A missing file is not an error: a warning is logged and `T::default()` is
/// returned so the application can start with built-in defaults. A file that
/// exists but does not parse is an error.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<T>(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write a configuration back to a TOML file, creating parent directories
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, content)?;
    Ok(())
}
