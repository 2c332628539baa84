//! Photo session: where and how captures are named, stored, tagged and
//! post-processed
//!
//! The running counter and series live here. They are only ever advanced by
//! the coordinator task (see [`crate::coordinator`]); workers see snapshots.

use crate::device::CameraDevice;
use crate::error::{Error, Result};
use crate::naming::unique_path;
use crate::plugins::PluginConfig;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum number of keyword tags a session carries
pub const MAX_KEYWORD_TAGS: usize = 4;

/// Default naming template
pub const DEFAULT_TEMPLATE: &str = "[Session Name]_[Counter 4 digit]";

/// Active capture session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    #[serde(default = "default_name")]
    pub name: String,

    /// Destination folder (absolute once the service has resolved it)
    #[serde(default)]
    pub folder: PathBuf,

    /// Naming template, see [`Session::next_file_name`]
    #[serde(default = "default_template")]
    pub file_name_template: String,

    /// Keep the camera's file name instead of the template
    #[serde(default)]
    pub use_original_filename: bool,

    #[serde(default)]
    pub allow_overwrite: bool,

    #[serde(default)]
    pub lower_case_extension: bool,

    /// Session-level "leave captures on the card" switch
    #[serde(default)]
    pub no_download: bool,

    #[serde(default)]
    pub download_only_jpg: bool,

    /// Keep a second copy in `backup_folder`
    #[serde(default)]
    pub backup: bool,

    #[serde(default)]
    pub backup_folder: Option<PathBuf>,

    #[serde(default)]
    pub write_comment: bool,

    #[serde(default)]
    pub comment: String,

    /// Up to four keyword tags; empty ones are skipped
    #[serde(default)]
    pub keyword_tags: Vec<String>,

    /// Post-capture plugins, run in order
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,

    /// Running counter, advanced once per templated name
    #[serde(default)]
    pub counter: u32,

    #[serde(default)]
    pub series: u32,
}

fn default_name() -> String {
    "Default".to_string()
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

impl Default for Session {
    fn default() -> Self {
        Self {
            name: default_name(),
            folder: PathBuf::new(),
            file_name_template: default_template(),
            use_original_filename: false,
            allow_overwrite: false,
            lower_case_extension: false,
            no_download: false,
            download_only_jpg: false,
            backup: false,
            backup_folder: None,
            write_comment: false,
            comment: String::new(),
            keyword_tags: Vec::new(),
            plugins: Vec::new(),
            counter: 0,
            series: 0,
        }
    }
}

impl Session {
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            folder: folder.into(),
            ..Default::default()
        }
    }

    /// Non-empty keyword tags, at most [`MAX_KEYWORD_TAGS`]
    pub fn active_keywords(&self) -> impl Iterator<Item = &str> {
        self.keyword_tags
            .iter()
            .take(MAX_KEYWORD_TAGS)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
    }

    /// Generate the next templated destination path and advance the counter
    ///
    /// Supported tokens:
    /// - `[Session Name]`, `[Camera Name]`
    /// - `[Counter N digit]`, `[Series N digit]` (N = 1..9, zero padded)
    /// - `[Original Filename]` (stem of the camera's file name)
    /// - `[Date yyyy-MM-dd]`, `[Time hh-mm-ss]`
    ///
    /// Unknown tokens are kept literally. The extension always comes from the
    /// capture. The result depends only on the template, the counter, the
    /// names and `now`.
    pub fn next_file_name(
        &mut self,
        original_file_name: &str,
        camera_name: &str,
        now: DateTime<Local>,
    ) -> PathBuf {
        self.counter += 1;

        let original = Path::new(original_file_name);
        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = original
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut name = String::new();
        let mut rest = self.file_name_template.as_str();
        while let Some(open) = rest.find('[') {
            name.push_str(&rest[..open]);
            let Some(close) = rest[open..].find(']') else {
                name.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let token = &rest[open + 1..open + close];
            match self.expand_token(token, &stem, camera_name, now) {
                Some(value) => name.push_str(&value),
                None => name.push_str(&rest[open..=open + close]),
            }
            rest = &rest[open + close + 1..];
        }
        name.push_str(rest);

        let name = sanitize_file_name(&name);
        let path = self.folder.join(format!("{}{}", name, extension));
        debug!(counter = self.counter, path = %path.display(), "Generated file name");
        path
    }

    fn expand_token(
        &self,
        token: &str,
        stem: &str,
        camera_name: &str,
        now: DateTime<Local>,
    ) -> Option<String> {
        match token {
            "Session Name" => Some(self.name.clone()),
            "Camera Name" => Some(camera_name.to_string()),
            "Original Filename" => Some(stem.to_string()),
            "Date yyyy-MM-dd" => Some(now.format("%Y-%m-%d").to_string()),
            "Time hh-mm-ss" => Some(now.format("%H-%M-%S").to_string()),
            _ => {
                let (kind, digits) = parse_numbered_token(token)?;
                let value = match kind {
                    "Counter" => self.counter,
                    "Series" => self.series,
                    _ => return None,
                };
                Some(format!("{:0width$}", value, width = digits))
            }
        }
    }

    /// Copy the staged capture into the backup folder
    ///
    /// The backup keeps the destination's file name; an existing file of the
    /// same name is resolved around with a numeric suffix. Returns the path
    /// written.
    pub fn copy_backup(&self, staged: &Path, destination: &Path) -> Result<PathBuf> {
        let folder = self
            .backup_folder
            .as_ref()
            .ok_or_else(|| Error::Backup("Backup enabled but no backup folder set".to_string()))?;

        let file_name = destination
            .file_name()
            .ok_or_else(|| Error::Backup(format!("No file name in {}", destination.display())))?;

        std::fs::create_dir_all(folder).map_err(|e| {
            Error::Backup(format!("Cannot create backup folder {}: {}", folder.display(), e))
        })?;

        let target = unique_path(&folder.join(file_name));
        std::fs::copy(staged, &target).map_err(|e| {
            Error::Backup(format!("Backup copy to {} failed: {}", target.display(), e))
        })?;
        Ok(target)
    }
}

/// Parse `Counter 4 digit` into ("Counter", 4)
fn parse_numbered_token(token: &str) -> Option<(&str, usize)> {
    let mut parts = token.split_whitespace();
    let kind = parts.next()?;
    let digits: usize = parts.next()?.parse().ok()?;
    if parts.next()? != "digit" || parts.next().is_some() || !(1..=9).contains(&digits) {
        return None;
    }
    Some((kind, digits))
}

/// Replace characters that are illegal in file names on common platforms
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Template fields attached to each cataloged item
pub fn template_fields(
    device: &dyn CameraDevice,
    serial: &str,
    session: &Session,
) -> std::collections::BTreeMap<String, String> {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("camera".to_string(), device.display_name());
    fields.insert("serial".to_string(), serial.to_string());
    fields.insert("session".to_string(), session.name.clone());
    fields.insert("series".to_string(), session.series.to_string());
    fields.insert("counter".to_string(), session.counter.to_string());
    fields
}
