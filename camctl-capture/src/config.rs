//! Service configuration
//!
//! The shared bootstrap sections (`capture_folder`, `[logging]`,
//! `[transfer]`, `[preview]`, `[viewer]`) come from
//! [`camctl_common::config::TomlConfig`]; this crate adds the active
//! `[session]` and the saved `[[presets]]`.
//!
//! ```toml
//! capture_folder = "/data/shoot"
//!
//! [transfer]
//! parallel_transfer = true
//!
//! [session]
//! name = "Wedding"
//! file_name_template = "[Session Name]_[Counter 4 digit]"
//!
//! [[session.plugins]]
//! name = "Export"
//! plugin_type = "copy_to_folder"
//! params = { destination = "/mnt/nas/wedding" }
//!
//! [[presets]]
//! name = "Studio"
//! values = { iso = "100", aperture = "8" }
//! ```

use crate::error::Result;
use crate::preset::{Preset, PresetStore};
use crate::session::Session;
use camctl_common::config::{load_toml_config, resolve_capture_folder, TomlConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Full configuration file for the capture service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(flatten)]
    pub base: TomlConfig,

    #[serde(default)]
    pub session: Session,

    #[serde(default)]
    pub presets: Vec<Preset>,
}

impl CaptureConfig {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        Ok(load_toml_config(path)?)
    }

    /// Settle the session's destination folder
    ///
    /// A folder given in `[session]` counts as a config-file value when
    /// `capture_folder` is absent.
    pub fn resolve_capture_folder(&mut self, cli_arg: Option<&Path>) {
        let session_folder = Some(self.session.folder.as_path()).filter(|p| !p.as_os_str().is_empty());
        let toml_value = self.base.capture_folder.as_deref().or(session_folder);
        self.session.folder = resolve_capture_folder(cli_arg, toml_value);
        info!(folder = %self.session.folder.display(), "Capture folder");
    }

    pub fn preset_store(&self) -> PresetStore {
        PresetStore::new(self.presets.clone())
    }
}
