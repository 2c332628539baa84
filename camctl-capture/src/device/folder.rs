//! Directory-backed camera
//!
//! Every regular file that appears in the directory is treated as a capture.
//! Device metadata and settable properties live in `properties.toml` in the
//! same directory:
//!
//! ```toml
//! [device]
//! display_name = "Studio left"
//! serial = "A1234"
//! sort_order = 2
//! capture_in_ram = false
//!
//! [properties]
//! iso = "200"
//! aperture = "5.6"
//! ```
//!
//! Used by the `camctl` binary to drive the pipeline without hardware, and by
//! the integration tests.

use super::{CameraDevice, Capability, CaptureEvent, DeviceProperties, RemoteHandle};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// File holding device metadata and property values
pub const PROPERTIES_FILE: &str = "properties.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PropertiesFile {
    #[serde(default)]
    device: DeviceSection,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DeviceSection {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    serial: String,
    #[serde(default)]
    sort_order: i32,
    #[serde(default)]
    no_download: bool,
    #[serde(default)]
    capture_in_ram: bool,
}

/// Camera emulated by a directory on disk
pub struct FolderCamera {
    id: String,
    root: PathBuf,
    busy: AtomicBool,
    connected: AtomicBool,
    /// Files already reported as captures
    seen: Mutex<HashSet<String>>,
    state: Mutex<PropertiesFile>,
}

impl FolderCamera {
    /// Open a directory as a camera, reading `properties.toml` if present
    pub fn open(id: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Device(format!(
                "Device folder {} does not exist",
                root.display()
            )));
        }

        let state = read_properties(&root)?;

        Ok(Self {
            id: id.into(),
            root,
            busy: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            seen: Mutex::new(HashSet::new()),
            state: Mutex::new(state),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Simulate plugging the camera in or out
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Report files not yet seen as capture events, in file name order
    pub fn poll_new_captures(self: &Arc<Self>) -> Result<Vec<CaptureEvent>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == PROPERTIES_FILE || name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let device: Arc<dyn CameraDevice> = self.clone();
        let events: Vec<CaptureEvent> = names
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .map(|name| CaptureEvent::new(Arc::clone(&device), RemoteHandle(name.clone()), name))
            .collect();

        if !events.is_empty() {
            debug!(device = %self.id, count = events.len(), "New captures found");
        }
        Ok(events)
    }

    fn persist(&self, state: &PropertiesFile) -> Result<()> {
        let content = toml::to_string_pretty(state)
            .map_err(|e| Error::Device(format!("Failed to serialize properties: {}", e)))?;
        std::fs::write(self.root.join(PROPERTIES_FILE), content)?;
        Ok(())
    }
}

fn read_properties(root: &Path) -> Result<PropertiesFile> {
    let path = root.join(PROPERTIES_FILE);
    if !path.exists() {
        return Ok(PropertiesFile::default());
    }
    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Device(format!("Invalid {}: {}", path.display(), e)))
}

impl CameraDevice for FolderCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.device.display_name.clone().unwrap_or_else(|| self.id.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn capabilities(&self) -> HashSet<Capability> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut capabilities = HashSet::new();
        if state.device.capture_in_ram {
            capabilities.insert(Capability::CaptureInRam);
        }
        capabilities
    }

    fn load_properties(&self) -> Result<DeviceProperties> {
        // Pick up edits made on disk since the camera was opened
        match read_properties(&self.root) {
            Ok(fresh) => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                *state = fresh;
            }
            Err(e) => warn!(device = %self.id, error = %e, "Keeping cached properties"),
        }

        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(DeviceProperties {
            display_name: state.device.display_name.clone().unwrap_or_else(|| self.id.clone()),
            serial: state.device.serial.clone(),
            sort_order: state.device.sort_order,
            no_download: state.device.no_download,
        })
    }

    fn transfer_file(&self, handle: &RemoteHandle, destination: &Path) -> Result<()> {
        let source = self.root.join(&handle.0);
        if !source.is_file() {
            return Err(Error::Transfer(format!(
                "Object {} not found on {}",
                handle, self.id
            )));
        }
        std::fs::copy(&source, destination).map_err(|e| {
            Error::Transfer(format!(
                "Copy {} -> {} failed: {}",
                source.display(),
                destination.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn property_names(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.properties.keys().cloned().collect())
    }

    fn property_value(&self, name: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.properties.get(name).cloned())
    }

    fn set_property_value(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.properties.insert(name.to_string(), value.to_string());
        self.persist(&state)
    }
}
