//! Test helpers for camctl-capture integration tests
//!
//! Provides reusable test infrastructure components:
//! - MockCamera: in-memory device with fault injection and busy tracking
//! - RecordingPlugin / FailingPlugin: plugin doubles
//! - RecordingObserver: preset batch progress capture
//! - Service and event utilities

#![allow(dead_code)]

use async_trait::async_trait;
use camctl_capture::catalog::CatalogedItem;
use camctl_capture::device::{
    CameraDevice, CaptureEvent, DeviceProperties, RemoteHandle,
};
use camctl_capture::plugins::{AutoExportPlugin, PluginConfig, PluginRegistry};
use camctl_capture::preset::ProgressObserver;
use camctl_capture::session::Session;
use camctl_capture::transfer::{PipelineSettings, TransferOutcome};
use camctl_capture::{CaptureService, CaptureServiceBuilder, Error, Result};
use camctl_common::CameraEvent;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// MockCamera
// ============================================================================

/// Shared gauge of transfers in flight, across cameras
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// In-memory camera
pub struct MockCamera {
    id: String,
    name: String,
    busy: AtomicBool,
    connected: AtomicBool,
    in_ram: bool,
    no_download: bool,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    properties: Mutex<BTreeMap<String, String>>,
    transfer_delay: Duration,
    gauge: Option<Arc<ConcurrencyGauge>>,
    pub fail_transfer: AtomicBool,
    pub panic_on_transfer: AtomicBool,
    pub fail_set: AtomicBool,
    pub panic_on_set: AtomicBool,
    /// Busy flag was false while a transfer was running
    pub idle_during_transfer: AtomicBool,
    pub transfers: AtomicUsize,
    /// Every local path a download was written to
    pub staged_paths: Mutex<Vec<PathBuf>>,
    /// Folder deleted while the next download runs
    remove_during_transfer: Mutex<Option<PathBuf>>,
}

impl MockCamera {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Camera {}", id),
            busy: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            in_ram: false,
            no_download: false,
            objects: Mutex::new(HashMap::new()),
            properties: Mutex::new(BTreeMap::new()),
            transfer_delay: Duration::ZERO,
            gauge: None,
            fail_transfer: AtomicBool::new(false),
            panic_on_transfer: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
            panic_on_set: AtomicBool::new(false),
            idle_during_transfer: AtomicBool::new(false),
            transfers: AtomicUsize::new(0),
            staged_paths: Mutex::new(Vec::new()),
            remove_during_transfer: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn with_in_ram(mut self) -> Self {
        self.in_ram = true;
        self
    }

    pub fn with_no_download(mut self) -> Self {
        self.no_download = true;
        self
    }

    pub fn with_property(self, name: &str, value: &str) -> Self {
        self.properties
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Delete `folder` in the middle of the next download
    pub fn remove_during_transfer(&self, folder: &Path) {
        *self.remove_during_transfer.lock().unwrap() = Some(folder.to_path_buf());
    }

    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged_paths.lock().unwrap().clone()
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.properties.lock().unwrap().get(name).cloned()
    }

    /// Put an object on the "card" and build its capture event
    pub fn capture(self: &Arc<Self>, file_name: &str, bytes: &[u8]) -> CaptureEvent {
        self.objects
            .lock()
            .unwrap()
            .insert(file_name.to_string(), bytes.to_vec());
        let device: Arc<dyn CameraDevice> = self.clone();
        CaptureEvent::new(device, RemoteHandle(file_name.to_string()), file_name)
    }
}

impl CameraDevice for MockCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> String {
        self.name.clone()
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

    fn capture_in_ram(&self) -> bool {
        self.in_ram
    }

    fn load_properties(&self) -> Result<DeviceProperties> {
        Ok(DeviceProperties {
            display_name: self.name.clone(),
            serial: format!("SN-{}", self.id),
            sort_order: 0,
            no_download: self.no_download,
        })
    }

    fn transfer_file(&self, handle: &RemoteHandle, destination: &Path) -> Result<()> {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.is_busy() {
            self.idle_during_transfer.store(true, Ordering::SeqCst);
        }
        self.transfers.fetch_add(1, Ordering::SeqCst);
        self.staged_paths
            .lock()
            .unwrap()
            .push(destination.to_path_buf());
        std::thread::sleep(self.transfer_delay);
        if let Some(folder) = self.remove_during_transfer.lock().unwrap().take() {
            std::fs::remove_dir_all(folder).unwrap();
        }

        let result = if self.panic_on_transfer.load(Ordering::SeqCst) {
            if let Some(gauge) = &self.gauge {
                gauge.leave();
            }
            panic!("device driver crashed");
        } else if self.fail_transfer.load(Ordering::SeqCst) {
            // Part of the object arrived before the link dropped
            std::fs::write(destination, b"partial").unwrap();
            Err(Error::Transfer(format!("{} lost connection", self.id)))
        } else {
            let bytes = self.objects.lock().unwrap().get(&handle.0).cloned();
            match bytes {
                Some(bytes) => std::fs::write(destination, bytes).map_err(Error::from),
                None => Err(Error::Transfer(format!("No object {}", handle))),
            }
        };

        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }
        result
    }

    fn property_names(&self) -> Result<Vec<String>> {
        Ok(self.properties.lock().unwrap().keys().cloned().collect())
    }

    fn property_value(&self, name: &str) -> Result<Option<String>> {
        Ok(self.properties.lock().unwrap().get(name).cloned())
    }

    fn set_property_value(&self, name: &str, value: &str) -> Result<()> {
        if self.panic_on_set.load(Ordering::SeqCst) {
            panic!("property write crashed");
        }
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(Error::Device(format!("{} rejected {}", self.id, name)));
        }
        self.properties
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// Plugin doubles
// ============================================================================

pub const RECORDING: &str = "recording";
pub const FAILING: &str = "failing";

/// Records every item it is run against
#[derive(Default)]
pub struct RecordingPlugin {
    pub calls: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingPlugin {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }
}

#[async_trait]
impl AutoExportPlugin for RecordingPlugin {
    async fn execute(&self, item: &CatalogedItem, config: &PluginConfig) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((config.name.clone(), item.path.clone()));
        Ok(())
    }
}

/// Always fails with the configured message
pub struct FailingPlugin {
    pub message: String,
}

impl Default for FailingPlugin {
    fn default() -> Self {
        Self {
            message: "export target unreachable".to_string(),
        }
    }
}

#[async_trait]
impl AutoExportPlugin for FailingPlugin {
    async fn execute(&self, _item: &CatalogedItem, _config: &PluginConfig) -> Result<()> {
        Err(Error::Plugin(self.message.clone()))
    }
}

/// Registry with the recording and failing doubles
pub fn test_registry(recorder: Arc<RecordingPlugin>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(RECORDING, recorder);
    registry.register(FAILING, Arc::new(FailingPlugin::default()));
    registry
}

// ============================================================================
// Progress observer
// ============================================================================

#[derive(Default)]
pub struct RecordingObserver {
    pub updates: Mutex<Vec<(usize, usize, String)>>,
    pub finished: AtomicUsize,
}

impl ProgressObserver for RecordingObserver {
    fn progress(&self, current: usize, total: usize, label: &str) {
        self.updates
            .lock()
            .unwrap()
            .push((current, total, label.to_string()));
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Service and events
// ============================================================================

/// Session writing into `folder` with default naming
pub fn session_in(folder: &Path) -> Session {
    Session::new("Shoot", folder)
}

/// Service with built-in plugins and default switches
pub fn service(session: Session) -> CaptureService {
    CaptureServiceBuilder::new(session).build()
}

pub fn service_with(
    session: Session,
    settings: PipelineSettings,
    plugins: PluginRegistry,
    parallel: bool,
) -> CaptureService {
    CaptureServiceBuilder::new(session)
        .settings(settings)
        .plugins(plugins)
        .parallel_transfer(parallel)
        .build()
}

/// Run one capture through the service's dispatcher
pub async fn transfer(service: &CaptureService, event: CaptureEvent) -> TransferOutcome {
    service
        .dispatcher()
        .dispatch(event)
        .await
        .await
        .expect("transfer task panicked")
}

/// Wait until the coordinator has processed everything sent so far
pub async fn settle(service: &CaptureService) -> Vec<CatalogedItem> {
    service.coordinator().items().await.unwrap()
}

/// Everything received so far
pub fn drain(rx: &mut broadcast::Receiver<CameraEvent>) -> Vec<CameraEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_types(events: &[CameraEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

pub fn status_texts(events: &[CameraEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CameraEvent::StatusMessage { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Regular files directly in `dir`, sorted by name
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
