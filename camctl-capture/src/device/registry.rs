//! Connected-device collection

use super::CameraDevice;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// The set of cameras currently known to the application
///
/// Readers take a snapshot; the lock is never held across device calls.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Arc<dyn CameraDevice>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device; a device with the same id is replaced
    pub fn add(&self, device: Arc<dyn CameraDevice>) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.retain(|d| d.id() != device.id());
        debug!(device = %device.id(), "Camera registered");
        devices.push(device);
    }

    /// Remove a device by id, returning it if it was registered
    pub fn remove(&self, id: &str) -> Option<Arc<dyn CameraDevice>> {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        let index = devices.iter().position(|d| d.id() == id)?;
        Some(devices.remove(index))
    }

    /// All registered devices, in display order
    pub fn snapshot(&self) -> Vec<Arc<dyn CameraDevice>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Registered devices that report a live connection
    pub fn connected(&self) -> Vec<Arc<dyn CameraDevice>> {
        self.snapshot().into_iter().filter(|d| d.is_connected()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reorder by the devices' sort order, then display name
    ///
    /// Properties are refreshed first so renamed cameras sort correctly. A
    /// device whose properties cannot be read sorts with order 0 under its
    /// current display name.
    pub fn sort(&self, ascending: bool) {
        let mut keyed: Vec<((i32, String), Arc<dyn CameraDevice>)> = self
            .snapshot()
            .into_iter()
            .map(|device| {
                let key = match device.load_properties() {
                    Ok(props) => (props.sort_order, props.display_name),
                    Err(e) => {
                        warn!(device = %device.id(), error = %e, "Unable to refresh properties for sorting");
                        (0, device.display_name())
                    }
                };
                (key, device)
            })
            .collect();

        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        if !ascending {
            keyed.reverse();
        }

        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        *devices = keyed.into_iter().map(|(_, d)| d).collect();
    }
}
